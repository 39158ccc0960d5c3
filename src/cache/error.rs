use thiserror::Error;

use crate::application::remote::RemoteError;
use crate::domain::pagination::PaginationError;

use super::keys::QueryKey;

/// Failures raised by the cache store itself.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// An optimistic write needs a known base state.
    #[error("optimistic patch on missing cache key `{key}`")]
    PatchOnMissingKey { key: QueryKey },
    #[error("cached payload at `{key}` cannot take a {received} page")]
    PayloadMismatch { key: QueryKey, received: &'static str },
    #[error("pagination failed for `{key}`")]
    Pagination {
        key: QueryKey,
        #[source]
        source: PaginationError,
    },
    #[error("invalid query key: {reason}")]
    InvalidKey { reason: String },
}

impl CacheError {
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }
}

/// Failure of a single user-triggered mutation, as seen at the coordinator boundary.
#[derive(Debug, Clone, Error)]
pub enum MutationError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Failure of a foreground fetch issued through the refetcher.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("`{key}` has no further pages")]
    NoNextPage { key: QueryKey },
}
