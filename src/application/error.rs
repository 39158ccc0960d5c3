use thiserror::Error;

use crate::cache::FetchError;
use crate::config::LoadError;
use crate::infra::error::InfraError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("initial fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 2,
            AppError::Infra(_) | AppError::Fetch(_) | AppError::Unexpected(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryKey;

    #[test]
    fn configuration_failures_exit_with_usage_status() {
        let error = AppError::from(LoadError::Invalid {
            key: "cache.max_entries",
            reason: "must be greater than zero".to_string(),
        });
        assert_eq!(error.exit_code(), 2);
        assert_eq!(
            error.to_string(),
            "invalid configuration for `cache.max_entries`: must be greater than zero"
        );
    }

    #[test]
    fn fetch_failures_keep_their_key() {
        let error = AppError::from(FetchError::NoNextPage {
            key: QueryKey::dashboard(),
        });
        assert_eq!(error.exit_code(), 1);
        assert!(error.to_string().contains("dashboard:aggregate"));
    }
}
