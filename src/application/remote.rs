//! Collaborator contracts for the network layer.
//!
//! The cache core never talks HTTP. It calls these traits and treats their
//! results as opaque; `RemoteError` is the normalized failure shape every
//! transport adapter maps its own errors into.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::{CachePayload, Mutation, QueryKey};

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("transport failure: {message}")]
    Transport { message: String },
    #[error("remote operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("server responded with status {status}")]
    Status { status: u16, reason: Option<String> },
    #[error("remote failure: {message}")]
    Other { message: String },
}

impl RemoteError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn status(status: u16, reason: Option<String>) -> Self {
        Self::Status { status, reason }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Server-provided explanation, when the response carried one.
    pub fn server_reason(&self) -> Option<&str> {
        match self {
            RemoteError::Status { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }
}

/// Server response body of a successful mutation.
pub type MutationData = Value;

/// Performs user-triggered writes against the server.
#[async_trait]
pub trait RemoteOperations: Send + Sync {
    async fn perform(
        &self,
        mutation: &Mutation,
        correlation_id: Uuid,
    ) -> Result<MutationData, RemoteError>;
}

/// Loads server state for a query key.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Fetch the authoritative payload for `key`. List keys return page 1 only.
    async fn fetch(&self, key: &QueryKey) -> Result<CachePayload, RemoteError>;

    /// Fetch one further page of a list key, as a single-page list payload.
    async fn fetch_page(&self, key: &QueryKey, page: u32) -> Result<CachePayload, RemoteError>;
}
