//! Failure classification and user-facing messages.
//!
//! Every mutation failure ends here. The reporter maps the error chain to a
//! failure class, always produces a message the UI can present, and logs the
//! full chain only when developer diagnostics are enabled.

use std::error::Error as StdError;
use std::fmt;

use tracing::{error, warn};
use uuid::Uuid;

use crate::application::remote::RemoteError;

use super::error::{CacheError, FetchError, MutationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Server unreachable or timed out.
    Network,
    /// Server rejected a precondition.
    Validation,
    /// Server state diverged from what the client assumed.
    Conflict,
    /// Optimistic write against an absent key. Internal defect.
    PatchOnMissingKey,
    Unclassified,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Network => "network",
            FailureClass::Validation => "validation",
            FailureClass::Conflict => "conflict",
            FailureClass::PatchOnMissingKey => "patch_on_missing_key",
            FailureClass::Unclassified => "unclassified",
        }
    }

    /// Failures that force a refetch of the affected keys after rollback.
    pub fn forces_refetch(self) -> bool {
        self == FailureClass::Conflict
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message handed to the alert/toast layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    pub class: FailureClass,
    pub title: String,
    pub body: String,
    pub retryable: bool,
}

impl fmt::Display for UserMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.body)
    }
}

/// Where a failure was observed.
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub source: &'static str,
    pub operation: &'static str,
    pub correlation_id: Option<Uuid>,
}

impl ReportContext {
    pub fn new(source: &'static str, operation: &'static str) -> Self {
        Self {
            source,
            operation,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Rendered error chain, outermost first.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn chain(&self) -> String {
        self.messages.join(": ")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorReporter {
    diagnostics: bool,
}

impl ErrorReporter {
    pub fn new(diagnostics: bool) -> Self {
        Self { diagnostics }
    }

    /// Classify an error by walking its source chain.
    pub fn classify(error: &(dyn StdError + 'static)) -> FailureClass {
        let mut current = Some(error);
        while let Some(error) = current {
            if let Some(class) = classify_one(error) {
                return class;
            }
            current = error.source();
        }
        FailureClass::Unclassified
    }

    /// Log the failure and produce the message to present. Never fails.
    pub fn report(&self, error: &(dyn StdError + 'static), context: &ReportContext) -> UserMessage {
        let class = Self::classify(error);
        let correlation_id = context
            .correlation_id
            .map(|id| id.to_string())
            .unwrap_or_default();

        if class == FailureClass::PatchOnMissingKey {
            error!(
                source = context.source,
                operation = context.operation,
                correlation_id = %correlation_id,
                error = %error,
                "Cache defect: optimistic write on a missing key"
            );
        } else if self.diagnostics {
            let report = ErrorReport::from_error(context.source, error);
            warn!(
                source = report.source,
                operation = context.operation,
                correlation_id = %correlation_id,
                class = class.as_str(),
                chain = %report.chain(),
                "Mutation failed"
            );
        } else {
            warn!(
                operation = context.operation,
                correlation_id = %correlation_id,
                class = class.as_str(),
                "Mutation failed"
            );
        }

        message_for(class, server_reason(error))
    }
}

fn classify_one(error: &(dyn StdError + 'static)) -> Option<FailureClass> {
    if let Some(remote) = error.downcast_ref::<RemoteError>() {
        return Some(classify_remote(remote));
    }
    if let Some(cache) = error.downcast_ref::<CacheError>() {
        return Some(classify_cache(cache));
    }
    // Transparent wrappers forward `source()` past the wrapped error, so
    // unwrap them here.
    if let Some(mutation) = error.downcast_ref::<MutationError>() {
        return Some(match mutation {
            MutationError::Remote(remote) => classify_remote(remote),
            MutationError::Cache(cache) => classify_cache(cache),
        });
    }
    if let Some(fetch) = error.downcast_ref::<FetchError>() {
        return Some(match fetch {
            FetchError::Remote(remote) => classify_remote(remote),
            FetchError::Cache(cache) => classify_cache(cache),
            FetchError::NoNextPage { .. } => FailureClass::Unclassified,
        });
    }
    None
}

fn classify_remote(error: &RemoteError) -> FailureClass {
    match error {
        RemoteError::Transport { .. } | RemoteError::Timeout(_) => FailureClass::Network,
        RemoteError::Status { status, .. } => match status {
            400 | 422 => FailureClass::Validation,
            409 | 412 => FailureClass::Conflict,
            _ => FailureClass::Unclassified,
        },
        RemoteError::Other { .. } => FailureClass::Unclassified,
    }
}

fn classify_cache(error: &CacheError) -> FailureClass {
    match error {
        CacheError::PatchOnMissingKey { .. } => FailureClass::PatchOnMissingKey,
        _ => FailureClass::Unclassified,
    }
}

fn server_reason(error: &(dyn StdError + 'static)) -> Option<String> {
    let remote = error.downcast_ref::<RemoteError>().or_else(|| {
        match error.downcast_ref::<MutationError>() {
            Some(MutationError::Remote(remote)) => Some(remote),
            _ => None,
        }
    })?;
    remote
        .server_reason()
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .map(str::to_string)
}

fn message_for(class: FailureClass, reason: Option<String>) -> UserMessage {
    let (title, body, retryable) = match class {
        FailureClass::Network => (
            "Connection problem",
            "We couldn't reach the server, so your change was not saved. Please try again."
                .to_string(),
            true,
        ),
        FailureClass::Validation => (
            "Action not available",
            reason.unwrap_or_else(|| "This action can no longer be performed.".to_string()),
            false,
        ),
        FailureClass::Conflict => (
            "Out of date",
            "This item was changed elsewhere. The latest version is being loaded.".to_string(),
            false,
        ),
        FailureClass::PatchOnMissingKey | FailureClass::Unclassified => (
            "Something went wrong",
            "Your change was not saved. Please try again.".to_string(),
            true,
        ),
    };
    UserMessage {
        class,
        title: title.to_string(),
        body,
        retryable,
    }
}
