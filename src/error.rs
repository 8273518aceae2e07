//! Error types shared by detection, delivery and configuration.

use std::fmt;

/// Boxed error used where the underlying cause comes from a pluggable collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for notifier operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which callback a notification batch was sent to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    /// Service created callback.
    Create,
    /// Service removed callback.
    Remove,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

/// Errors produced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Listing the current services failed; the poll cycle is abandoned.
    #[error("failed to list services: {0}")]
    Query(#[source] BoxError),

    /// A callback request did not complete.
    #[error("request {url} failed: {source}")]
    Transport {
        /// The full callback URL.
        url: String,
        /// Underlying transport error.
        #[source]
        source: BoxError,
    },

    /// A callback request completed with a status other than 200.
    #[error("request {url} returned status code {status}\n{body}")]
    UnexpectedStatus {
        /// The full callback URL.
        url: String,
        /// Response status code.
        status: u16,
        /// Response body, captured for diagnostics.
        body: String,
    },

    /// At least one delivery in a notification batch failed.
    #[error(
        "{failed} of {total} {kind} notifications produced errors, consult logs for more details"
    )]
    Delivery {
        /// Which callback the batch targeted.
        kind: NotificationKind,
        /// Number of services whose delivery exhausted its retries.
        failed: usize,
        /// Number of services in the batch.
        total: usize,
    },

    /// Neither the specific nor the shared fallback callback URL is configured.
    #[error("no {0} callback URL configured")]
    MissingTarget(NotificationKind),

    /// A configured URL could not be parsed.
    #[error("invalid URL {value:?} in {key}: {reason}")]
    InvalidUrl {
        /// Configuration key the value came from.
        key: String,
        /// The rejected value.
        value: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// A configured number could not be parsed.
    #[error("invalid value {value:?} in {key}")]
    InvalidNumber {
        /// Configuration key the value came from.
        key: String,
        /// The rejected value.
        value: String,
    },

    /// The Kubernetes client could not be constructed.
    #[error("failed to create Kubernetes client: {0}")]
    Client(#[from] kube::Error),
}

impl Error {
    /// Wraps any source error as a query failure.
    pub fn query(source: impl Into<BoxError>) -> Self {
        Self::Query(source.into())
    }
}
