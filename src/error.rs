//! Error types for Searchgate

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Message shown to end users when the search path fails.
pub const SEARCH_FAILED_MESSAGE: &str = "Search failed, please try again.";

/// Message shown to end users when a login is throttled.
pub const TOO_MANY_ATTEMPTS_MESSAGE: &str = "Too many attempts, please try again later.";

/// Message shown to end users for anything else.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong.";

/// Errors that can occur in Searchgate
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Job Queue Errors
    // =========================================================================
    /// No admission slot was free and the caller asked not to wait
    #[error("Job queue is full")]
    QueueFull,

    /// The queue is shutting down or has shut down
    #[error("Job queue is stopped")]
    QueueStopped,

    /// The caller gave up waiting
    #[error("Operation cancelled by caller")]
    Cancelled,

    /// The job's reply was closed without a result
    #[error("Job was abandoned before producing a result")]
    JobAbandoned,

    /// Workers did not exit within the shutdown grace period
    #[error("Shutdown timed out after {grace:?}")]
    ShutdownTimeout { grace: Duration },

    // =========================================================================
    // Search Errors
    // =========================================================================
    /// The external search dependency failed
    #[error("Search backend error: {0}")]
    Backend(String),

    /// Transport failure talking to a remote search backend
    #[error("Search backend connection error: {0}")]
    BackendConnection(#[source] reqwest::Error),

    /// The query cannot be executed
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    // =========================================================================
    // Rate Limiting Errors
    // =========================================================================
    /// Login attempt throttled
    #[error("Rate limit exceeded")]
    RateLimited,

    // =========================================================================
    // Configuration / I/O Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parse error
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true for errors raised on the query path.
    pub fn is_search_failure(&self) -> bool {
        matches!(
            self,
            Error::QueueFull
                | Error::QueueStopped
                | Error::Cancelled
                | Error::JobAbandoned
                | Error::Backend(_)
                | Error::BackendConnection(_)
                | Error::InvalidQuery(_)
        )
    }

    /// Returns true if retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::QueueFull
                | Error::Cancelled
                | Error::JobAbandoned
                | Error::Backend(_)
                | Error::BackendConnection(_)
                | Error::RateLimited
        )
    }

    /// Message safe to show to end users.
    ///
    /// Never reveals whether a login was throttled by IP or by username.
    pub fn public_message(&self) -> &'static str {
        if self.is_search_failure() {
            SEARCH_FAILED_MESSAGE
        } else if matches!(self, Error::RateLimited) {
            TOO_MANY_ATTEMPTS_MESSAGE
        } else {
            GENERIC_FAILURE_MESSAGE
        }
    }
}
