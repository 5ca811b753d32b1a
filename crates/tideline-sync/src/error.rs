//! # Sync Error Types
//!
//! Error types for the sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │   Reconciliation        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  RequestFailed  │  │  Aggregate              │ │
//! │  │  InvalidUrl     │  │  Http           │  │  HandlerPanicked        │ │
//! │  │  ConfigLoad/Save│  │  Timeout        │  │  Core (key paths)       │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Storage      │  │   Lifecycle     │                              │
//! │  │                 │  │                 │                              │
//! │  │  Store          │  │  ShuttingDown   │                              │
//! │  │  Serialization  │  │  NoRuntime      │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! │                                                                         │
//! │  Caller-facing calls return these directly. Failures inside the sync   │
//! │  loop are wrapped in a SyncException and sent to the exception         │
//! │  surface instead.                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;
use thiserror::Error;

use tideline_core::CoreError;
use tideline_db::DbError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering every failure the engine can report.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid remote URL.
    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The remote answered with a non-success status.
    ///
    /// `url` never contains the auth token.
    #[error("{method} {url} failed with status {status}: {message}")]
    RequestFailed {
        method: String,
        url: String,
        status: u16,
        message: String,
    },

    /// The request never got a response (DNS, connect, TLS, body).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The request exceeded its timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    // =========================================================================
    // Reconciliation Errors
    // =========================================================================
    /// One or more tasks of a priority group failed.
    #[error("{} reconciliation task(s) failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<SyncError>),

    /// A put handler or fetch panicked.
    #[error("Sync task for {key} panicked: {message}")]
    HandlerPanicked { key: String, message: String },

    /// Key-path resolution or payload handling failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// The entry store failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A value could not be (de)serialized.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// The engine is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// The engine was built outside a Tokio runtime.
    #[error("No Tokio runtime available to run the sync loop")]
    NoRuntime,

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_errors(errors: &[SyncError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        SyncError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

/// The URL is stripped first so auth tokens never reach logs.
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Http(err.without_url().to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Builds an aggregate, unwrapping a single failure.
    pub fn aggregate(mut errors: Vec<SyncError>) -> SyncError {
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            SyncError::Aggregate(errors)
        }
    }

    /// Returns true if the next cycle has a fair chance of succeeding.
    ///
    /// ## Retryable Errors
    /// - Network failures and timeouts
    /// - 5xx, 408 and 429 responses
    /// - Aggregates containing any of the above
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Http(_) | SyncError::Timeout(_) => true,
            SyncError::RequestFailed { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            SyncError::Aggregate(errors) => errors.iter().any(SyncError::is_retryable),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Number of underlying failures.
    pub fn failure_count(&self) -> usize {
        match self {
            SyncError::Aggregate(errors) => errors.len(),
            _ => 1,
        }
    }
}
