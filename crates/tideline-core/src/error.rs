//! # Error Types
//!
//! Domain-specific error types for tideline-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tideline-core errors (this file)                                      │
//! │  └── CoreError        - Key-path and payload failures                  │
//! │                                                                         │
//! │  tideline-db errors (separate crate)                                   │
//! │  └── DbError          - Store persistence failures                     │
//! │                                                                         │
//! │  tideline-sync errors (separate crate)                                 │
//! │  └── SyncError        - Transport, aggregate and config failures       │
//! │                                                                         │
//! │  Flow: CoreError → SyncError → caller / exception surface              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
///
/// These are programming errors (misuse of the API) rather than transient
/// remote conditions, so they are returned to the caller directly.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A key-path descriptor could not be resolved into a remote path.
    ///
    /// ## When This Occurs
    /// - The descriptor has no segments
    /// - A segment is empty
    /// - A segment contains a character the remote store reserves
    #[error("Invalid key path {path:?}: {reason}")]
    InvalidKeyPath { path: String, reason: String },

    /// A value could not be serialized into a JSON payload.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// A stored payload could not be deserialized into the entity type.
    #[error("Failed to deserialize entry {key}: {reason}")]
    Deserialization { key: String, reason: String },

    /// A sync state string was not recognized.
    #[error("Unknown sync option: '{0}'. Valid options: none, pull, put, patch")]
    UnknownSyncOption(String),
}

impl CoreError {
    /// Creates an InvalidKeyPath error.
    pub fn invalid_key_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::InvalidKeyPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
