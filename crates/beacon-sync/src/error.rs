//! # Sync Error Types
//!
//! Error types for engine operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Boundaries    │  │     Run Control         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Api(ApiError)  │  │  RunNotFound            │ │
//! │  │  ConfigLoad     │  │  Database       │  │  NotResumable           │ │
//! │  │  ConfigSave     │  │  Core           │  │  RunActive              │ │
//! │  │                 │  │  Timeout        │  │  ErrorRateExceeded      │ │
//! │  │                 │  │                 │  │  Cancelled              │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Boundary variants keep the structured error they wrap, so classification
//! sees the original HTTP status or constraint failure.

use beacon_core::{Classify, CoreError, FailureKind, SyncStatus};
use beacon_db::DbError;
use thiserror::Error;

use crate::client::ApiError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all engine failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Boundary Errors
    // =========================================================================
    /// External API call failed.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Store operation failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Domain rule violated (validation, illegal transition).
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Run Control Errors
    // =========================================================================
    /// No run with this id.
    #[error("Sync run not found: {0}")]
    RunNotFound(String),

    /// Run is in a state that cannot be resumed.
    #[error("Sync run {id} cannot be resumed from {status}")]
    NotResumable { id: String, status: SyncStatus },

    /// Run already has a live worker.
    #[error("Sync run {0} is already running")]
    RunActive(String),

    /// Too many units failed.
    #[error("Error rate exceeded: {failed} of {attempted} units failed")]
    ErrorRateExceeded { failed: u32, attempted: u32 },

    /// Consumer disconnected or the server is shutting down.
    #[error("Sync run cancelled")]
    Cancelled,

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

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

impl Classify for SyncError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            SyncError::Api(e) => e.failure_kind(),
            SyncError::Database(e) => e.failure_kind(),
            SyncError::Core(e) => e.failure_kind(),
            other => FailureKind::Unstructured {
                message: other.to_string(),
            },
        }
    }
}

impl SyncError {
    /// Returns true if the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        self.classification().retryable
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true for cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::classify::codes;
    use beacon_core::ValidationError;

    #[test]
    fn test_retryable_errors() {
        let server = SyncError::Api(ApiError::Status {
            status: 503,
            message: "unavailable".into(),
        });
        assert!(server.is_retryable());
        assert!(SyncError::Api(ApiError::Timeout).is_retryable());

        let forbidden = SyncError::Api(ApiError::Status {
            status: 403,
            message: "denied".into(),
        });
        assert!(!forbidden.is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn test_boundary_classification_is_preserved() {
        let dup = SyncError::Database(DbError::duplicate("review_ref", "r1"));
        assert_eq!(dup.classification().code, codes::DB_DUPLICATE_KEY);

        let missing = SyncError::Core(CoreError::Validation(ValidationError::Required {
            field: "reviewRef".into(),
        }));
        assert_eq!(missing.classification().code, codes::VALIDATION_MISSING_FIELD);
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::NotResumable {
            id: "run-1".into(),
            status: SyncStatus::Completed,
        };
        assert!(err.to_string().contains("run-1"));
        assert!(err.to_string().contains("completed"));
    }
}
