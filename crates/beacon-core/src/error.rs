//! # Error Types
//!
//! Domain-specific error types for beacon-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  beacon-core errors (this file)                                        │
//! │  ├── CoreError        - State machine / domain errors                  │
//! │  └── ValidationError  - Malformed records from the external API        │
//! │                                                                         │
//! │  beacon-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  beacon-sync errors (separate crate)                                   │
//! │  ├── ApiError         - External API client failures                   │
//! │  └── SyncError        - Engine failures                                │
//! │                                                                         │
//! │  Every layer maps into FailureKind (classify.rs) for retry decisions   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::classify::{Classify, FailureKind};

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A sync run was asked to move between two states that are not connected.
    ///
    /// ## When This Occurs
    /// - Resuming a run that already completed
    /// - Completing a run that was never started
    #[error("Invalid sync run transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Unknown data type name (e.g. in a request body or checkpoint row).
    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    /// Unknown sync status name.
    #[error("Unknown sync status: {0}")]
    UnknownStatus(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Record validation errors.
///
/// These occur when a record coming back from the external API cannot be
/// keyed, so it must never reach the store.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("missing required field: {field}")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., reversed period bounds).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    /// Returns the name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Required { field }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::InvalidFormat { field, .. } => field,
        }
    }
}

impl Classify for ValidationError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::MissingField {
            field: self.field().to_string(),
        }
    }
}

impl Classify for CoreError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            CoreError::Validation(v) => v.failure_kind(),
            other => FailureKind::Unstructured {
                message: other.to_string(),
            },
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
