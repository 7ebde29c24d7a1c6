//! # beacon-core: Pure Sync Logic for Beacon
//!
//! This crate holds the decision logic of the synchronization engine as pure
//! functions and plain types, with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Beacon Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 apps/sync-server (axum + SSE)                   │   │
//! │  │   /api/sync/stream  /api/sync/resume  /api/sync/dedup  ...      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │      beacon-sync: orchestrator, writer, emitter, reconciler     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ beacon-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌───────┐ │   │
//! │  │  │ classify │ │  retry   │ │ progress │ │  dedup   │ │ types │ │   │
//! │  │  │ taxonomy │ │ backoff  │ │ ledger   │ │ policy   │ │events │ │   │
//! │  │  └──────────┘ └──────────┘ └──────────┘ └──────────┘ └───────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 beacon-db (SQLite repositories)                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Runs, checkpoints, error records, external entity records
//! - [`classify`] - Failure taxonomy and the classifier
//! - [`retry`] - Backoff arithmetic
//! - [`progress`] - Progress tracker, checkpoint ledger, bounded logs
//! - [`dedup`] - Duplicate tie-break policy
//! - [`events`] - Events streamed to callers
//! - [`error`] - Domain error types
//! - [`validation`] - Natural-key field checks
//!
//! ## Example Usage
//!
//! ```rust
//! use beacon_core::classify::{classify, FailureKind};
//! use beacon_core::retry::RetryPolicy;
//!
//! let kind = FailureKind::Http { status: 503, message: "unavailable".into() };
//! let policy = RetryPolicy::default();
//!
//! assert!(classify(&kind).retryable);
//! assert!(policy.should_retry(&kind, 1));
//! assert!(!policy.should_retry(&kind, 3));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod classify;
pub mod dedup;
pub mod error;
pub mod events;
pub mod progress;
pub mod retry;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use classify::{classify, Classification, Classify, ErrorCategory, FailureKind, Severity};
pub use dedup::{DedupPolicy, DedupReport};
pub use error::{CoreError, CoreResult, ValidationError};
pub use events::SyncEvent;
pub use retry::RetryPolicy;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Records per write transaction.
pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 50;

/// Error records kept inline on a run; older ones are evicted.
pub const DEFAULT_MAX_ERRORS_RETAINED: usize = 100;

/// Seconds between heartbeat events on a live stream.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;

/// Failed/attempted unit ratio above which a run is failed.
pub const DEFAULT_ERROR_RATE_THRESHOLD: f64 = 0.5;

/// Units that must run before the error-rate cutoff applies.
pub const DEFAULT_ERROR_RATE_MIN_UNITS: u32 = 10;
