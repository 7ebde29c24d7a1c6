//! # beacon-db: Database Layer for Beacon
//!
//! This crate provides persistence for the sync engine.
//! It uses SQLite with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Beacon Data Flow                                 │
//! │                                                                         │
//! │  Orchestrator / BatchWriter / Reconciler (beacon-sync)                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     beacon-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ SyncRunRepo   │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ EntityRepo    │    │ 001_initial_ │  │   │
//! │  │   │ WAL, FKs on   │    │ DedupRepo     │    │ schema.sql   │  │   │
//! │  │   │               │    │ StatsRepo     │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/beacon.db                                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("beacon.db")).await?;
//!
//! let run = db.sync_runs().create("owner-1", &RunOptions::default()).await?;
//! let stats = db.stats().collect().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::{
    DedupRepository, EntityRepository, StatsRepository, SyncRunRepository, UpsertCounts,
    WriteContext,
};
