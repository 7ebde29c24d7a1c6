//! # Repository Module
//!
//! Database repository implementations for Beacon.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  Sync engine                                                           │
//! │       │                                                                 │
//! │       │  db.entities().upsert_chunk(ctx, items)                        │
//! │       │  db.sync_runs().append_checkpoint(run_id, cp)                  │
//! │       ▼                                                                 │
//! │  ┌───────────────────┐ ┌───────────────────┐ ┌──────────────────┐      │
//! │  │ SyncRunRepository │ │ EntityRepository  │ │ DedupRepository  │      │
//! │  │ runs, checkpoints │ │ natural-key       │ │ groups, re-point │      │
//! │  │ errors, warnings  │ │ upserts           │ │ delete losers    │      │
//! │  └───────────────────┘ └───────────────────┘ └──────────────────┘      │
//! │                        ┌───────────────────┐                           │
//! │                        │ StatsRepository   │                           │
//! │                        └───────────────────┘                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`SyncRunRepository`] - Run state, checkpoints, bounded error/warning logs
//! - [`EntityRepository`] - Idempotent entity writes
//! - [`DedupRepository`] - Duplicate collapse
//! - [`StatsRepository`] - Entity counts

pub mod dedup;
pub mod entity;
pub mod stats;
pub mod sync_run;

pub use dedup::DedupRepository;
pub use entity::{EntityRepository, UpsertCounts, WriteContext};
pub use stats::StatsRepository;
pub use sync_run::SyncRunRepository;
