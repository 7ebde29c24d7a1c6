//! # beacon-sync: Sync Engine for Beacon
//!
//! Pulls accounts, locations, and per-location business data from the
//! external API into the local store, one checkpointed unit at a time.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  SyncService (entry point)                       │  │
//! │  │                                                                  │  │
//! │  │  start / resume / dedup / statistics / run lookup                │  │
//! │  │  one tokio task per run, tracked in RunRegistry                  │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │SyncOrchestrator│  │  BatchWriter   │  │  ProgressEmitter       │    │
//! │  │                │  │                │  │                        │    │
//! │  │ accounts →     │─►│ natural-key    │  │ SyncEvent channel      │    │
//! │  │ locations →    │  │ upserts in     │  │ heartbeat task         │    │
//! │  │ data types     │  │ retried chunks │  │ done-signal            │    │
//! │  └───────┬────────┘  └────────────────┘  └────────────────────────┘    │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │BusinessApiClient│ │  Reconciler    │  │  retry_classified      │    │
//! │  │ (RestApiClient)│  │  dedup pass    │  │  backoff + classifier  │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  EVENTS (to the SSE consumer):                                          │
//! │  • progress   • checkpoint   • errors   • warnings                      │
//! │  • heartbeat  • complete     • failed                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Engine
//! - [`orchestrator`] - Checkpointed traversal and the run state machine
//! - [`writer`] - Chunked, retried natural-key upserts
//! - [`emitter`] - Observer trait and the event stream with heartbeat
//! - [`dedup`] - Duplicate reconciliation pass
//! - [`retry`] - Classifier-aware retry executor
//!
//! ### Boundary
//! - [`client`] - API client contract and the REST adapter
//! - [`service`] - Start/resume entry points used by the server
//! - [`registry`] - Active-run handles and the retention sweeper
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Engine error type
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_sync::{RestClientFactory, SyncConfig, SyncService, SyncTokens};
//! use beacon_db::{Database, DbConfig};
//!
//! let config = Arc::new(SyncConfig::load_or_default(None));
//! let db = Database::new(DbConfig::new(&config.server.database_path)).await?;
//! let clients = Arc::new(RestClientFactory::new(config.api.clone()));
//! let service = SyncService::new(db, config, clients, CancellationToken::new());
//!
//! let mut run = service.start("local", tokens, RunOptions::default()).await?;
//! while let Some(event) = run.events.recv().await {
//!     println!("{}", event.kind());
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod client;
pub mod config;
pub mod dedup;
pub mod emitter;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod service;
pub mod writer;

#[cfg(test)]
mod mock;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::{
    ApiError, ApiResult, BusinessApiClient, ClientFactory, Page, PageRequest, RestApiClient,
    RestClientFactory,
};
pub use config::SyncConfig;
pub use dedup::Reconciler;
pub use emitter::{EventStream, NoOpObserver, ProgressEmitter, SyncObserver};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{AccountScope, SyncOrchestrator};
pub use registry::RunRegistry;
pub use retry::retry_classified;
pub use service::{RunStream, SyncService, SyncTokens};
pub use writer::{BatchWriter, WriteSummary};
