//! # Beacon Sync Server
//!
//! HTTP/SSE surface of the sync engine.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Sync Server Routes                             │
//! │                                                                         │
//! │  POST /api/sync/stream     {tokens, config}        → SSE SyncEvents     │
//! │  POST /api/sync/resume     {syncRunId, tokens}     → SSE SyncEvents     │
//! │  GET  /api/sync/stats                              → Statistics JSON    │
//! │  POST /api/sync/dedup                              → DedupReport JSON   │
//! │  GET  /api/sync/runs/{id}                          → SyncRun JSON       │
//! │  GET  /health                                      → "OK"               │
//! │                                                                         │
//! │  SSE frames:  event: <type>                                             │
//! │               data:  {"type": "<type>", "runId": ..., ...}              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! `BEACON_CONFIG` points at a TOML file; `BEACON_*` variables override
//! individual settings (see `beacon_sync::SyncConfig`). Log filtering uses
//! `RUST_LOG`.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ServerError;
pub use routes::router;
pub use state::AppState;
