//! # Sync Events
//!
//! The one-directional stream a caller receives while a run executes.
//!
//! ```text
//!  progress ─┬─ progress ─ checkpoint ─ heartbeat ─ ... ─┬─► complete
//!            └─ errors / warnings (any time)             └─► failed
//! ```
//!
//! Serialized as JSON with a `type` tag; the SSE `event:` name is the same
//! tag, so a browser `EventSource` can subscribe per type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::{Checkpoint, ErrorRecord, Progress};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        run_id: String,
        step: Option<String>,
        progress: Progress,
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Checkpoint {
        run_id: String,
        checkpoint: Checkpoint,
    },
    #[serde(rename_all = "camelCase")]
    Errors {
        run_id: String,
        errors: Vec<ErrorRecord>,
    },
    #[serde(rename_all = "camelCase")]
    Warnings {
        run_id: String,
        warnings: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        run_id: String,
        #[ts(as = "String")]
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        run_id: String,
        progress: Progress,
        errors: Vec<ErrorRecord>,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        run_id: String,
        error: ErrorRecord,
    },
}

impl SyncEvent {
    /// The `type` tag, also used as the SSE event name.
    pub const fn kind(&self) -> &'static str {
        match self {
            SyncEvent::Progress { .. } => "progress",
            SyncEvent::Checkpoint { .. } => "checkpoint",
            SyncEvent::Errors { .. } => "errors",
            SyncEvent::Warnings { .. } => "warnings",
            SyncEvent::Heartbeat { .. } => "heartbeat",
            SyncEvent::Complete { .. } => "complete",
            SyncEvent::Failed { .. } => "failed",
        }
    }

    /// `complete` and `failed` end the stream.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, SyncEvent::Complete { .. } | SyncEvent::Failed { .. })
    }

    pub fn run_id(&self) -> &str {
        match self {
            SyncEvent::Progress { run_id, .. }
            | SyncEvent::Checkpoint { run_id, .. }
            | SyncEvent::Errors { run_id, .. }
            | SyncEvent::Warnings { run_id, .. }
            | SyncEvent::Heartbeat { run_id, .. }
            | SyncEvent::Complete { run_id, .. }
            | SyncEvent::Failed { run_id, .. } => run_id,
        }
    }

    pub fn heartbeat(run_id: impl Into<String>) -> Self {
        SyncEvent::Heartbeat {
            run_id: run_id.into(),
            timestamp: Utc::now(),
        }
    }
}
