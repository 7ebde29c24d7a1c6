//! # Run Registry
//!
//! In-memory handles of runs that have (or recently had) a live worker.
//! The durable record lives in `sync_runs`; this map only answers "is
//! someone already driving run X?" and holds the cancel handle.
//!
//! ```text
//!  register(id) ──► Active{cancel} ──finish(id)──► Finished{at}
//!       │                                              │
//!       └── RunActive if already Active                └── sweep(ttl) drops it
//! ```
//!
//! A background sweeper reclaims finished entries and archives persisted
//! runs that completed before the retention window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use beacon_db::Database;
use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

#[derive(Debug)]
struct RunHandle {
    cancel: CancellationToken,
    started_at: Instant,
    finished_at: Option<Instant>,
}

/// Shared map of run id → live handle. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<String, RunHandle>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `run_id` for a new worker.
    ///
    /// ## Returns
    /// - `Ok(())` if no worker currently drives the run
    /// - `Err(SyncError::RunActive)` otherwise
    pub async fn register(&self, run_id: &str, cancel: CancellationToken) -> SyncResult<()> {
        let mut runs = self.runs.write().await;
        if runs.get(run_id).is_some_and(|h| h.finished_at.is_none()) {
            return Err(SyncError::RunActive(run_id.to_string()));
        }
        runs.insert(
            run_id.to_string(),
            RunHandle {
                cancel,
                started_at: Instant::now(),
                finished_at: None,
            },
        );
        debug!(run_id, "Run registered");
        Ok(())
    }

    /// Marks the worker for `run_id` as gone.
    pub async fn finish(&self, run_id: &str) {
        if let Some(handle) = self.runs.write().await.get_mut(run_id) {
            handle.finished_at = Some(Instant::now());
            debug!(
                run_id,
                elapsed_ms = handle.started_at.elapsed().as_millis() as u64,
                "Run finished"
            );
        }
    }

    /// Fires the cancel handle of an active run. False if none is active.
    pub async fn cancel(&self, run_id: &str) -> bool {
        match self.runs.read().await.get(run_id) {
            Some(handle) if handle.finished_at.is_none() => {
                handle.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub async fn is_active(&self, run_id: &str) -> bool {
        self.runs
            .read()
            .await
            .get(run_id)
            .is_some_and(|h| h.finished_at.is_none())
    }

    pub async fn active_count(&self) -> usize {
        self.runs
            .read()
            .await
            .values()
            .filter(|h| h.finished_at.is_none())
            .count()
    }

    /// Drops entries finished more than `ttl` ago. Returns how many.
    pub async fn sweep(&self, ttl: Duration) -> usize {
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, h| h.finished_at.map_or(true, |at| at.elapsed() < ttl));
        before - runs.len()
    }
}

// =============================================================================
// Maintenance
// =============================================================================

/// Spawns the periodic sweep. Stops when `shutdown` fires.
///
/// Each tick reclaims registry entries older than `retention` and archives
/// runs whose `completed_at` falls before `now - retention`.
pub fn spawn_sweeper(
    registry: RunRegistry,
    db: Database,
    retention: Duration,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let reclaimed = registry.sweep(retention).await;
            let cutoff = Utc::now()
                - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
            match db.sync_runs().archive_completed_before(cutoff).await {
                Ok(archived) if archived > 0 || reclaimed > 0 => {
                    info!(archived, reclaimed, "Retention sweep finished");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Retention sweep failed"),
            }
        }
        debug!("Retention sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{RunOptions, SyncStatus};
    use beacon_db::DbConfig;

    #[tokio::test]
    async fn test_second_register_is_rejected_while_active() {
        let registry = RunRegistry::new();
        registry.register("run-1", CancellationToken::new()).await.unwrap();

        let err = registry
            .register("run-1", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RunActive(id) if id == "run-1"));

        registry.finish("run-1").await;
        registry.register("run-1", CancellationToken::new()).await.unwrap();
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_reaches_worker_token() {
        let registry = RunRegistry::new();
        let token = CancellationToken::new();
        registry.register("run-1", token.clone()).await.unwrap();

        assert!(registry.cancel("run-1").await);
        assert!(token.is_cancelled());
        assert!(!registry.cancel("missing").await);

        registry.finish("run-1").await;
        assert!(!registry.cancel("run-1").await);
        assert!(!registry.is_active("run-1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_only_expired_finished_entries() {
        let registry = RunRegistry::new();
        registry.register("old", CancellationToken::new()).await.unwrap();
        registry.register("live", CancellationToken::new()).await.unwrap();
        registry.finish("old").await;

        tokio::time::advance(Duration::from_secs(30)).await;
        registry.register("fresh", CancellationToken::new()).await.unwrap();
        registry.finish("fresh").await;

        assert_eq!(registry.sweep(Duration::from_secs(10)).await, 1);
        assert!(registry.is_active("live").await);
        // "fresh" finished just now and survives the sweep.
        assert_eq!(registry.sweep(Duration::from_secs(10)).await, 0);
    }

    #[tokio::test]
    async fn test_sweeper_archives_and_stops_on_shutdown() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let runs = db.sync_runs();
        let run = runs.create("owner-1", &RunOptions::default()).await.unwrap();
        runs.update_status(&run.id, SyncStatus::InProgress).await.unwrap();
        runs.update_status(&run.id, SyncStatus::Completed).await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(
            RunRegistry::new(),
            db.clone(),
            Duration::ZERO,
            Duration::from_millis(10),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let archived = runs.get(&run.id).await.unwrap();
        assert!(archived.archived_at.is_some());
    }
}
