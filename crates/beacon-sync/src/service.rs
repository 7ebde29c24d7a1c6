//! # Sync Service
//!
//! Entry point used by the HTTP layer. Owns no global state: the database,
//! config, client factory, registry, and shutdown token are all handles.
//!
//! ## Start / Resume
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  start(owner, tokens, options)        resume(run_id, tokens)            │
//! │       │                                    │                            │
//! │       │                                    ├─ find        → RunNotFound  │
//! │       │                                    ├─ resumable?  → NotResumable │
//! │       │                                    └─ active?     → RunActive    │
//! │       ▼                                    ▼                            │
//! │  clients.connect(access_token)        clients.connect(access_token)     │
//! │       │                                    │                            │
//! │  sync_runs.create()                        │                            │
//! │       └───────────────┬────────────────────┘                            │
//! │                       ▼                                                 │
//! │  launch: registry.register → ProgressEmitter::channel → tokio::spawn    │
//! │          orchestrator.execute(run, scope, emitter, done)                │
//! │          registry.finish                                                │
//! │                       │                                                 │
//! │                       ▼                                                 │
//! │  RunStream { run_id, events }  ──►  SSE                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use beacon_core::{Classify, DedupReport, ErrorRecord, RunOptions, Statistics, SyncRun};
use beacon_db::Database;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::{BusinessApiClient, ClientFactory};
use crate::config::SyncConfig;
use crate::dedup::Reconciler;
use crate::emitter::{EventStream, ProgressEmitter, SyncObserver};
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{AccountScope, SyncOrchestrator};
use crate::registry::{spawn_sweeper, RunRegistry};

/// Caller credentials for one run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTokens {
    pub access_token: String,
    #[serde(default)]
    pub allowed_account_ids: Vec<String>,
}

impl SyncTokens {
    fn scope(&self) -> AccountScope {
        AccountScope::new(self.allowed_account_ids.clone())
    }
}

/// A launched run and its event stream.
pub struct RunStream {
    pub run_id: String,
    pub events: EventStream,
}

#[derive(Clone)]
pub struct SyncService {
    db: Database,
    config: Arc<SyncConfig>,
    clients: Arc<dyn ClientFactory>,
    registry: RunRegistry,
    shutdown: CancellationToken,
}

impl SyncService {
    pub fn new(
        db: Database,
        config: Arc<SyncConfig>,
        clients: Arc<dyn ClientFactory>,
        shutdown: CancellationToken,
    ) -> Self {
        SyncService {
            db,
            config,
            clients,
            registry: RunRegistry::new(),
            shutdown,
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Creates a run and starts driving it.
    pub async fn start(
        &self,
        owner_account_id: &str,
        tokens: SyncTokens,
        options: RunOptions,
    ) -> SyncResult<RunStream> {
        let client = self.clients.connect(&tokens.access_token)?;
        let run = self.db.sync_runs().create(owner_account_id, &options).await?;

        info!(run_id = %run.id, owner = owner_account_id, "Starting sync run");
        self.launch(run, client, tokens.scope()).await
    }

    /// Continues a paused, failed, or orphaned in-progress run from its
    /// checkpoints.
    pub async fn resume(&self, run_id: &str, tokens: SyncTokens) -> SyncResult<RunStream> {
        let run = self
            .db
            .sync_runs()
            .find(run_id)
            .await?
            .ok_or_else(|| SyncError::RunNotFound(run_id.to_string()))?;

        if self.registry.is_active(run_id).await {
            return Err(SyncError::RunActive(run_id.to_string()));
        }
        if !run.status.is_resumable() {
            return Err(SyncError::NotResumable {
                id: run.id,
                status: run.status,
            });
        }

        let client = self.clients.connect(&tokens.access_token)?;
        info!(
            run_id,
            status = %run.status,
            checkpoints = run.checkpoints.len(),
            "Resuming sync run"
        );
        self.launch(run, client, tokens.scope()).await
    }

    pub async fn get_run(&self, run_id: &str) -> SyncResult<SyncRun> {
        self.db
            .sync_runs()
            .find(run_id)
            .await?
            .ok_or_else(|| SyncError::RunNotFound(run_id.to_string()))
    }

    pub async fn statistics(&self) -> SyncResult<Statistics> {
        Ok(self.db.stats().collect().await?)
    }

    pub async fn dedup(&self) -> SyncResult<DedupReport> {
        Reconciler::new(
            self.db.clone(),
            self.config.dedup.policy(),
            self.config.retry.db_policy(),
        )
        .run()
        .await
    }

    /// Starts the retention sweeper; it stops with the service's shutdown token.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        spawn_sweeper(
            self.registry.clone(),
            self.db.clone(),
            self.config.retention.retention(),
            self.config.retention.sweep_interval(),
            self.shutdown.clone(),
        )
    }

    async fn launch(
        &self,
        run: SyncRun,
        client: Arc<dyn BusinessApiClient>,
        scope: AccountScope,
    ) -> SyncResult<RunStream> {
        let cancel = self.shutdown.child_token();
        self.registry.register(&run.id, cancel.clone()).await?;

        let (emitter, events) = ProgressEmitter::channel(
            run.id.clone(),
            self.config.stream.channel_capacity,
            self.config.stream.heartbeat_interval(),
            &cancel,
        );
        let done = emitter.done_signal();
        let run_id = run.id.clone();

        let orchestrator = SyncOrchestrator::new(self.db.clone(), client, self.config.clone());
        let registry = self.registry.clone();

        tokio::spawn(async move {
            let run_id = run.id.clone();
            if let Err(e) = orchestrator.execute(run, &scope, &emitter, &done).await {
                error!(run_id = %run_id, error = %e, "Sync run could not be driven");
                if !emitter.is_terminated() {
                    let record = ErrorRecord::new(e.classification(), e.to_string(), None);
                    emitter.on_failed(&record).await;
                }
            }
            registry.finish(&run_id).await;
        });

        Ok(RunStream { run_id, events })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{factory, reviews, MockApiClient};
    use beacon_core::{DataType, SyncEvent, SyncStatus};
    use beacon_db::DbConfig;
    use std::time::Duration;

    async fn service_with(client: MockApiClient) -> (SyncService, Arc<MockApiClient>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut config = SyncConfig::default();
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        let client = Arc::new(client);
        let service = SyncService::new(
            db,
            Arc::new(config),
            factory(client.clone()),
            CancellationToken::new(),
        );
        (service, client)
    }

    fn tokens() -> SyncTokens {
        SyncTokens {
            access_token: "token".into(),
            allowed_account_ids: vec![],
        }
    }

    fn reviews_only() -> RunOptions {
        RunOptions {
            data_types: vec![DataType::Reviews],
            ..RunOptions::default()
        }
    }

    async fn wait_until_idle(service: &SyncService) {
        for _ in 0..200 {
            if service.registry().active_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run never finished");
    }

    #[tokio::test]
    async fn test_start_streams_until_complete() {
        let client = MockApiClient::new()
            .with_account("accounts/1")
            .with_location("accounts/1", "locations/A")
            .with_pages(DataType::Reviews, "locations/A", vec![reviews("locations/A", 0..7)]);
        let (service, _) = service_with(client).await;

        let stream = service.start("owner-1", tokens(), reviews_only()).await.unwrap();
        let run_id = stream.run_id.clone();
        let events = stream.events.collect_all().await;

        let last = events.last().unwrap();
        assert!(matches!(last, SyncEvent::Complete { .. }));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.iter().any(|e| matches!(e, SyncEvent::Checkpoint { .. })));

        wait_until_idle(&service).await;
        let run = service.get_run(&run_id).await.unwrap();
        assert_eq!(run.status, SyncStatus::Completed);
        assert_eq!(service.statistics().await.unwrap().reviews, 7);
    }

    #[tokio::test]
    async fn test_resume_rejects_unknown_and_completed_runs() {
        let (service, _) = service_with(MockApiClient::new()).await;

        let err = service.resume("missing", tokens()).await.err().unwrap();
        assert!(matches!(err, SyncError::RunNotFound(_)));

        let stream = service.start("owner-1", tokens(), reviews_only()).await.unwrap();
        let run_id = stream.run_id.clone();
        stream.events.collect_all().await;
        wait_until_idle(&service).await;

        let err = service.resume(&run_id, tokens()).await.err().unwrap();
        assert!(matches!(
            err,
            SyncError::NotResumable {
                status: SyncStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_resume_of_live_pending_run_is_active() {
        let (service, _) = service_with(MockApiClient::new()).await;
        let run = service.db.sync_runs().create("owner-1", &reviews_only()).await.unwrap();
        assert_eq!(run.status, SyncStatus::Pending);
        service
            .registry()
            .register(&run.id, CancellationToken::new())
            .await
            .unwrap();

        let err = service.resume(&run.id, tokens()).await.err().unwrap();
        assert!(matches!(err, SyncError::RunActive(_)));

        service.registry().finish(&run.id).await;
        let err = service.resume(&run.id, tokens()).await.err().unwrap();
        assert!(matches!(err, SyncError::NotResumable { .. }));
    }

    #[tokio::test]
    async fn test_dropped_stream_pauses_run() {
        let mut client = MockApiClient::new().with_account("accounts/1");
        for i in 0..20 {
            let loc = format!("locations/{i}");
            client = client.with_location("accounts/1", &loc).with_pages(
                DataType::Reviews,
                &loc,
                vec![reviews(&loc, 0..50)],
            );
        }
        let (service, _) = service_with(client).await;

        let stream = service.start("owner-1", tokens(), reviews_only()).await.unwrap();
        let run_id = stream.run_id.clone();
        drop(stream.events);

        wait_until_idle(&service).await;
        let run = service.get_run(&run_id).await.unwrap();
        assert_eq!(run.status, SyncStatus::Paused);
        assert!(run.checkpoints.len() < 20);
    }

    #[tokio::test]
    async fn test_dedup_on_empty_store() {
        let (service, _) = service_with(MockApiClient::new()).await;
        let report = service.dedup().await.unwrap();
        assert_eq!(report.groups, 0);
    }
}
