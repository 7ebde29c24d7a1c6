//! # Sync Orchestrator
//!
//! Checkpointed traversal of accounts → locations → data types.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   PENDING ──► IN_PROGRESS ──┬──► COMPLETED   (all work done)            │
//! │                  ▲          ├──► FAILED      (top-level error or        │
//! │                  │          │                 error rate exceeded)      │
//! │                  │          └──► PAUSED      (consumer gone / shutdown) │
//! │                  │                  │                                   │
//! │                  └──── resume ──────┘  (FAILED resumes too)             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Traversal
//! ```text
//!  list accounts (paged, retried) ── filter by allow-list ── write
//!     │
//!     └─ per account: list locations (paged, retried) ── write ── total += n × types
//!          │           (failure → ErrorRecord, account skipped)
//!          │
//!          └─ per location (bounded pool), per data type:
//!               checkpointed? ──► skip
//!               fetch page → write page → progress … until no next token
//!               ok     → Checkpoint, completed += 1
//!               failed → ErrorRecord, completed += 1, error-rate check
//! ```
//!
//! Cancellation is cooperative: it is checked between pages and units and
//! interrupts pending API calls, never an in-flight chunk write.

use std::future::Future;
use std::sync::Arc;

use beacon_core::classify::{codes, unsupported_field};
use beacon_core::progress::{BoundedLog, CheckpointLedger, ProgressTracker, UnitTally};
use beacon_core::{
    AccountRecord, Checkpoint, Classify, DataType, EntityPayload, ErrorRecord, LocationRecord,
    Progress, SyncRun, SyncStatus,
};
use beacon_db::{Database, WriteContext};
use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ApiError, ApiResult, BusinessApiClient, PageRequest};
use crate::config::SyncConfig;
use crate::emitter::SyncObserver;
use crate::error::{SyncError, SyncResult};
use crate::retry::retry_classified;
use crate::writer::BatchWriter;

// =============================================================================
// Account Scope
// =============================================================================

/// The caller's account allow-list. Empty allows everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountScope {
    allowed: Vec<String>,
}

impl AccountScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(allowed: Vec<String>) -> Self {
        AccountScope {
            allowed: allowed
                .into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }

    /// Matches `accounts/123` against either `accounts/123` or `123`.
    pub fn allows(&self, account_ref: &str) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        self.allowed.iter().any(|id| {
            account_ref == id
                || account_ref
                    .strip_suffix(id.as_str())
                    .is_some_and(|prefix| prefix.ends_with('/'))
        })
    }
}

// =============================================================================
// Run Context
// =============================================================================

struct RunState {
    tracker: ProgressTracker,
    ledger: CheckpointLedger,
    tally: UnitTally,
    errors: BoundedLog<ErrorRecord>,
}

/// Everything one execution shares across its units.
struct RunContext<'a> {
    run_id: &'a str,
    write_ctx: WriteContext,
    data_types: Vec<DataType>,
    concurrency: usize,
    error_rate_threshold: f64,
    observer: &'a dyn SyncObserver,
    /// Child of the caller's cancel token; also fired by the error-rate cutoff.
    halt: CancellationToken,
    state: Mutex<RunState>,
}

impl<'a> RunContext<'a> {
    fn new(
        run: &'a SyncRun,
        config: &SyncConfig,
        observer: &'a dyn SyncObserver,
        cancel: &CancellationToken,
    ) -> Self {
        let options = config.resolve_options(run.options.clone());

        let mut errors = BoundedLog::new(config.engine.max_errors_retained);
        errors.extend(run.errors.iter().cloned());

        RunContext {
            run_id: &run.id,
            write_ctx: WriteContext::new(run.owner_account_id.clone()),
            concurrency: config.concurrency_for(&options),
            error_rate_threshold: config.error_rate_threshold_for(&options),
            data_types: options.data_types,
            observer,
            halt: cancel.child_token(),
            state: Mutex::new(RunState {
                tracker: ProgressTracker::resume_from(&run.progress),
                ledger: CheckpointLedger::from_checkpoints(&run.checkpoints),
                tally: UnitTally::default(),
                errors,
            }),
        }
    }

    fn ensure_running(&self) -> SyncResult<()> {
        if self.halt.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives one run against one API client.
pub struct SyncOrchestrator {
    db: Database,
    client: Arc<dyn BusinessApiClient>,
    config: Arc<SyncConfig>,
    writer: BatchWriter,
}

impl SyncOrchestrator {
    pub fn new(db: Database, client: Arc<dyn BusinessApiClient>, config: Arc<SyncConfig>) -> Self {
        let writer = BatchWriter::new(
            db.clone(),
            config.engine.write_chunk_size,
            config.retry.db_policy(),
        );
        SyncOrchestrator {
            db,
            client,
            config,
            writer,
        }
    }

    /// Executes (or resumes) `run` to a terminal or paused state.
    ///
    /// ## Returns
    /// The run as persisted afterwards. Unit and top-level failures are
    /// recorded on the run, not returned; `Err` means the run could not be
    /// driven at all (illegal transition, store unavailable).
    pub async fn execute(
        &self,
        run: SyncRun,
        scope: &AccountScope,
        observer: &dyn SyncObserver,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncRun> {
        let runs = self.db.sync_runs();

        if run.status != SyncStatus::InProgress {
            run.status.transition(SyncStatus::InProgress)?;
            runs.update_status(&run.id, SyncStatus::InProgress).await?;
        }

        let ctx = RunContext::new(&run, &self.config, observer, cancel);
        let resumed = !run.checkpoints.is_empty();
        info!(
            run_id = %run.id,
            resumed,
            checkpoints = run.checkpoints.len(),
            data_types = ?ctx.data_types,
            concurrency = ctx.concurrency,
            "Sync run started"
        );

        let message = if resumed {
            format!("Resuming after {} completed units", run.checkpoints.len())
        } else {
            "Sync started".to_string()
        };
        let progress = ctx.state.lock().await.tracker.snapshot();
        observer.on_progress(None, progress, Some(message)).await;

        match self.traverse(&ctx, scope).await {
            Ok(()) => self.complete(&ctx).await?,
            Err(e) if e.is_cancelled() => self.pause(&ctx).await?,
            Err(e) => self.fail(&ctx, e).await,
        }

        Ok(runs.get(&run.id).await?)
    }

    // =========================================================================
    // Terminal Transitions
    // =========================================================================

    async fn complete(&self, ctx: &RunContext<'_>) -> SyncResult<()> {
        SyncStatus::InProgress.transition(SyncStatus::Completed)?;

        let (progress, errors) = {
            let mut state = ctx.state.lock().await;
            (state.tracker.finish(), state.errors.to_vec())
        };

        let runs = self.db.sync_runs();
        runs.update_progress(ctx.run_id, None, &progress).await?;
        runs.update_status(ctx.run_id, SyncStatus::Completed).await?;

        info!(run_id = %ctx.run_id, errors = errors.len(), "Sync run completed");
        ctx.observer.on_complete(progress, &errors).await;
        Ok(())
    }

    async fn pause(&self, ctx: &RunContext<'_>) -> SyncResult<()> {
        SyncStatus::InProgress.transition(SyncStatus::Paused)?;

        let progress = ctx.state.lock().await.tracker.snapshot();
        let runs = self.db.sync_runs();
        runs.update_progress(ctx.run_id, None, &progress).await?;
        runs.update_status(ctx.run_id, SyncStatus::Paused).await?;

        info!(
            run_id = %ctx.run_id,
            completed = progress.completed,
            total = progress.total,
            "Sync run paused"
        );
        Ok(())
    }

    /// Records the top-level failure and emits the terminal event even when
    /// the store itself is what failed.
    async fn fail(&self, ctx: &RunContext<'_>, cause: SyncError) {
        let record = ErrorRecord::new(cause.classification(), cause.to_string(), None);
        error!(run_id = %ctx.run_id, code = %record.code, error = %cause, "Sync run failed");

        let runs = self.db.sync_runs();
        if let Err(e) = runs
            .append_errors(
                ctx.run_id,
                std::slice::from_ref(&record),
                self.config.engine.max_errors_retained,
            )
            .await
        {
            error!(run_id = %ctx.run_id, error = %e, "Failed to record run failure");
        }
        if let Err(e) = runs.update_status(ctx.run_id, SyncStatus::Failed).await {
            error!(run_id = %ctx.run_id, error = %e, "Failed to mark run as failed");
        }

        ctx.observer.on_failed(&record).await;
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    async fn traverse(&self, ctx: &RunContext<'_>, scope: &AccountScope) -> SyncResult<()> {
        let listed: Vec<AccountRecord> = self
            .list_accounts(ctx)
            .await?
            .into_iter()
            .filter(|a| scope.allows(&a.account_ref))
            .collect();
        let accounts = self
            .keyed(ctx, listed, EntityPayload::Account, "account listing")
            .await?;

        info!(run_id = %ctx.run_id, accounts = accounts.len(), "Accounts enumerated");
        if accounts.is_empty() {
            return Ok(());
        }

        let payloads: Vec<EntityPayload> =
            accounts.iter().cloned().map(EntityPayload::Account).collect();
        self.writer.write(&ctx.write_ctx, &payloads).await?;

        for account in &accounts {
            ctx.ensure_running()?;
            self.process_account(ctx, account).await?;
        }
        Ok(())
    }

    async fn process_account(&self, ctx: &RunContext<'_>, account: &AccountRecord) -> SyncResult<()> {
        let account_ref = account.account_ref.as_str();

        let listed = match self.list_locations(ctx, account_ref).await {
            Ok(locations) => locations,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(run_id = %ctx.run_id, account_ref, error = %e, "Location listing failed, skipping account");
                self.record_error(ctx, &e, account_ref).await?;
                return Ok(());
            }
        };

        let locations = self
            .keyed(ctx, listed, EntityPayload::Location, account_ref)
            .await?;
        if locations.is_empty() {
            debug!(run_id = %ctx.run_id, account_ref, "Account has no locations");
            return Ok(());
        }

        let payloads: Vec<EntityPayload> =
            locations.iter().cloned().map(EntityPayload::Location).collect();
        if let Err(e) = self.writer.write(&ctx.write_ctx, &payloads).await {
            warn!(run_id = %ctx.run_id, account_ref, error = %e, "Location write failed, skipping account");
            self.record_error(ctx, &e, account_ref).await?;
            return Ok(());
        }

        let units = (locations.len() * ctx.data_types.len()) as u32;
        let progress = ctx.state.lock().await.tracker.add_units(units);
        self.report_progress(
            ctx,
            None,
            progress,
            format!("{} locations found for {}", locations.len(), account_ref),
        )
        .await?;

        let results: Vec<SyncResult<()>> = stream::iter(locations)
            .map(|location| async move { self.process_location(ctx, &location).await })
            .buffer_unordered(ctx.concurrency)
            .collect()
            .await;

        let mut cancelled = None;
        for result in results {
            match result {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => cancelled = Some(e),
                Err(e) => return Err(e),
            }
        }
        cancelled.map_or(Ok(()), Err)
    }

    /// Keeps the records whose natural key is complete. Each rejected record
    /// becomes an error record against `context` and is skipped.
    async fn keyed<T: Clone>(
        &self,
        ctx: &RunContext<'_>,
        records: Vec<T>,
        wrap: fn(T) -> EntityPayload,
        context: &str,
    ) -> SyncResult<Vec<T>> {
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            match wrap(record.clone()).natural_key() {
                Ok(_) => kept.push(record),
                Err(e) => {
                    warn!(run_id = %ctx.run_id, context, error = %e, "Skipping record without a natural key");
                    self.record_error(ctx, &SyncError::from(e), context).await?;
                }
            }
        }
        Ok(kept)
    }

    async fn process_location(&self, ctx: &RunContext<'_>, location: &LocationRecord) -> SyncResult<()> {
        for &data_type in &ctx.data_types {
            ctx.ensure_running()?;
            self.process_unit(ctx, &location.location_ref, data_type).await?;
        }
        Ok(())
    }

    async fn process_unit(
        &self,
        ctx: &RunContext<'_>,
        location_ref: &str,
        data_type: DataType,
    ) -> SyncResult<()> {
        let already_done = ctx.state.lock().await.ledger.contains(data_type, location_ref);
        if already_done {
            debug!(run_id = %ctx.run_id, location_ref, step = %data_type, "Unit already checkpointed");
            let progress = ctx.state.lock().await.tracker.complete_unit();
            return self
                .report_progress(
                    ctx,
                    Some(data_type),
                    progress,
                    format!("{data_type} already synced for {location_ref}"),
                )
                .await;
        }

        match self.fetch_unit(ctx, location_ref, data_type).await {
            Ok(records) => self.finish_unit(ctx, location_ref, data_type, records).await,
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => self.fail_unit(ctx, location_ref, data_type, e).await,
        }
    }

    /// Pages through one unit, writing each page before fetching the next.
    async fn fetch_unit(
        &self,
        ctx: &RunContext<'_>,
        location_ref: &str,
        data_type: DataType,
    ) -> SyncResult<u32> {
        let label = format!("fetch_{data_type}");
        let mut request = PageRequest::default();
        let mut field_stripped = false;
        let mut records: u32 = 0;

        loop {
            ctx.ensure_running()?;

            let fetched = self
                .call_api(ctx, &label, || {
                    self.client.fetch_page(data_type, location_ref, &request)
                })
                .await;

            let page = match fetched {
                Ok(page) => page,
                Err(SyncError::Api(e)) if !field_stripped => {
                    let Some(field) = unsupported_field(&e.failure_kind()) else {
                        return Err(SyncError::Api(e));
                    };
                    field_stripped = true;
                    self.warn(
                        ctx,
                        format!(
                            "Field '{field}' is not supported for {data_type} at {location_ref}; retrying without it"
                        ),
                    )
                    .await?;
                    request.omit_fields.push(field);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !page.items.is_empty() {
                let summary = self.writer.write(&ctx.write_ctx, &page.items).await?;
                records = records.saturating_add(page.items.len() as u32);

                let progress = ctx.state.lock().await.tracker.snapshot();
                ctx.observer
                    .on_progress(
                        Some(data_type.as_str()),
                        progress,
                        Some(format!(
                            "{} {data_type} written for {location_ref}",
                            summary.written()
                        )),
                    )
                    .await;
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => request.page_token = Some(token),
                _ => break,
            }
        }

        Ok(records)
    }

    async fn finish_unit(
        &self,
        ctx: &RunContext<'_>,
        location_ref: &str,
        data_type: DataType,
        records: u32,
    ) -> SyncResult<()> {
        let checkpoint = Checkpoint::new(data_type, location_ref, records);
        let inserted = self
            .db
            .sync_runs()
            .append_checkpoint(ctx.run_id, &checkpoint)
            .await?;

        let progress = {
            let mut state = ctx.state.lock().await;
            state.ledger.insert(data_type, location_ref);
            state.tally.record(false);
            state.tracker.complete_unit()
        };

        debug!(
            run_id = %ctx.run_id,
            location_ref,
            step = %data_type,
            records,
            percentage = progress.percentage,
            "Unit completed"
        );

        if inserted {
            ctx.observer.on_checkpoint(&checkpoint).await;
        }
        self.report_progress(
            ctx,
            Some(data_type),
            progress,
            format!("{data_type} synced for {location_ref} ({records} records)"),
        )
        .await
    }

    async fn fail_unit(
        &self,
        ctx: &RunContext<'_>,
        location_ref: &str,
        data_type: DataType,
        cause: SyncError,
    ) -> SyncResult<()> {
        let code = cause.classification().code;
        warn!(
            run_id = %ctx.run_id,
            location_ref,
            step = %data_type,
            code,
            error = %cause,
            "Unit failed, skipping"
        );

        if code == codes::API_FORBIDDEN || code == codes::API_NOT_FOUND {
            self.warn(
                ctx,
                format!("{data_type} unavailable for {location_ref} ({code})"),
            )
            .await?;
        }
        self.record_error(ctx, &cause, location_ref).await?;

        let min_units = self.config.engine.error_rate_min_units;
        let (progress, tally) = {
            let mut state = ctx.state.lock().await;
            state.tally.record(true);
            (state.tracker.complete_unit(), state.tally)
        };
        self.report_progress(
            ctx,
            Some(data_type),
            progress,
            format!("{data_type} skipped for {location_ref}"),
        )
        .await?;

        if tally.exceeds(ctx.error_rate_threshold, min_units) {
            ctx.halt.cancel();
            return Err(SyncError::ErrorRateExceeded {
                failed: tally.failed,
                attempted: tally.attempted,
            });
        }
        Ok(())
    }

    // =========================================================================
    // API Calls
    // =========================================================================

    /// Bounded, retried call that gives up as soon as the run is halted.
    async fn call_api<T, F, Fut>(&self, ctx: &RunContext<'_>, label: &str, mut call: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let timeout = self.config.api.timeout();
        let attempt = retry_classified(self.config.retry.api_policy(), label, || {
            let pending = call();
            async move {
                match tokio::time::timeout(timeout, pending).await {
                    Ok(result) => result,
                    Err(_) => Err(ApiError::Timeout),
                }
            }
        });

        tokio::select! {
            biased;
            _ = ctx.halt.cancelled() => Err(SyncError::Cancelled),
            result = attempt => result.map_err(SyncError::from),
        }
    }

    async fn list_accounts(&self, ctx: &RunContext<'_>) -> SyncResult<Vec<AccountRecord>> {
        let mut accounts = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self
                .call_api(ctx, "list_accounts", || {
                    self.client.list_accounts(token.as_deref())
                })
                .await?;
            accounts.extend(page.items);

            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }
        Ok(accounts)
    }

    async fn list_locations(
        &self,
        ctx: &RunContext<'_>,
        account_ref: &str,
    ) -> SyncResult<Vec<LocationRecord>> {
        let mut locations = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self
                .call_api(ctx, "list_locations", || {
                    self.client.list_locations(account_ref, token.as_deref())
                })
                .await?;
            locations.extend(page.items);

            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }
        Ok(locations)
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    async fn report_progress(
        &self,
        ctx: &RunContext<'_>,
        step: Option<DataType>,
        progress: Progress,
        message: String,
    ) -> SyncResult<()> {
        let step = step.map(|s| s.as_str());
        self.db
            .sync_runs()
            .update_progress(ctx.run_id, step, &progress)
            .await?;
        ctx.observer.on_progress(step, progress, Some(message)).await;
        Ok(())
    }

    async fn record_error(&self, ctx: &RunContext<'_>, cause: &SyncError, context: &str) -> SyncResult<()> {
        let record = ErrorRecord::new(
            cause.classification(),
            cause.to_string(),
            Some(context.to_string()),
        );

        self.db
            .sync_runs()
            .append_errors(
                ctx.run_id,
                std::slice::from_ref(&record),
                self.config.engine.max_errors_retained,
            )
            .await?;
        ctx.state.lock().await.errors.push(record.clone());
        ctx.observer.on_errors(std::slice::from_ref(&record)).await;
        Ok(())
    }

    async fn warn(&self, ctx: &RunContext<'_>, message: String) -> SyncResult<()> {
        warn!(run_id = %ctx.run_id, "{}", message);
        self.db
            .sync_runs()
            .append_warnings(
                ctx.run_id,
                std::slice::from_ref(&message),
                self.config.engine.max_warnings_retained,
            )
            .await?;
        ctx.observer.on_warnings(std::slice::from_ref(&message)).await;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
