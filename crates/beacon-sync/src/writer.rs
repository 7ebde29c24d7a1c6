//! # Batch Writer
//!
//! The only path by which fetched records reach the store.
//!
//! ## Write Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  write(ctx, items)                                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  natural_key() for every item ──► missing field? ──► Err(Validation)    │
//! │       │                                        (nothing written)        │
//! │       ▼                                                                 │
//! │  chunks of write_chunk_size                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  upsert_chunk (one tx) wrapped in retry_classified(db policy)           │
//! │       │                                                                 │
//! │       ├── Ok ─────────────────────────────► tally inserted / updated    │
//! │       └── DuplicateKey ──► per record: upsert, else update by key       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use beacon_core::{EntityPayload, RetryPolicy};
use beacon_db::{Database, DbError, UpsertCounts, WriteContext};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::retry::retry_classified;

/// Outcome of one `write` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteSummary {
    pub inserted: u64,
    pub updated: u64,
    pub chunks: u32,
}

impl WriteSummary {
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }

    fn absorb(&mut self, counts: UpsertCounts) {
        self.inserted += counts.inserted;
        self.updated += counts.updated;
        self.chunks += 1;
    }
}

/// Chunked, retried, idempotent writer.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    db: Database,
    chunk_size: usize,
    policy: RetryPolicy,
}

impl BatchWriter {
    pub fn new(db: Database, chunk_size: usize, policy: RetryPolicy) -> Self {
        BatchWriter {
            db,
            chunk_size: chunk_size.max(1),
            policy,
        }
    }

    /// Upserts `items` by natural key.
    ///
    /// ## Returns
    /// - `Ok(WriteSummary)` once every chunk has committed
    /// - `Err(SyncError::Core)` if any item cannot be keyed (nothing is written)
    /// - `Err(SyncError::Database)` if a chunk still fails after retries
    pub async fn write(&self, ctx: &WriteContext, items: &[EntityPayload]) -> SyncResult<WriteSummary> {
        for item in items {
            item.natural_key()?;
        }

        let repo = self.db.entities();
        let mut summary = WriteSummary::default();

        for chunk in items.chunks(self.chunk_size) {
            let attempt = retry_classified(self.policy, "upsert_chunk", || repo.upsert_chunk(ctx, chunk)).await;

            let counts = match attempt {
                Ok(counts) => counts,
                Err(e) if e.is_unique_violation() => {
                    warn!(error = %e, size = chunk.len(), "Duplicate key in chunk, writing records one by one");
                    self.write_individually(ctx, chunk).await?
                }
                Err(e) => return Err(e.into()),
            };
            summary.absorb(counts);
        }

        debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            chunks = summary.chunks,
            "Batch written"
        );
        Ok(summary)
    }

    /// Per-record fallback after a chunk hit a duplicate key.
    ///
    /// A record that still collides is written as a plain update under its
    /// natural key. If no row carries that key the collision came from some
    /// other unique index: the record is not stored and the first such
    /// error is returned once the rest of the chunk has been written.
    async fn write_individually(
        &self,
        ctx: &WriteContext,
        chunk: &[EntityPayload],
    ) -> Result<UpsertCounts, DbError> {
        let repo = self.db.entities();
        let mut counts = UpsertCounts::default();
        let mut first_failure = None;

        for item in chunk {
            let outcome =
                match retry_classified(self.policy, "upsert_single", || repo.upsert_single(ctx, item))
                    .await
                {
                    Err(e) if e.is_unique_violation() => {
                        match retry_classified(self.policy, "update_by_key", || repo.update_by_key(item))
                            .await
                        {
                            Ok(true) => Ok(false),
                            Ok(false) => Err(e),
                            Err(update_err) => Err(update_err),
                        }
                    }
                    other => other,
                };

            match outcome {
                Ok(true) => counts.inserted += 1,
                Ok(false) => counts.updated += 1,
                Err(e) => {
                    warn!(kind = %item.kind(), error = %e, "Record could not be written");
                    first_failure.get_or_insert(e);
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(counts),
        }
    }
}
