//! # Duplicate Reconciler
//!
//! One pass over every entity kind, parents before children, so a location
//! collapsed early hands its reviews to the winner before reviews are
//! grouped.
//!
//! ```text
//!  for kind in EntityKind::ALL
//!     find_groups(kind)          (retried)
//!        └─ policy.partition()   → winner + losers, or skip
//!              └─ apply_group()  (retried, one tx per group)
//!                    └─ report.merge()
//! ```
//!
//! Running it twice in a row removes nothing the second time.

use beacon_core::{DedupPolicy, DedupReport, EntityKind, RetryPolicy};
use beacon_db::Database;
use tracing::{debug, info};

use crate::error::SyncResult;
use crate::retry::retry_classified;

#[derive(Debug, Clone)]
pub struct Reconciler {
    db: Database,
    policy: DedupPolicy,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(db: Database, policy: DedupPolicy, retry: RetryPolicy) -> Self {
        Reconciler { db, policy, retry }
    }

    /// Collapses every duplicate group in the store.
    pub async fn run(&self) -> SyncResult<DedupReport> {
        let mut report = DedupReport::default();
        for kind in EntityKind::ALL {
            report.merge(self.reconcile(kind).await?);
        }

        info!(
            groups = report.groups,
            removed = report.total_removed(),
            "Deduplication pass finished"
        );
        Ok(report)
    }

    async fn reconcile(&self, kind: EntityKind) -> SyncResult<DedupReport> {
        let repo = self.db.dedup();
        let groups = retry_classified(self.retry, "find_groups", || repo.find_groups(kind)).await?;

        let mut report = DedupReport::default();
        if groups.is_empty() {
            return Ok(report);
        }
        debug!(entity = %kind, groups = groups.len(), "Reconciling duplicates");

        for (key, rows) in groups {
            let Some(group) = self.policy.partition(key, rows) else {
                continue;
            };
            let applied =
                retry_classified(self.retry, "apply_group", || repo.apply_group(kind, &group)).await?;
            report.merge(applied);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{location, reviews};
    use crate::writer::BatchWriter;
    use beacon_core::{AccountRecord, EntityPayload};
    use beacon_db::{DbConfig, WriteContext};
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default().with_delays(Duration::from_millis(1), Duration::from_millis(2))
    }

    /// One synced store plus a legacy copy of it (no ref, placeholder title)
    /// that still owns two reviews.
    async fn seeded_duplicates() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let writer = BatchWriter::new(db.clone(), 50, fast_retry());
        let ctx = WriteContext::new("owner-1");

        let mut named = location("accounts/1", "locations/1");
        named.title = "Acme Diner".into();
        named.store_code = Some("S-01".into());
        named.brand_id = Some("acme".into());

        let mut items = vec![
            EntityPayload::Account(AccountRecord {
                account_ref: "accounts/1".into(),
                name: "Acme".into(),
                account_type: None,
            }),
            EntityPayload::Location(named),
        ];
        items.extend(reviews("locations/1", 0..3));
        writer.write(&ctx, &items).await.unwrap();

        let now = chrono::Utc::now();
        sqlx::query(
            r#"
            INSERT INTO locations (id, location_ref, store_code, brand_id, title, created_at, updated_at)
            VALUES ('legacy-1', NULL, 'S-01', 'acme', 'Store accounts/1', ?1, ?1)
            "#,
        )
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap();
        for n in 0..2 {
            sqlx::query(
                r#"
                INSERT INTO reviews (id, location_id, store_ref, review_ref, create_time, update_time, created_at, updated_at)
                VALUES (?1, 'legacy-1', 'S-01', ?2, ?3, ?3, ?3, ?3)
                "#,
            )
            .bind(format!("legacy-review-{n}"))
            .bind(format!("legacy/reviews/{n}"))
            .bind(now)
            .execute(db.pool())
            .await
            .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_duplicate_locations_collapse_to_named_record() {
        let db = seeded_duplicates().await;
        let reconciler = Reconciler::new(db.clone(), DedupPolicy::default(), fast_retry());

        let report = reconciler.run().await.unwrap();

        assert_eq!(report.removed.get("location"), Some(&1));
        let title: String = sqlx::query_scalar("SELECT title FROM locations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(title, "Acme Diner");

        // Every review now belongs to the surviving location.
        let owners: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT location_id) FROM reviews")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(owners, 1);
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let db = seeded_duplicates().await;
        let reconciler = Reconciler::new(db.clone(), DedupPolicy::default(), fast_retry());

        reconciler.run().await.unwrap();
        let before = db.stats().collect().await.unwrap();
        let second = reconciler.run().await.unwrap();

        assert_eq!(second.groups, 0);
        assert_eq!(second.total_removed(), 0);
        assert_eq!(db.stats().collect().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_clean_store_reports_nothing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let reconciler = Reconciler::new(db, DedupPolicy::default(), fast_retry());

        let report = reconciler.run().await.unwrap();
        assert_eq!(report, DedupReport::default());
    }
}
