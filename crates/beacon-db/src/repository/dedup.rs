//! # Dedup Repository
//!
//! Finds duplicate groups and collapses them, one transaction per group.
//!
//! ## Group Resolution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │   1. UPDATE OR IGNORE <dependents> SET owner = winner                   │
//! │      WHERE owner IN (losers)           ← re-point first                 │
//! │   2. DELETE <dependents> WHERE owner IN (losers)                        │
//! │      ← rows that collided with the winner's own natural keys            │
//! │   3. DELETE <entity> WHERE id IN (losers)                               │
//! │   4. UPDATE <entity> SET natural ref = adopted WHERE id = winner        │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Locations are keyed by `location_ref`, which the unique index already
//! keeps distinct. Legacy rows without a ref fall back to the compound key
//! `(store_code, brand_id)`: they group with each other and with at most one
//! ref'd row sharing that key. When two different refs share a compound key
//! the rows are distinct stores and the group is left alone. Every other
//! entity groups by its natural key.

use beacon_core::dedup::{DedupCandidate, DuplicateGroup};
use beacon_core::{DedupReport, EntityKind};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::DbResult;

// =============================================================================
// Group Targets
// =============================================================================

/// How one entity table is grouped and displayed.
struct Target {
    /// SQL expression producing the group key.
    key_expr: &'static str,
    /// Rows with NULL in any of these columns are never grouped.
    key_not_null: &'static str,
    /// Column holding the natural ref a winner may adopt.
    ref_col: Option<&'static str>,
    /// Column used for the placeholder-name tie-break.
    name_col: Option<&'static str>,
    /// Extra `HAVING` condition a group must satisfy.
    having: &'static str,
}

fn target(kind: EntityKind) -> Target {
    match kind {
        EntityKind::Account => Target {
            key_expr: "account_ref",
            key_not_null: "account_ref IS NOT NULL",
            ref_col: None,
            name_col: Some("name"),
            having: "",
        },
        EntityKind::Location => Target {
            key_expr: "store_code || '/' || brand_id",
            key_not_null: "store_code IS NOT NULL AND brand_id IS NOT NULL",
            ref_col: Some("location_ref"),
            name_col: Some("title"),
            having: "AND COUNT(DISTINCT location_ref) <= 1",
        },
        EntityKind::Review => Target {
            key_expr: "review_ref",
            key_not_null: "review_ref IS NOT NULL",
            ref_col: None,
            name_col: None,
            having: "",
        },
        EntityKind::Post => Target {
            key_expr: "post_ref",
            key_not_null: "post_ref IS NOT NULL",
            ref_col: None,
            name_col: None,
            having: "",
        },
        EntityKind::Performance => Target {
            key_expr: "store_ref || '@' || period_start || '..' || period_end",
            key_not_null: "store_ref IS NOT NULL",
            ref_col: None,
            name_col: None,
            having: "",
        },
        EntityKind::SearchKeyword => Target {
            key_expr: "store_ref || '#' || keyword || '@' || year || '-' || month",
            key_not_null: "store_ref IS NOT NULL AND keyword IS NOT NULL",
            ref_col: None,
            name_col: None,
            having: "",
        },
    }
}

/// Tables whose rows point at `kind` through `fk`.
fn dependents(kind: EntityKind) -> &'static [(EntityKind, &'static str)] {
    match kind {
        EntityKind::Account => &[(EntityKind::Location, "account_id")],
        EntityKind::Location => &[
            (EntityKind::Review, "location_id"),
            (EntityKind::Post, "location_id"),
            (EntityKind::Performance, "location_id"),
            (EntityKind::SearchKeyword, "location_id"),
        ],
        _ => &[],
    }
}

#[derive(Debug, FromRow)]
struct GroupRow {
    group_key: String,
    ids: String,
}

#[derive(Debug, FromRow)]
struct CandidateRow {
    id: String,
    natural_ref: Option<String>,
    display_name: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<CandidateRow> for DedupCandidate {
    fn from(row: CandidateRow) -> Self {
        DedupCandidate {
            id: row.id,
            natural_ref: row.natural_ref,
            display_name: row.display_name,
            created_at: row.created_at,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for duplicate detection and removal.
#[derive(Debug, Clone)]
pub struct DedupRepository {
    pool: SqlitePool,
}

impl DedupRepository {
    /// Creates a new DedupRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DedupRepository { pool }
    }

    /// Groups of rows sharing a key, each with at least two members.
    pub async fn find_groups(
        &self,
        kind: EntityKind,
    ) -> DbResult<Vec<(String, Vec<DedupCandidate>)>> {
        let t = target(kind);
        let table = kind.table();

        let sql = format!(
            "SELECT {key} AS group_key, GROUP_CONCAT(id, ',') AS ids \
             FROM {table} WHERE {not_null} \
             GROUP BY group_key HAVING COUNT(*) > 1 {having} ORDER BY group_key",
            key = t.key_expr,
            not_null = t.key_not_null,
            having = t.having,
        );
        let groups: Vec<GroupRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        let mut result = Vec::with_capacity(groups.len());
        for group in groups {
            let ids: Vec<&str> = group.ids.split(',').collect();
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "SELECT id, {ref_col} AS natural_ref, {name_col} AS display_name, created_at \
                 FROM {table} WHERE id IN ({placeholders})",
                ref_col = t.ref_col.unwrap_or("NULL"),
                name_col = t.name_col.unwrap_or("NULL"),
            );

            let mut query = sqlx::query_as::<_, CandidateRow>(&sql);
            for id in &ids {
                query = query.bind(*id);
            }
            let rows = query.fetch_all(&self.pool).await?;

            debug!(entity = %kind, key = %group.group_key, size = rows.len(), "Duplicate group found");
            result.push((
                group.group_key,
                rows.into_iter().map(DedupCandidate::from).collect(),
            ));
        }

        Ok(result)
    }

    /// Collapses one group atomically.
    ///
    /// ## Returns
    /// Removed counts for the entity itself and any dependents that
    /// collided with the winner's records.
    pub async fn apply_group(&self, kind: EntityKind, group: &DuplicateGroup) -> DbResult<DedupReport> {
        let mut report = DedupReport::default();
        let losers = group.loser_ids();
        if losers.is_empty() {
            return Ok(report);
        }

        let effective_ref = group.effective_ref();
        let mut tx = self.pool.begin().await?;

        for (dependent, fk) in dependents(kind) {
            let dropped = repoint(
                &mut tx,
                *dependent,
                fk,
                &group.winner.id,
                &losers,
                if kind == EntityKind::Location {
                    effective_ref.as_deref()
                } else {
                    None
                },
            )
            .await?;
            report.add_removed(dependent.as_str(), dropped);
        }

        let deleted = delete_ids(&mut tx, kind.table(), &losers).await?;
        report.add_removed(kind.as_str(), deleted);

        if let (Some(ref_col), Some(adopted)) = (target(kind).ref_col, group.adopted_ref()) {
            let sql = format!(
                "UPDATE {table} SET {ref_col} = ?1, updated_at = ?2 WHERE id = ?3 AND {ref_col} IS NULL",
                table = kind.table(),
            );
            sqlx::query(&sql)
                .bind(&adopted)
                .bind(Utc::now())
                .bind(&group.winner.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        report.groups = 1;

        info!(
            entity = %kind,
            key = %group.key,
            winner = %group.winner.id,
            removed = report.total_removed(),
            "Duplicate group collapsed"
        );
        Ok(report)
    }
}

/// Moves dependents from losers to the winner, dropping the ones that would
/// collide with records the winner already owns. Returns dropped rows.
async fn repoint(
    conn: &mut SqliteConnection,
    dependent: EntityKind,
    fk: &str,
    winner_id: &str,
    loser_ids: &[String],
    store_ref: Option<&str>,
) -> DbResult<u64> {
    let table = dependent.table();
    // Location children also carry the owner's ref in their natural key.
    let carries_ref = fk == "location_id";
    let (set_ref, first_loser) = if carries_ref {
        (", store_ref = COALESCE(?2, store_ref)", 3)
    } else {
        ("", 2)
    };
    let placeholders = numbered_placeholders(first_loser, loser_ids.len());
    let sql = format!(
        "UPDATE OR IGNORE {table} SET {fk} = ?1{set_ref} WHERE {fk} IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql).bind(winner_id);
    if carries_ref {
        query = query.bind(store_ref);
    }
    for id in loser_ids {
        query = query.bind(id);
    }
    let moved = query.execute(&mut *conn).await?.rows_affected();

    let dropped = delete_where_in(&mut *conn, table, fk, loser_ids).await?;
    if moved > 0 || dropped > 0 {
        debug!(table, moved, dropped, "Dependents re-pointed");
    }
    Ok(dropped)
}

async fn delete_ids(conn: &mut SqliteConnection, table: &str, ids: &[String]) -> DbResult<u64> {
    delete_where_in(conn, table, "id", ids).await
}

async fn delete_where_in(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    values: &[String],
) -> DbResult<u64> {
    let sql = format!(
        "DELETE FROM {table} WHERE {column} IN ({})",
        numbered_placeholders(1, values.len())
    );
    let mut query = sqlx::query(&sql);
    for value in values {
        query = query.bind(value);
    }
    Ok(query.execute(&mut *conn).await?.rows_affected())
}

/// `?start, ?start+1, ...` for `count` parameters.
fn numbered_placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use beacon_core::DedupPolicy;
    use chrono::TimeZone;

    async fn insert_location(
        db: &Database,
        id: &str,
        location_ref: Option<&str>,
        title: &str,
        day: u32,
    ) {
        let created = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        sqlx::query(
            r#"
            INSERT INTO locations (id, location_ref, store_code, brand_id, title, created_at, updated_at)
            VALUES (?1, ?2, 'L1', 'B1', ?3, ?4, ?4)
            "#,
        )
        .bind(id)
        .bind(location_ref)
        .bind(title)
        .bind(created)
        .execute(db.pool())
        .await
        .unwrap();
    }

    async fn insert_review(db: &Database, review_ref: &str, location_id: &str, store_ref: &str) {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO reviews (id, location_id, store_ref, review_ref, create_time, update_time, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5, ?5)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(location_id)
        .bind(store_ref)
        .bind(review_ref)
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap();
    }

    async fn run_pass(db: &Database, policy: &DedupPolicy) -> DedupReport {
        let repo = db.dedup();
        let mut report = DedupReport::default();
        for (key, rows) in repo.find_groups(EntityKind::Location).await.unwrap() {
            if let Some(group) = policy.partition(key, rows) {
                report.merge(repo.apply_group(EntityKind::Location, &group).await.unwrap());
            }
        }
        report
    }

    #[tokio::test]
    async fn test_named_location_survives_and_children_follow() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        insert_location(&db, "loc-a", None, "Acme Diner", 1).await;
        insert_location(&db, "loc-b", Some("locations/2"), "Store accounts/2", 5).await;
        insert_location(&db, "loc-c", None, "Store accounts/3", 9).await;
        insert_review(&db, "reviews/1", "loc-b", "locations/2").await;
        insert_review(&db, "reviews/2", "loc-c", "L1").await;

        let report = run_pass(&db, &DedupPolicy::default()).await;
        assert_eq!(report.groups, 1);
        assert_eq!(report.removed.get("location"), Some(&2));

        let (id, location_ref, title): (String, Option<String>, String) =
            sqlx::query_as("SELECT id, location_ref, title FROM locations")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(id, "loc-a");
        assert_eq!(title, "Acme Diner");
        assert_eq!(location_ref.as_deref(), Some("locations/2"));

        let owners: Vec<(String, String)> =
            sqlx::query_as("SELECT location_id, store_ref FROM reviews ORDER BY review_ref")
                .fetch_all(db.pool())
                .await
                .unwrap();
        assert_eq!(
            owners,
            vec![
                ("loc-a".to_string(), "locations/2".to_string()),
                ("loc-a".to_string(), "locations/2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_pass_removes_nothing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        insert_location(&db, "loc-a", None, "Acme Diner", 1).await;
        insert_location(&db, "loc-b", None, "Acme Diner Downtown", 2).await;

        let first = run_pass(&db, &DedupPolicy::default()).await;
        assert_eq!(first.total_removed(), 1);

        let second = run_pass(&db, &DedupPolicy::default()).await;
        assert_eq!(second.total_removed(), 0);
        assert_eq!(second.groups, 0);
    }

    #[tokio::test]
    async fn test_colliding_dependents_are_dropped() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        insert_location(&db, "loc-a", Some("locations/1"), "Acme", 9).await;
        insert_location(&db, "loc-b", None, "Store accounts/1", 1).await;

        let now = Utc::now();
        for (id, location_id, store_ref) in [
            ("k1", "loc-a", "locations/1"),
            ("k2", "loc-b", "L1/B1"),
            ("k3", "loc-b", "L1/B1-other"),
        ] {
            sqlx::query(
                r#"
                INSERT INTO search_keywords (id, location_id, store_ref, keyword, year, month, impressions, created_at, updated_at)
                VALUES (?1, ?2, ?3, 'pizza', 2024, 1, 10, ?4, ?4)
                "#,
            )
            .bind(id)
            .bind(location_id)
            .bind(store_ref)
            .bind(now)
            .execute(db.pool())
            .await
            .unwrap();
        }

        let report = run_pass(&db, &DedupPolicy::default()).await;
        assert_eq!(report.removed.get("location"), Some(&1));
        // k2 and k3 would both become (locations/1, pizza, 2024, 1), owned by k1.
        assert_eq!(report.removed.get("search_keyword"), Some(&2));

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_keywords")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_distinct_refs_sharing_store_code_stay_apart() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        insert_location(&db, "loc-a", Some("locations/1"), "Acme Diner", 1).await;
        insert_location(&db, "loc-b", Some("locations/2"), "Acme Diner Annex", 2).await;

        assert!(db.dedup().find_groups(EntityKind::Location).await.unwrap().is_empty());

        // A legacy row cannot tell which of the two stores it belongs to.
        insert_location(&db, "loc-c", None, "Store accounts/1", 3).await;
        assert!(db.dedup().find_groups(EntityKind::Location).await.unwrap().is_empty());

        let report = run_pass(&db, &DedupPolicy::default()).await;
        assert_eq!(report.total_removed(), 0);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM locations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 3);
    }
}
