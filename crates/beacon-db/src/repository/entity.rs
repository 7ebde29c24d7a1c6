//! # Entity Repository
//!
//! Natural-key upserts for the six external entity tables.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  upsert_chunk(ctx, [item; ≤ chunk size])                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN                                                                  │
//! │   for item:                                                             │
//! │     SELECT id WHERE <natural key>      → existed?                       │
//! │     INSERT ... ON CONFLICT(<natural key>) DO UPDATE SET <mutable cols>  │
//! │  COMMIT                                                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  UpsertCounts { inserted, updated }                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Owner references arrive as natural refs and are resolved in SQL:
//! `account_ref → accounts.id`, `store_ref → locations.id`.

use beacon_core::{EntityKind, EntityPayload};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};

/// Who the write is performed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteContext {
    pub owner_account_id: String,
}

impl WriteContext {
    pub fn new(owner_account_id: impl Into<String>) -> Self {
        Self {
            owner_account_id: owner_account_id.into(),
        }
    }
}

/// Insert/update tally of one write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub updated: u64,
}

impl UpsertCounts {
    fn record(&mut self, inserted: bool) {
        if inserted {
            self.inserted += 1;
        } else {
            self.updated += 1;
        }
    }
}

/// Repository for external entity writes.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    pool: SqlitePool,
}

impl EntityRepository {
    /// Creates a new EntityRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EntityRepository { pool }
    }

    /// Upserts a chunk in a single transaction.
    ///
    /// Either every record of the chunk is written or none is.
    pub async fn upsert_chunk(
        &self,
        ctx: &WriteContext,
        items: &[EntityPayload],
    ) -> DbResult<UpsertCounts> {
        let now = Utc::now();
        let mut counts = UpsertCounts::default();

        let mut tx = self.pool.begin().await?;
        for item in items {
            let inserted = upsert_one(&mut tx, ctx, item, now).await?;
            counts.record(inserted);
        }
        tx.commit().await?;

        debug!(
            records = items.len(),
            inserted = counts.inserted,
            updated = counts.updated,
            "Chunk upserted"
        );
        Ok(counts)
    }

    /// Writes one record on its own, outside any chunk transaction.
    ///
    /// Used after a chunk hit a duplicate-key race: the record already
    /// exists, so this lands as an update by natural key.
    ///
    /// ## Returns
    /// `true` if the record was inserted, `false` if it was updated.
    pub async fn upsert_single(&self, ctx: &WriteContext, item: &EntityPayload) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        upsert_one(&mut conn, ctx, item, Utc::now()).await
    }

    /// Updates the mutable columns of the row stored under the item's
    /// natural key, without inserting.
    ///
    /// ## Returns
    /// `true` if a row was updated, `false` if no row carries that key.
    pub async fn update_by_key(&self, item: &EntityPayload) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        update_one(&mut conn, item, Utc::now()).await
    }

    /// Surrogate id of the stored record with the item's natural key.
    pub async fn find_id(&self, item: &EntityPayload) -> DbResult<Option<String>> {
        let mut conn = self.pool.acquire().await?;
        existing_id(&mut conn, item).await
    }

    /// Row count of one entity table.
    pub async fn count(&self, kind: EntityKind) -> DbResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }
}

// =============================================================================
// Statements
// =============================================================================

async fn existing_id(conn: &mut SqliteConnection, item: &EntityPayload) -> DbResult<Option<String>> {
    let id: Option<String> = match item {
        EntityPayload::Account(a) => {
            sqlx::query_scalar("SELECT id FROM accounts WHERE account_ref = ?1")
                .bind(&a.account_ref)
                .fetch_optional(&mut *conn)
                .await?
        }
        EntityPayload::Location(l) => {
            sqlx::query_scalar("SELECT id FROM locations WHERE location_ref = ?1")
                .bind(&l.location_ref)
                .fetch_optional(&mut *conn)
                .await?
        }
        EntityPayload::Review(r) => {
            sqlx::query_scalar("SELECT id FROM reviews WHERE review_ref = ?1")
                .bind(&r.review_ref)
                .fetch_optional(&mut *conn)
                .await?
        }
        EntityPayload::Post(p) => {
            sqlx::query_scalar("SELECT id FROM posts WHERE post_ref = ?1")
                .bind(&p.post_ref)
                .fetch_optional(&mut *conn)
                .await?
        }
        EntityPayload::Performance(p) => {
            sqlx::query_scalar(
                r#"
                SELECT id FROM performance_records
                WHERE store_ref = ?1 AND period_start = ?2 AND period_end = ?3
                "#,
            )
            .bind(&p.store_ref)
            .bind(p.period_start)
            .bind(p.period_end)
            .fetch_optional(&mut *conn)
            .await?
        }
        EntityPayload::SearchKeyword(k) => {
            sqlx::query_scalar(
                r#"
                SELECT id FROM search_keywords
                WHERE store_ref = ?1 AND keyword = ?2 AND year = ?3 AND month = ?4
                "#,
            )
            .bind(&k.store_ref)
            .bind(&k.keyword)
            .bind(k.year)
            .bind(i64::from(k.month))
            .fetch_optional(&mut *conn)
            .await?
        }
    };
    Ok(id)
}

/// Plain UPDATE by natural key; returns whether a row matched.
async fn update_one(
    conn: &mut SqliteConnection,
    item: &EntityPayload,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let result = match item {
        EntityPayload::Account(a) => {
            sqlx::query(
                r#"
                UPDATE accounts SET
                    name = ?2,
                    account_type = COALESCE(?3, account_type),
                    updated_at = ?4
                WHERE account_ref = ?1
                "#,
            )
            .bind(&a.account_ref)
            .bind(&a.name)
            .bind(&a.account_type)
            .bind(now)
            .execute(&mut *conn)
            .await?
        }
        EntityPayload::Location(l) => {
            sqlx::query(
                r#"
                UPDATE locations SET
                    store_code = COALESCE(?2, store_code),
                    brand_id = COALESCE(?3, brand_id),
                    title = ?4,
                    address = COALESCE(?5, address),
                    phone = COALESCE(?6, phone),
                    updated_at = ?7
                WHERE location_ref = ?1
                "#,
            )
            .bind(&l.location_ref)
            .bind(&l.store_code)
            .bind(&l.brand_id)
            .bind(&l.title)
            .bind(&l.address)
            .bind(&l.phone)
            .bind(now)
            .execute(&mut *conn)
            .await?
        }
        EntityPayload::Review(r) => {
            sqlx::query(
                r#"
                UPDATE reviews SET
                    reviewer_name = COALESCE(?2, reviewer_name),
                    star_rating = ?3,
                    comment = ?4,
                    reply_comment = ?5,
                    update_time = ?6,
                    updated_at = ?7
                WHERE review_ref = ?1
                "#,
            )
            .bind(&r.review_ref)
            .bind(&r.reviewer_name)
            .bind(r.star_rating)
            .bind(&r.comment)
            .bind(&r.reply_comment)
            .bind(r.update_time)
            .bind(now)
            .execute(&mut *conn)
            .await?
        }
        EntityPayload::Post(p) => {
            sqlx::query(
                r#"
                UPDATE posts SET
                    topic_type = COALESCE(?2, topic_type),
                    summary = ?3,
                    state = ?4,
                    update_time = ?5,
                    updated_at = ?6
                WHERE post_ref = ?1
                "#,
            )
            .bind(&p.post_ref)
            .bind(&p.topic_type)
            .bind(&p.summary)
            .bind(&p.state)
            .bind(p.update_time)
            .bind(now)
            .execute(&mut *conn)
            .await?
        }
        EntityPayload::Performance(p) => {
            let metrics = serde_json::to_string(&p.metrics).map_err(|e| DbError::Decode {
                column: "performance_records.metrics".to_string(),
                message: e.to_string(),
            })?;
            sqlx::query(
                r#"
                UPDATE performance_records SET
                    metrics = ?4,
                    updated_at = ?5
                WHERE store_ref = ?1 AND period_start = ?2 AND period_end = ?3
                "#,
            )
            .bind(&p.store_ref)
            .bind(p.period_start)
            .bind(p.period_end)
            .bind(&metrics)
            .bind(now)
            .execute(&mut *conn)
            .await?
        }
        EntityPayload::SearchKeyword(k) => {
            sqlx::query(
                r#"
                UPDATE search_keywords SET
                    impressions = ?5,
                    threshold = ?6,
                    updated_at = ?7
                WHERE store_ref = ?1 AND keyword = ?2 AND year = ?3 AND month = ?4
                "#,
            )
            .bind(&k.store_ref)
            .bind(&k.keyword)
            .bind(k.year)
            .bind(i64::from(k.month))
            .bind(k.impressions)
            .bind(k.threshold)
            .bind(now)
            .execute(&mut *conn)
            .await?
        }
    };

    Ok(result.rows_affected() > 0)
}

/// Upserts one record; returns whether it was newly inserted.
async fn upsert_one(
    conn: &mut SqliteConnection,
    ctx: &WriteContext,
    item: &EntityPayload,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let existed = existing_id(&mut *conn, item).await?.is_some();
    let id = Uuid::new_v4().to_string();

    match item {
        EntityPayload::Account(a) => {
            sqlx::query(
                r#"
                INSERT INTO accounts (
                    id, owner_account_id, account_ref, name, account_type, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                ON CONFLICT(account_ref) DO UPDATE SET
                    owner_account_id = excluded.owner_account_id,
                    name = excluded.name,
                    account_type = COALESCE(excluded.account_type, accounts.account_type),
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&id)
            .bind(&ctx.owner_account_id)
            .bind(&a.account_ref)
            .bind(&a.name)
            .bind(&a.account_type)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }
        EntityPayload::Location(l) => {
            sqlx::query(
                r#"
                INSERT INTO locations (
                    id, account_id, location_ref, store_code, brand_id,
                    title, address, phone, created_at, updated_at
                ) VALUES (
                    ?1, (SELECT id FROM accounts WHERE account_ref = ?2), ?3, ?4, ?5,
                    ?6, ?7, ?8, ?9, ?9
                )
                ON CONFLICT(location_ref) DO UPDATE SET
                    account_id = COALESCE(excluded.account_id, locations.account_id),
                    store_code = COALESCE(excluded.store_code, locations.store_code),
                    brand_id = COALESCE(excluded.brand_id, locations.brand_id),
                    title = excluded.title,
                    address = COALESCE(excluded.address, locations.address),
                    phone = COALESCE(excluded.phone, locations.phone),
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&id)
            .bind(&l.account_ref)
            .bind(&l.location_ref)
            .bind(&l.store_code)
            .bind(&l.brand_id)
            .bind(&l.title)
            .bind(&l.address)
            .bind(&l.phone)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }
        EntityPayload::Review(r) => {
            sqlx::query(
                r#"
                INSERT INTO reviews (
                    id, location_id, store_ref, review_ref, reviewer_name, star_rating,
                    comment, reply_comment, create_time, update_time, created_at, updated_at
                ) VALUES (
                    ?1, (SELECT id FROM locations WHERE location_ref = ?2), ?2, ?3, ?4, ?5,
                    ?6, ?7, ?8, ?9, ?10, ?10
                )
                ON CONFLICT(review_ref) DO UPDATE SET
                    location_id = COALESCE(excluded.location_id, reviews.location_id),
                    reviewer_name = COALESCE(excluded.reviewer_name, reviews.reviewer_name),
                    star_rating = excluded.star_rating,
                    comment = excluded.comment,
                    reply_comment = excluded.reply_comment,
                    update_time = excluded.update_time,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&id)
            .bind(&r.store_ref)
            .bind(&r.review_ref)
            .bind(&r.reviewer_name)
            .bind(r.star_rating)
            .bind(&r.comment)
            .bind(&r.reply_comment)
            .bind(r.create_time)
            .bind(r.update_time)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }
        EntityPayload::Post(p) => {
            sqlx::query(
                r#"
                INSERT INTO posts (
                    id, location_id, store_ref, post_ref, topic_type, summary, state,
                    create_time, update_time, created_at, updated_at
                ) VALUES (
                    ?1, (SELECT id FROM locations WHERE location_ref = ?2), ?2, ?3, ?4, ?5, ?6,
                    ?7, ?8, ?9, ?9
                )
                ON CONFLICT(post_ref) DO UPDATE SET
                    location_id = COALESCE(excluded.location_id, posts.location_id),
                    topic_type = COALESCE(excluded.topic_type, posts.topic_type),
                    summary = excluded.summary,
                    state = excluded.state,
                    update_time = excluded.update_time,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&id)
            .bind(&p.store_ref)
            .bind(&p.post_ref)
            .bind(&p.topic_type)
            .bind(&p.summary)
            .bind(&p.state)
            .bind(p.create_time)
            .bind(p.update_time)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }
        EntityPayload::Performance(p) => {
            let metrics = serde_json::to_string(&p.metrics).map_err(|e| DbError::Decode {
                column: "performance_records.metrics".to_string(),
                message: e.to_string(),
            })?;
            sqlx::query(
                r#"
                INSERT INTO performance_records (
                    id, location_id, store_ref, period_start, period_end, metrics,
                    created_at, updated_at
                ) VALUES (
                    ?1, (SELECT id FROM locations WHERE location_ref = ?2), ?2, ?3, ?4, ?5,
                    ?6, ?6
                )
                ON CONFLICT(store_ref, period_start, period_end) DO UPDATE SET
                    location_id = COALESCE(excluded.location_id, performance_records.location_id),
                    metrics = excluded.metrics,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&id)
            .bind(&p.store_ref)
            .bind(p.period_start)
            .bind(p.period_end)
            .bind(&metrics)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }
        EntityPayload::SearchKeyword(k) => {
            sqlx::query(
                r#"
                INSERT INTO search_keywords (
                    id, location_id, store_ref, keyword, year, month,
                    impressions, threshold, created_at, updated_at
                ) VALUES (
                    ?1, (SELECT id FROM locations WHERE location_ref = ?2), ?2, ?3, ?4, ?5,
                    ?6, ?7, ?8, ?8
                )
                ON CONFLICT(store_ref, keyword, year, month) DO UPDATE SET
                    location_id = COALESCE(excluded.location_id, search_keywords.location_id),
                    impressions = excluded.impressions,
                    threshold = excluded.threshold,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&id)
            .bind(&k.store_ref)
            .bind(&k.keyword)
            .bind(k.year)
            .bind(i64::from(k.month))
            .bind(k.impressions)
            .bind(k.threshold)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }
    }

    Ok(!existed)
}

// =============================================================================
// Unit Tests
// =============================================================================
