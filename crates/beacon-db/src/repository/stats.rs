//! # Statistics Repository
//!
//! Entity counts across the store, independent of any in-flight run.

use beacon_core::Statistics;
use sqlx::{FromRow, SqlitePool};

use crate::error::DbResult;

#[derive(Debug, FromRow)]
struct CountsRow {
    accounts: i64,
    locations: i64,
    reviews: i64,
    posts: i64,
    performance_records: i64,
    search_keywords: i64,
}

/// Repository for aggregate counts.
#[derive(Debug, Clone)]
pub struct StatsRepository {
    pool: SqlitePool,
}

impl StatsRepository {
    /// Creates a new StatsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StatsRepository { pool }
    }

    /// Counts every entity table in one statement.
    pub async fn collect(&self) -> DbResult<Statistics> {
        let row: CountsRow = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM accounts)            AS accounts,
                (SELECT COUNT(*) FROM locations)           AS locations,
                (SELECT COUNT(*) FROM reviews)             AS reviews,
                (SELECT COUNT(*) FROM posts)               AS posts,
                (SELECT COUNT(*) FROM performance_records) AS performance_records,
                (SELECT COUNT(*) FROM search_keywords)     AS search_keywords
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Statistics {
            accounts: row.accounts,
            locations: row.locations,
            reviews: row.reviews,
            posts: row.posts,
            performance_records: row.performance_records,
            search_keywords: row.search_keywords,
        })
    }
}
