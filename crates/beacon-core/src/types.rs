//! # Domain Types
//!
//! Core domain types used throughout Beacon.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    SyncRun      │   │   Checkpoint    │   │  ErrorRecord    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  step           │   │  code           │       │
//! │  │  status         │   │  location_ref   │   │  category       │       │
//! │  │  progress       │   │  records        │   │  severity       │       │
//! │  │  checkpoints[]  │   │  timestamp      │   │  retryable      │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  External entities (upserted by natural key):                           │
//! │  Account ─► Location ─┬─► Review                                        │
//! │                       ├─► Post                                          │
//! │                       ├─► PerformanceRecord                             │
//! │                       └─► SearchKeyword                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every stored entity has:
//! - `id`: UUID v4 - immutable surrogate, used for database relations
//! - Natural key: the identity assigned by the external API
//!   (`review_ref`, `(store_ref, keyword, year, month)`, ...)
//!
//! Writes are always keyed by the natural key, never by the surrogate.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::classify::{Classification, ErrorCategory, Severity};
use crate::error::{CoreError, CoreResult};
use crate::validation::{require, validate_month, validate_period};

// =============================================================================
// Sync Status
// =============================================================================

/// Lifecycle of a sync run.
///
/// ```text
///   Pending ──► InProgress ──┬──► Completed
///                  ▲         ├──► Failed ──┐
///                  │         └──► Paused   │
///                  └──────────────┴────────┘  (explicit resume)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl SyncStatus {
    /// Stable lowercase name, matching the serialized form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Paused => "paused",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    /// Whether the run has stopped making progress for good.
    ///
    /// Failed is terminal for a stream but can still be resumed explicitly.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed)
    }

    /// Whether a run in this state may be picked up again by a resume call.
    pub const fn is_resumable(&self) -> bool {
        matches!(
            self,
            SyncStatus::Paused | SyncStatus::Failed | SyncStatus::InProgress
        )
    }

    /// Checks a transition without performing it.
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Paused)
                | (Paused, InProgress)
                | (Failed, InProgress)
        )
    }

    /// Validates and returns the next state.
    ///
    /// ## Example
    /// ```rust
    /// use beacon_core::SyncStatus;
    ///
    /// let next = SyncStatus::Pending.transition(SyncStatus::InProgress).unwrap();
    /// assert_eq!(next, SyncStatus::InProgress);
    /// assert!(SyncStatus::Completed.transition(SyncStatus::InProgress).is_err());
    /// ```
    pub fn transition(self, next: SyncStatus) -> CoreResult<SyncStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus::Pending
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "in_progress" => Ok(SyncStatus::InProgress),
            "paused" => Ok(SyncStatus::Paused),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Data Type (sync step)
// =============================================================================

/// Per-location data families, fetched in this fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Reviews,
    Posts,
    Performance,
    Keywords,
}

impl DataType {
    /// All data types in traversal order.
    pub const ALL: [DataType; 4] = [
        DataType::Reviews,
        DataType::Posts,
        DataType::Performance,
        DataType::Keywords,
    ];

    /// Step name used in checkpoints and progress events.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataType::Reviews => "reviews",
            DataType::Posts => "posts",
            DataType::Performance => "performance",
            DataType::Keywords => "keywords",
        }
    }

    /// Entity kind written for this step.
    pub const fn entity_kind(&self) -> EntityKind {
        match self {
            DataType::Reviews => EntityKind::Review,
            DataType::Posts => EntityKind::Post,
            DataType::Performance => EntityKind::Performance,
            DataType::Keywords => EntityKind::SearchKeyword,
        }
    }

    /// Returns the requested subset in traversal order, deduplicated.
    ///
    /// An empty request means "everything".
    pub fn ordered(requested: &[DataType]) -> Vec<DataType> {
        if requested.is_empty() {
            return DataType::ALL.to_vec();
        }
        DataType::ALL
            .into_iter()
            .filter(|dt| requested.contains(dt))
            .collect()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reviews" => Ok(DataType::Reviews),
            "posts" => Ok(DataType::Posts),
            "performance" => Ok(DataType::Performance),
            "keywords" => Ok(DataType::Keywords),
            other => Err(CoreError::UnknownDataType(other.to_string())),
        }
    }
}

// =============================================================================
// Entity Kind
// =============================================================================

/// The six external entity families persisted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Account,
    Location,
    Review,
    Post,
    Performance,
    SearchKeyword,
}

impl EntityKind {
    /// Parents before children.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Account,
        EntityKind::Location,
        EntityKind::Review,
        EntityKind::Post,
        EntityKind::Performance,
        EntityKind::SearchKeyword,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Account => "account",
            EntityKind::Location => "location",
            EntityKind::Review => "review",
            EntityKind::Post => "post",
            EntityKind::Performance => "performance",
            EntityKind::SearchKeyword => "search_keyword",
        }
    }

    /// Backing table name.
    pub const fn table(&self) -> &'static str {
        match self {
            EntityKind::Account => "accounts",
            EntityKind::Location => "locations",
            EntityKind::Review => "reviews",
            EntityKind::Post => "posts",
            EntityKind::Performance => "performance_records",
            EntityKind::SearchKeyword => "search_keywords",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// External Records
// =============================================================================
// Shapes returned by the external API client. Owner references are carried
// as natural refs (`account_ref`, `store_ref`); the store resolves them to
// surrogate ids at write time.

/// A business account visible to the access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub account_ref: String,
    pub name: String,
    #[serde(default)]
    pub account_type: Option<String>,
}

/// A physical location (store) under an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub location_ref: String,
    pub account_ref: String,
    pub title: String,
    #[serde(default)]
    pub store_code: Option<String>,
    #[serde(default)]
    pub brand_id: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// A customer review for a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub review_ref: String,
    pub store_ref: String,
    #[serde(default)]
    pub reviewer_name: Option<String>,
    #[serde(default)]
    pub star_rating: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub reply_comment: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// A local post published on a location's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub post_ref: String,
    pub store_ref: String,
    #[serde(default)]
    pub topic_type: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// Daily metric totals for a location over a closed date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    pub store_ref: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    #[serde(default)]
    pub metrics: BTreeMap<String, i64>,
}

/// Monthly search-keyword impressions for a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchKeywordRecord {
    pub store_ref: String,
    pub keyword: String,
    pub year: i32,
    pub month: u32,
    #[serde(default)]
    pub impressions: Option<i64>,
    /// Set when the API only reports "fewer than N" impressions.
    #[serde(default)]
    pub threshold: Option<i64>,
}

/// Any record the batch writer accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityPayload {
    Account(AccountRecord),
    Location(LocationRecord),
    Review(ReviewRecord),
    Post(PostRecord),
    Performance(PerformanceRecord),
    SearchKeyword(SearchKeywordRecord),
}

impl EntityPayload {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityPayload::Account(_) => EntityKind::Account,
            EntityPayload::Location(_) => EntityKind::Location,
            EntityPayload::Review(_) => EntityKind::Review,
            EntityPayload::Post(_) => EntityKind::Post,
            EntityPayload::Performance(_) => EntityKind::Performance,
            EntityPayload::SearchKeyword(_) => EntityKind::SearchKeyword,
        }
    }

    /// Derives the natural key, rejecting records that cannot be keyed.
    ///
    /// ## Returns
    /// - `Ok(NaturalKey)` when every key field is present
    /// - `Err(CoreError::Validation)` otherwise
    pub fn natural_key(&self) -> CoreResult<NaturalKey> {
        let key = match self {
            EntityPayload::Account(a) => {
                NaturalKey::Account(require("accountRef", &a.account_ref)?.to_string())
            }
            EntityPayload::Location(l) => {
                require("accountRef", &l.account_ref)?;
                NaturalKey::Location(require("locationRef", &l.location_ref)?.to_string())
            }
            EntityPayload::Review(r) => {
                require("storeRef", &r.store_ref)?;
                NaturalKey::Review(require("reviewRef", &r.review_ref)?.to_string())
            }
            EntityPayload::Post(p) => {
                require("storeRef", &p.store_ref)?;
                NaturalKey::Post(require("postRef", &p.post_ref)?.to_string())
            }
            EntityPayload::Performance(p) => {
                validate_period(p.period_start, p.period_end)?;
                NaturalKey::Performance {
                    store_ref: require("storeRef", &p.store_ref)?.to_string(),
                    period_start: p.period_start,
                    period_end: p.period_end,
                }
            }
            EntityPayload::SearchKeyword(k) => {
                validate_month(k.month)?;
                NaturalKey::SearchKeyword {
                    store_ref: require("storeRef", &k.store_ref)?.to_string(),
                    keyword: require("keyword", &k.keyword)?.to_string(),
                    year: k.year,
                    month: k.month,
                }
            }
        };
        Ok(key)
    }
}

/// Identity of an external record as assigned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NaturalKey {
    Account(String),
    Location(String),
    Review(String),
    Post(String),
    Performance {
        store_ref: String,
        period_start: NaiveDate,
        period_end: NaiveDate,
    },
    SearchKeyword {
        store_ref: String,
        keyword: String,
        year: i32,
        month: u32,
    },
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NaturalKey::Account(r)
            | NaturalKey::Location(r)
            | NaturalKey::Review(r)
            | NaturalKey::Post(r) => f.write_str(r),
            NaturalKey::Performance {
                store_ref,
                period_start,
                period_end,
            } => write!(f, "{store_ref}@{period_start}..{period_end}"),
            NaturalKey::SearchKeyword {
                store_ref,
                keyword,
                year,
                month,
            } => write!(f, "{store_ref}#{keyword}@{year}-{month:02}"),
        }
    }
}

// =============================================================================
// Run Bookkeeping
// =============================================================================

/// Progress snapshot of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Progress {
    /// Units discovered so far (locations × data types).
    pub total: u32,
    /// Units finished (checkpointed or skipped after an error).
    pub completed: u32,
    /// Displayed percentage, 0..=100, never decreasing.
    pub percentage: u8,
}

/// Immutable proof that one (step, location) unit finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub step: String,
    pub location_ref: String,
    pub records_processed: u32,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(step: DataType, location_ref: impl Into<String>, records_processed: u32) -> Self {
        Self {
            step: step.as_str().to_string(),
            location_ref: location_ref.into(),
            records_processed,
            timestamp: Utc::now(),
        }
    }
}

/// A classified failure retained on a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub code: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    pub message: String,
    pub context_entity: Option<String>,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    /// Builds a record from a classification and the failure's message.
    pub fn new(
        classification: Classification,
        message: impl Into<String>,
        context_entity: Option<String>,
    ) -> Self {
        Self {
            code: classification.code.to_string(),
            category: classification.category,
            severity: classification.severity,
            retryable: classification.retryable,
            message: message.into(),
            context_entity,
            timestamp: Utc::now(),
        }
    }
}

/// Per-run overrides supplied by the caller (the request `config`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    /// Data types to fetch; empty means the configured default set.
    pub data_types: Vec<DataType>,
    pub max_concurrent_locations: Option<usize>,
    pub error_rate_threshold: Option<f64>,
}

/// One invocation of the engine, persisted for resume and lookup.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub id: String,
    pub owner_account_id: String,
    pub status: SyncStatus,
    pub current_step: Option<String>,
    pub progress: Progress,
    pub checkpoints: Vec<Checkpoint>,
    pub errors: Vec<ErrorRecord>,
    pub warnings: Vec<String>,
    pub options: RunOptions,
    #[ts(as = "String")]
    pub started_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub last_updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub archived_at: Option<DateTime<Utc>>,
}

/// Entity counts across the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub accounts: i64,
    pub locations: i64,
    pub reviews: i64,
    pub posts: i64,
    pub performance_records: i64,
    pub search_keywords: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================
