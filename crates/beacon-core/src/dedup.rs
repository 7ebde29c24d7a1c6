//! # Dedup Policy
//!
//! Decides which record of a duplicate group survives.
//!
//! ## Tie-break
//! ```text
//! 1. Prefer a record whose display name does NOT start with a placeholder
//!    prefix ("Store accounts/..." by default).
//! 2. Among equals, prefer the most recently created record.
//! 3. Still equal: highest id, so the choice is stable across passes.
//! ```
//!
//! The database side (grouping, re-pointing, deleting) lives in
//! `beacon-db::repository::dedup`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Placeholder prefix written by the upstream listing for unnamed locations.
pub const DEFAULT_PLACEHOLDER_PREFIX: &str = "Store accounts/";

/// Configurable tie-break rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupPolicy {
    pub placeholder_prefixes: Vec<String>,
    pub prefer_named_records: bool,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            placeholder_prefixes: vec![DEFAULT_PLACEHOLDER_PREFIX.to_string()],
            prefer_named_records: true,
        }
    }
}

/// One stored row of a duplicate group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupCandidate {
    pub id: String,
    pub natural_ref: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A group split into the survivor and the rows to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub key: String,
    pub winner: DedupCandidate,
    pub losers: Vec<DedupCandidate>,
}

impl DuplicateGroup {
    pub fn loser_ids(&self) -> Vec<String> {
        self.losers.iter().map(|l| l.id.clone()).collect()
    }

    /// Natural ref the winner ends up with: its own, else the first loser's.
    pub fn adopted_ref(&self) -> Option<String> {
        if self.winner.natural_ref.is_some() {
            return None;
        }
        self.losers.iter().find_map(|l| l.natural_ref.clone())
    }

    /// The winner's natural ref after adoption.
    pub fn effective_ref(&self) -> Option<String> {
        self.winner.natural_ref.clone().or_else(|| self.adopted_ref())
    }
}

impl DedupPolicy {
    /// True when `name` is missing or starts with a placeholder prefix.
    pub fn is_placeholder(&self, name: Option<&str>) -> bool {
        match name.map(str::trim) {
            None | Some("") => true,
            Some(n) => self
                .placeholder_prefixes
                .iter()
                .any(|p| !p.is_empty() && n.starts_with(p.as_str())),
        }
    }

    /// Orders two candidates; `Greater` means `a` should win.
    pub fn compare(&self, a: &DedupCandidate, b: &DedupCandidate) -> Ordering {
        let named = |c: &DedupCandidate| !self.is_placeholder(c.display_name.as_deref());

        let by_name = if self.prefer_named_records {
            named(a).cmp(&named(b))
        } else {
            Ordering::Equal
        };

        by_name
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Splits a group into winner and losers. `None` for groups of size < 2.
    pub fn partition(&self, key: impl Into<String>, mut rows: Vec<DedupCandidate>) -> Option<DuplicateGroup> {
        if rows.len() < 2 {
            return None;
        }
        rows.sort_by(|a, b| self.compare(b, a));
        let winner = rows.remove(0);
        Some(DuplicateGroup {
            key: key.into(),
            winner,
            losers: rows,
        })
    }
}

/// Outcome of a dedup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DedupReport {
    /// Deleted rows per entity kind (`location`, `review`, ...).
    pub removed: BTreeMap<String, u64>,
    /// Duplicate groups resolved.
    pub groups: u64,
}

impl DedupReport {
    pub fn add_removed(&mut self, entity: &str, count: u64) {
        if count > 0 {
            *self.removed.entry(entity.to_string()).or_default() += count;
        }
    }

    pub fn total_removed(&self) -> u64 {
        self.removed.values().sum()
    }

    pub fn merge(&mut self, other: DedupReport) {
        self.groups += other.groups;
        for (entity, count) in other.removed {
            self.add_removed(&entity, count);
        }
    }
}
