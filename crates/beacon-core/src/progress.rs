//! # Progress Bookkeeping
//!
//! In-memory state the orchestrator keeps for one run:
//!
//! - [`ProgressTracker`] - unit counts and the displayed percentage
//! - [`CheckpointLedger`] - (step, location) pairs already done
//! - [`UnitTally`] - attempted/failed units for the error-rate cutoff
//! - [`BoundedLog`] - oldest-evicted ring for errors and warnings
//!
//! ## Percentage Rule
//! ```text
//! computed  = floor(completed / total · 100)
//! displayed = max(displayed, computed)      while in progress, at most 99
//! displayed = 100                           on completion
//! ```
//! `total` grows as locations are discovered, so `computed` can dip;
//! `displayed` never does.

use std::collections::{HashSet, VecDeque};

use crate::types::{Checkpoint, DataType, Progress};

// =============================================================================
// Progress Tracker
// =============================================================================

/// Unit counts plus the percentage shown to callers.
///
/// The shown value is `floor(completed / total · 100)` held to a running
/// maximum and capped at 99 while the run is live. Every unit can be done
/// before the account listing is exhausted (more locations may still add
/// units), so 100 is reserved for [`ProgressTracker::finish`], which the
/// orchestrator calls only when traversal has ended. Callers can treat 100
/// as "complete" and nothing less.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    total: u32,
    completed: u32,
    displayed: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a persisted snapshot; the displayed floor is kept while
    /// counts are rebuilt as work is rediscovered.
    pub fn resume_from(previous: &Progress) -> Self {
        Self {
            total: 0,
            completed: 0,
            displayed: previous.percentage.min(99),
        }
    }

    /// Registers newly discovered units.
    pub fn add_units(&mut self, units: u32) -> Progress {
        self.total = self.total.saturating_add(units);
        self.refresh()
    }

    /// Marks one unit finished (done, skipped, or already checkpointed).
    pub fn complete_unit(&mut self) -> Progress {
        self.completed = self.completed.saturating_add(1).min(self.total.max(1));
        self.refresh()
    }

    /// Forces 100% when the run completes.
    pub fn finish(&mut self) -> Progress {
        self.completed = self.total;
        self.displayed = 100;
        self.snapshot()
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            total: self.total,
            completed: self.completed,
            percentage: self.displayed,
        }
    }

    fn refresh(&mut self) -> Progress {
        if self.displayed < 100 {
            let computed = percentage(self.completed, self.total).min(99);
            self.displayed = self.displayed.max(computed);
        }
        self.snapshot()
    }
}

/// `floor(completed / total · 100)`, 0 when nothing is known yet.
pub fn percentage(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (u64::from(completed) * 100) / u64::from(total);
    pct.min(100) as u8
}

// =============================================================================
// Checkpoint Ledger
// =============================================================================

/// Set of (step, location_ref) units already checkpointed in a run lineage.
#[derive(Debug, Clone, Default)]
pub struct CheckpointLedger {
    done: HashSet<(String, String)>,
}

impl CheckpointLedger {
    pub fn from_checkpoints<'a>(checkpoints: impl IntoIterator<Item = &'a Checkpoint>) -> Self {
        Self {
            done: checkpoints
                .into_iter()
                .map(|c| (c.step.clone(), c.location_ref.clone()))
                .collect(),
        }
    }

    pub fn contains(&self, step: DataType, location_ref: &str) -> bool {
        self.done
            .contains(&(step.as_str().to_string(), location_ref.to_string()))
    }

    /// Records a unit; returns false if it was already present.
    pub fn insert(&mut self, step: DataType, location_ref: &str) -> bool {
        self.done
            .insert((step.as_str().to_string(), location_ref.to_string()))
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }
}

// =============================================================================
// Error Rate
// =============================================================================

/// Attempted/failed unit counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitTally {
    pub attempted: u32,
    pub failed: u32,
}

impl UnitTally {
    pub fn record(&mut self, failed: bool) {
        self.attempted += 1;
        if failed {
            self.failed += 1;
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        f64::from(self.failed) / f64::from(self.attempted)
    }

    /// True once enough units ran and the failure share is above `threshold`.
    pub fn exceeds(&self, threshold: f64, min_units: u32) -> bool {
        self.attempted >= min_units && self.error_rate() > threshold
    }
}

// =============================================================================
// Bounded Log
// =============================================================================

/// Fixed-capacity log; pushing past capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> BoundedLog<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T> Extend<T> for BoundedLog<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
