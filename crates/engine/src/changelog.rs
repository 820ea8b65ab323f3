//! Bounded change log
//!
//! Committed changes receive consecutive ids starting at 0. Only the most
//! recent `max_changes` records are retained; older ones are evicted in id
//! order, so the retained window is always contiguous.

use std::collections::VecDeque;

use modelbus_core::Change;

/// Ring of committed change records.
#[derive(Debug)]
pub struct ChangeLog {
    records: VecDeque<Change>,
    next_id: u64,
    max_changes: usize,
}

impl ChangeLog {
    /// Create an empty log retaining at most `max_changes` records.
    pub fn new(max_changes: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_changes.min(1024)),
            next_id: 0,
            max_changes: max_changes.max(1),
        }
    }

    /// Id the next committed change will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Id of the last committed change, `-1` when nothing was committed yet.
    pub fn last_id(&self) -> i64 {
        self.next_id as i64 - 1
    }

    /// Id of the oldest retained change.
    pub fn earliest_id(&self) -> Option<u64> {
        self.records.front().map(|c| c.id)
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Assign ids to `changes`, append them and evict beyond the bound.
    ///
    /// Returns the committed records in id order.
    pub fn commit(&mut self, changes: Vec<Change>) -> Vec<Change> {
        let mut committed = Vec::with_capacity(changes.len());
        for mut change in changes {
            change.id = self.next_id;
            self.next_id += 1;
            committed.push(change.clone());
            self.records.push_back(change);
        }
        while self.records.len() > self.max_changes {
            self.records.pop_front();
        }
        committed
    }

    /// Changes with ids in `[change_id, change_id + n)`; `n == 0` means every
    /// change since `change_id`. Ids before the retained window are clamped to
    /// its start.
    pub fn since(&self, change_id: i64, n: usize) -> Vec<Change> {
        let earliest = match self.earliest_id() {
            Some(id) => id,
            None => return Vec::new(),
        };
        let from = (change_id.max(0) as u64).max(earliest);
        let to = if n == 0 {
            self.next_id
        } else {
            (change_id.max(0) as u64)
                .saturating_add(n as u64)
                .min(self.next_id)
        };
        if from >= to {
            return Vec::new();
        }
        let skip = (from - earliest) as usize;
        self.records
            .iter()
            .skip(skip)
            .take((to - from) as usize)
            .cloned()
            .collect()
    }
}
