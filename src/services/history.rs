//! Bounded rolling history of calibrated sols.
//!
//! The provider only ever lists its most recent sols; the window retains
//! older ones across fetches up to a fixed depth. Eviction is strictly
//! oldest-sol-first, regardless of how often entries are read.

use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::models::{sol_order, CalibratedSolRecord};

/// Number of sols shown in trend charts.
pub const TREND_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryWindow {
    depth: usize,
    records: VecDeque<CalibratedSolRecord>,
}

impl HistoryWindow {
    /// Create an empty window holding at most `depth` sols (minimum 1).
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            depth,
            records: VecDeque::with_capacity(depth),
        }
    }

    /// Add a sol, replacing any record already held for the same key.
    ///
    /// A new key goes to the back unless both it and the current newest are
    /// sol numbers and it is the older of the two; only then is it placed by
    /// number. Non-numeric keys keep the order they arrive in.
    pub fn append(&mut self, record: CalibratedSolRecord) {
        if let Some(existing) = self.records.iter_mut().find(|r| r.sol == record.sol) {
            *existing = record;
            return;
        }

        let arrives_late = self
            .records
            .back()
            .is_some_and(|last| sol_order(&record.sol, &last.sol) == Some(Ordering::Less));
        if !arrives_late {
            self.records.push_back(record);
        } else {
            let is_oldest = self
                .records
                .front()
                .is_some_and(|first| sol_order(&record.sol, &first.sol) == Some(Ordering::Less));
            if is_oldest && self.records.len() >= self.depth {
                tracing::debug!(
                    "History: sol {} is older than the full window, dropping",
                    record.sol
                );
                return;
            }
            let pos = self
                .records
                .iter()
                .position(|r| sol_order(&record.sol, &r.sol) == Some(Ordering::Less))
                .unwrap_or(self.records.len());
            self.records.insert(pos, record);
        }

        while self.records.len() > self.depth {
            self.records.pop_front();
        }
    }

    /// The newest `k` sols, oldest first. Returns fewer when history is short.
    pub fn window_of(&self, k: usize) -> Vec<CalibratedSolRecord> {
        let skip = self.records.len().saturating_sub(k);
        self.records.iter().skip(skip).cloned().collect()
    }

    /// Every retained sol, oldest first.
    pub fn all(&self) -> Vec<CalibratedSolRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&CalibratedSolRecord> {
        self.records.back()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
