//! Bounded record of recent executions

use crate::error::OutcomeKind;
use crate::execution::ExecutionId;
use crate::types::ExecutionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One finished request, as kept in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: ExecutionId,
    /// Resolved language; absent when the request never got that far
    pub language: Option<String>,
    pub duration_ms: u64,
    pub ok: bool,
    pub outcome: OutcomeKind,
    /// When the request was submitted
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_result(result: &ExecutionResult, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id: result.id,
            language: result.language.clone(),
            duration_ms: result.duration_ms,
            ok: result.ok,
            outcome: result.outcome(),
            timestamp: submitted_at,
        }
    }
}

/// Fixed-capacity FIFO; the oldest entry is evicted first
#[derive(Debug)]
pub struct HistoryLedger {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Up to `n` most recent entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}
