//! Attempt status events: broadcast to subscribers and kept in a small
//! in-memory history for dashboards.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attempt::AttemptStatus;

/// One status transition of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub attempt_id: String,
    pub campaign_id: String,
    pub old_status: AttemptStatus,
    pub new_status: AttemptStatus,
    pub timestamp: DateTime<Utc>,
}

impl StatusChange {
    pub fn new(
        attempt_id: &str,
        campaign_id: &str,
        old_status: AttemptStatus,
        new_status: AttemptStatus,
    ) -> Self {
        Self {
            attempt_id: attempt_id.to_string(),
            campaign_id: campaign_id.to_string(),
            old_status,
            new_status,
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.new_status.is_terminal()
    }
}

/// Ring buffer of recent status changes.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<StatusChange>,
    limit: usize,
}

impl EventLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(1024)),
            limit,
        }
    }

    /// Record a change, dropping the oldest beyond the limit.
    pub fn record(&mut self, change: StatusChange) {
        if self.limit == 0 {
            return;
        }
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(change);
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<StatusChange> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_keeps_latest() {
        let mut log = EventLog::new(3);
        for i in 0..5 {
            log.record(StatusChange::new(
                &format!("a{i}"),
                "camp",
                AttemptStatus::Pending,
                AttemptStatus::Calling,
            ));
        }
        let ids: Vec<_> = log.snapshot().into_iter().map(|c| c.attempt_id).collect();
        assert_eq!(ids, ["a2", "a3", "a4"]);
    }

    #[test]
    fn test_zero_limit_records_nothing() {
        let mut log = EventLog::new(0);
        log.record(StatusChange::new("a", "c", AttemptStatus::Pending, AttemptStatus::Calling));
        assert!(log.is_empty());
    }
}
