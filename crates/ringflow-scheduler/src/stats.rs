//! Dashboard figures over the attempt set.

use serde::Serialize;

use crate::attempt::{Attempt, AttemptStatus};

/// Attempt totals by status, plus campaign counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub total_attempts: usize,
    pub pending: usize,
    pub calling: usize,
    pub completed: usize,
    pub failed: usize,
    /// Completed share of all attempts, rounded percent.
    pub success_rate: u8,
    pub active_campaigns: usize,
    pub total_campaigns: usize,
}

impl DispatchStats {
    pub fn collect<'a>(
        attempts: impl IntoIterator<Item = &'a Attempt>,
        active_campaigns: usize,
        total_campaigns: usize,
    ) -> Self {
        let mut stats = Self {
            active_campaigns,
            total_campaigns,
            ..Self::default()
        };
        for attempt in attempts {
            stats.total_attempts += 1;
            match attempt.status {
                AttemptStatus::Pending => stats.pending += 1,
                AttemptStatus::Calling => stats.calling += 1,
                AttemptStatus::Completed => stats.completed += 1,
                AttemptStatus::Failed(_) => stats.failed += 1,
            }
        }
        if stats.total_attempts > 0 {
            let rate = (stats.completed as f64 / stats.total_attempts as f64 * 100.0).round();
            stats.success_rate = rate as u8;
        }
        stats
    }
}
