//! The dispatch timeline, a min-heap of pending attempts keyed by
//! `(scheduled_time, ordinal_index)`.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

/// One attempt waiting for its fire time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub fire_at: DateTime<Utc>,
    pub ordinal_index: usize,
    /// Submission the attempt belongs to.
    pub batch_id: u64,
    pub attempt_id: String,
}

impl Ord for TimelineEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then_with(|| self.ordinal_index.cmp(&other.ordinal_index))
            .then_with(|| self.batch_id.cmp(&other.batch_id))
            .then_with(|| self.attempt_id.cmp(&other.attempt_id))
    }
}

impl PartialOrd for TimelineEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Earliest-first queue of timeline entries.
#[derive(Debug, Default)]
pub struct Timeline {
    heap: BinaryHeap<Reverse<TimelineEntry>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TimelineEntry) {
        self.heap.push(Reverse(entry));
    }

    /// Fire time of the earliest entry.
    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse(e)| e.fire_at)
    }

    /// Remove and return every entry due at `now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<TimelineEntry> {
        let mut due = Vec::new();
        while let Some(Reverse(head)) = self.heap.peek() {
            if head.fire_at > now {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                due.push(entry);
            }
        }
        due
    }

    /// Drop entries the predicate rejects. Returns how many were removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&TimelineEntry) -> bool) -> usize {
        let before = self.heap.len();
        self.heap.retain(|Reverse(e)| keep(e));
        before - self.heap.len()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(fire_at: DateTime<Utc>, ordinal: usize, batch: u64) -> TimelineEntry {
        TimelineEntry {
            fire_at,
            ordinal_index: ordinal,
            batch_id: batch,
            attempt_id: format!("b{batch}-{ordinal}"),
        }
    }

    #[test]
    fn test_orders_by_time_then_ordinal() {
        let now = Utc::now();
        let mut tl = Timeline::new();
        tl.push(entry(now, 2, 1));
        tl.push(entry(now - Duration::seconds(5), 9, 2));
        tl.push(entry(now, 0, 1));
        tl.push(entry(now, 1, 1));
        tl.push(entry(now + Duration::minutes(1), 0, 3));

        let due: Vec<_> = tl.pop_due(now).into_iter().map(|e| e.attempt_id).collect();
        assert_eq!(due, ["b2-9", "b1-0", "b1-1", "b1-2"]);
        assert_eq!(tl.len(), 1);
        assert_eq!(tl.next_fire_at(), Some(now + Duration::minutes(1)));
    }

    #[test]
    fn test_retain() {
        let now = Utc::now();
        let mut tl = Timeline::new();
        tl.push(entry(now, 0, 1));
        tl.push(entry(now, 0, 2));
        assert_eq!(tl.retain(|e| e.batch_id != 1), 1);
        assert_eq!(tl.len(), 1);
    }
}
