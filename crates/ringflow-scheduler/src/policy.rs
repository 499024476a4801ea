//! Timing policies and the fire-time resolver.
//!
//! Resolution is pure: the caller captures "now" once per batch and passes
//! it in, so every attempt of an `Immediate` batch gets the same fire time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Smallest accepted stagger interval, in minutes.
pub const MIN_INTERVAL_MINUTES: u32 = 1;
/// Largest accepted stagger interval, in minutes.
pub const MAX_INTERVAL_MINUTES: u32 = 60;

/// How attempts of one batch are spread over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Fire now.
    Immediate,
    /// Fire every attempt at `start`.
    ScheduledForLater { start: DateTime<Utc> },
    /// Fire attempt `i` at `start + i * interval_minutes`.
    Staggered {
        start: DateTime<Utc>,
        interval_minutes: u32,
    },
}

impl DispatchPolicy {
    /// Stagger interval, if any.
    pub fn interval_minutes(&self) -> Option<u32> {
        match self {
            Self::Staggered { interval_minutes, .. } => Some(*interval_minutes),
            _ => None,
        }
    }

    /// Clamp the stagger interval into `[1, 60]`. Other policies are unchanged.
    pub fn clamped(self) -> Self {
        match self {
            Self::Staggered { start, interval_minutes } => Self::Staggered {
                start,
                interval_minutes: clamp_interval(interval_minutes),
            },
            other => other,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::ScheduledForLater { .. } => "scheduled",
            Self::Staggered { .. } => "staggered",
        }
    }
}

/// Clamp a stagger interval to the nearest accepted bound.
pub fn clamp_interval(minutes: u32) -> u32 {
    minutes.clamp(MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES)
}

/// Absolute fire time for the attempt at `ordinal_index`.
///
/// Assumes the stagger interval was already validated.
pub fn resolve_fire_time(
    policy: &DispatchPolicy,
    now: DateTime<Utc>,
    ordinal_index: usize,
) -> DateTime<Utc> {
    match policy {
        DispatchPolicy::Immediate => now,
        DispatchPolicy::ScheduledForLater { start } => *start,
        DispatchPolicy::Staggered { start, interval_minutes } => {
            *start + Duration::minutes(ordinal_index as i64 * i64::from(*interval_minutes))
        }
    }
}

/// First and last fire time of a batch of `count` attempts.
pub fn batch_window(
    policy: &DispatchPolicy,
    now: DateTime<Utc>,
    count: usize,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let last = count.checked_sub(1)?;
    Some((
        resolve_fire_time(policy, now, 0),
        resolve_fire_time(policy, now, last),
    ))
}
