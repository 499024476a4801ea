//! Attempt builder: expands a dispatch request into one attempt per contact.

use chrono::{DateTime, Utc};
use ringflow_core::error::{Result, RingflowError};
use serde::{Deserialize, Serialize};

use crate::attempt::Attempt;
use crate::campaign::Campaign;
use crate::policy::{DispatchPolicy, resolve_fire_time};

/// Parameters shared by every attempt of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchParams {
    pub policy: DispatchPolicy,
    pub repeat_count: u32,
    pub message: Option<String>,
}

impl DispatchParams {
    pub fn new(policy: DispatchPolicy) -> Self {
        Self {
            policy,
            repeat_count: 1,
            message: None,
        }
    }

    pub fn with_repeat_count(mut self, repeat_count: u32) -> Self {
        self.repeat_count = repeat_count;
        self
    }

    /// Blank messages are treated as absent.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.message = if message.trim().is_empty() { None } else { Some(message) };
        self
    }
}

/// Build one `Pending` attempt per contact id, in the order given.
///
/// `ordinal_index` is the position in `contact_ids`; repeated ids are kept.
pub fn build_attempts(
    campaign: &Campaign,
    contact_ids: &[String],
    params: &DispatchParams,
    now: DateTime<Utc>,
) -> Result<Vec<Attempt>> {
    if contact_ids.is_empty() {
        return Err(RingflowError::Validation(format!(
            "no contacts selected for campaign '{}'",
            campaign.name
        )));
    }

    let interval_minutes = params.policy.interval_minutes();
    let attempts = contact_ids
        .iter()
        .enumerate()
        .map(|(ordinal, contact_id)| {
            let fire_at = resolve_fire_time(&params.policy, now, ordinal);
            let mut attempt = Attempt::pending(&campaign.id, contact_id, ordinal, fire_at);
            attempt.interval_minutes = interval_minutes;
            attempt.repeat_count = params.repeat_count;
            attempt.message = params.message.clone();
            attempt
        })
        .collect();
    Ok(attempts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::AttemptStatus;
    use chrono::Duration;

    fn campaign() -> Campaign {
        Campaign::new("Test", "", &["c1".to_string()]).unwrap()
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_one_attempt_per_contact_in_order() {
        let now = Utc::now();
        let params = DispatchParams::new(DispatchPolicy::Staggered {
            start: now,
            interval_minutes: 5,
        })
        .with_repeat_count(2)
        .with_message("Namaste");
        let attempts = build_attempts(&campaign(), &ids(&["c3", "c1", "c2"]), &params, now).unwrap();

        assert_eq!(attempts.len(), 3);
        let order: Vec<_> = attempts.iter().map(|a| a.contact_id.as_str()).collect();
        assert_eq!(order, ["c3", "c1", "c2"]);
        for (i, a) in attempts.iter().enumerate() {
            assert_eq!(a.ordinal_index, i);
            assert_eq!(a.status, AttemptStatus::Pending);
            assert_eq!(a.repeat_count, 2);
            assert_eq!(a.interval_minutes, Some(5));
            assert_eq!(a.message.as_deref(), Some("Namaste"));
            assert_eq!(a.scheduled_time, now + Duration::minutes(5 * i as i64));
        }
    }

    #[test]
    fn test_duplicates_are_kept() {
        let now = Utc::now();
        let params = DispatchParams::new(DispatchPolicy::Immediate);
        let attempts = build_attempts(&campaign(), &ids(&["c1", "c1"]), &params, now).unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].ordinal_index, 0);
        assert_eq!(attempts[1].ordinal_index, 1);
        assert_ne!(attempts[0].id, attempts[1].id);
        assert!(attempts.iter().all(|a| a.interval_minutes.is_none()));
    }

    #[test]
    fn test_empty_selection_rejected() {
        let params = DispatchParams::new(DispatchPolicy::Immediate);
        let err = build_attempts(&campaign(), &[], &params, Utc::now()).unwrap_err();
        assert!(matches!(err, RingflowError::Validation(_)));
    }

    #[test]
    fn test_blank_message_is_none() {
        let params = DispatchParams::new(DispatchPolicy::Immediate).with_message("   ");
        assert!(params.message.is_none());
    }
}
