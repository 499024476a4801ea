//! Call attempts: the unit of work the dispatch engine owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One scheduled call to one contact within a campaign batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    /// Unique attempt ID.
    pub id: String,
    pub campaign_id: String,
    pub contact_id: String,
    /// Fire time computed by the resolver. Never recomputed.
    pub scheduled_time: DateTime<Utc>,
    /// 0-based position within the originating batch.
    pub ordinal_index: usize,
    /// Present only for staggered batches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u32>,
    pub repeat_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub status: AttemptStatus,
    /// Provider call identifier once the invoker succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

/// Attempt status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Calling,
    Completed,
    Failed(String),
}

/// Failure reasons the engine itself assigns.
pub mod reasons {
    pub const CANCELLED: &str = "cancelled";
    pub const CONTACT_NOT_FOUND: &str = "contact not found";
    pub const INTERRUPTED: &str = "interrupted";
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// Allowed edges:
    /// Pending → Calling, Pending → Failed, Calling → Completed, Calling → Failed.
    pub fn can_transition_to(&self, next: &AttemptStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Calling)
                | (Self::Pending, Self::Failed(_))
                | (Self::Calling, Self::Completed)
                | (Self::Calling, Self::Failed(_))
        )
    }

    /// Lowercase label without the failure reason.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Calling => "calling",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Inverse of `label` plus an optional reason.
    pub fn from_parts(label: &str, reason: Option<String>) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "calling" => Some(Self::Calling),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed(reason.unwrap_or_default())),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(reason) if !reason.is_empty() => write!(f, "failed ({reason})"),
            other => write!(f, "{}", other.label()),
        }
    }
}

impl Attempt {
    /// Create an attempt in `Pending`.
    pub fn pending(
        campaign_id: &str,
        contact_id: &str,
        ordinal_index: usize,
        scheduled_time: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_attempt_id(ordinal_index),
            campaign_id: campaign_id.to_string(),
            contact_id: contact_id.to_string(),
            scheduled_time,
            ordinal_index,
            interval_minutes: None,
            repeat_count: 1,
            message: None,
            status: AttemptStatus::Pending,
            provider_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the fire time has been reached.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.scheduled_time
    }
}

fn new_attempt_id(ordinal_index: usize) -> String {
    format!("att-{}-{ordinal_index}", uuid::Uuid::new_v4().simple())
}
