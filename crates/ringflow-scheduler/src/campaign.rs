//! Campaign aggregate: a named, stateful group of contacts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ringflow_core::error::{Result, RingflowError};
use serde::{Deserialize, Serialize};

/// A campaign. Its attempts are a derived view kept by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Selection order is preserved.
    pub contact_ids: Vec<String>,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
}

/// Campaign status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl Campaign {
    /// Create an `Active` campaign. Duplicate contact ids are dropped,
    /// keeping first-seen order.
    pub fn new(name: &str, description: &str, contact_ids: &[String]) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(RingflowError::Validation("campaign name is required".into()));
        }
        let mut ids: Vec<String> = Vec::with_capacity(contact_ids.len());
        for id in contact_ids {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        if ids.is_empty() {
            return Err(RingflowError::Validation(format!(
                "campaign '{name}' needs at least one contact"
            )));
        }
        Ok(Self {
            id: format!("camp-{}", uuid::Uuid::new_v4().simple()),
            name: name.trim().to_string(),
            description: description.to_string(),
            contact_ids: ids,
            status: CampaignStatus::Active,
            created_at: Utc::now(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }
}

/// Registry of known campaigns.
#[derive(Debug, Default)]
pub struct CampaignRegistry {
    campaigns: HashMap<String, Campaign>,
}

impl CampaignRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a campaign.
    pub fn insert(&mut self, campaign: Campaign) {
        tracing::info!("📋 Campaign registered: '{}' ({})", campaign.name, campaign.id);
        self.campaigns.insert(campaign.id.clone(), campaign);
    }

    pub fn get(&self, id: &str) -> Option<&Campaign> {
        self.campaigns.get(id)
    }

    pub fn require(&self, id: &str) -> Result<&Campaign> {
        self.get(id)
            .ok_or_else(|| RingflowError::NotFound(format!("campaign '{id}'")))
    }

    /// All campaigns, oldest first.
    pub fn list(&self) -> Vec<&Campaign> {
        let mut all: Vec<_> = self.campaigns.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn count(&self) -> usize {
        self.campaigns.len()
    }

    pub fn active_count(&self) -> usize {
        self.campaigns.values().filter(|c| c.is_active()).count()
    }

    /// Set a campaign's status. Returns the updated campaign.
    pub fn set_status(&mut self, id: &str, status: CampaignStatus) -> Result<Campaign> {
        let campaign = self
            .campaigns
            .get_mut(id)
            .ok_or_else(|| RingflowError::NotFound(format!("campaign '{id}'")))?;
        if campaign.status != status {
            tracing::info!(
                "📋 Campaign '{}': {} → {}",
                campaign.name,
                campaign.status,
                status
            );
            campaign.status = status;
        }
        Ok(campaign.clone())
    }

    /// Toggle between `Active` and `Paused`. A completed campaign becomes active.
    pub fn toggle(&mut self, id: &str) -> Result<Campaign> {
        let next = match self.require(id)?.status {
            CampaignStatus::Active => CampaignStatus::Paused,
            CampaignStatus::Paused | CampaignStatus::Completed => CampaignStatus::Active,
        };
        self.set_status(id, next)
    }

    /// Remove a campaign. Attempts already created are left alone.
    pub fn remove(&mut self, id: &str) -> Option<Campaign> {
        let removed = self.campaigns.remove(id);
        if let Some(c) = &removed {
            tracing::info!("🗑️ Campaign deleted: '{}' ({})", c.name, c.id);
        }
        removed
    }
}
