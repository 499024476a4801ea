//! Batch lanes: one per accepted submission.
//!
//! Attempts move from the timeline into their lane's ready queue once their
//! fire time passes. A lane releases at most one attempt per spacing window,
//! lowest ordinal first, so a batch never hammers the call endpoint even when
//! every attempt shares the same fire time. Lanes of different submissions
//! are independent and may interleave freely.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use ringflow_core::types::{Contact, CredentialBundle};
use tokio::time::Instant;

/// An attempt released by a lane, ready to be invoked.
#[derive(Debug, Clone)]
pub struct LaneRelease {
    pub attempt_id: String,
    pub ordinal_index: usize,
    pub contact: Contact,
}

/// Per-submission state.
#[derive(Debug)]
pub struct BatchLane {
    pub campaign_id: String,
    /// Credentials captured at admission.
    pub credentials: CredentialBundle,
    min_spacing: Duration,
    /// Due attempts, ascending ordinal.
    ready: VecDeque<(usize, String)>,
    /// Contacts of attempts not yet released.
    contacts: HashMap<String, Contact>,
    last_fired: Option<Instant>,
    total_fired: u64,
}

impl BatchLane {
    pub fn new(campaign_id: &str, credentials: CredentialBundle, min_spacing: Duration) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            credentials,
            min_spacing,
            ready: VecDeque::new(),
            contacts: HashMap::new(),
            last_fired: None,
            total_fired: 0,
        }
    }

    /// Register an attempt that will later become ready.
    pub fn admit(&mut self, attempt_id: &str, contact: Contact) {
        self.contacts.insert(attempt_id.to_string(), contact);
    }

    /// Move an admitted attempt into the ready queue, keeping ordinal order.
    pub fn mark_ready(&mut self, ordinal_index: usize, attempt_id: String) {
        if !self.contacts.contains_key(&attempt_id) {
            return;
        }
        let pos = self.ready.partition_point(|(ord, _)| *ord <= ordinal_index);
        self.ready.insert(pos, (ordinal_index, attempt_id));
    }

    /// When the next ready attempt may be released. `None` if nothing is ready.
    pub fn ready_at(&self, now: Instant) -> Option<Instant> {
        if self.ready.is_empty() {
            return None;
        }
        Some(match self.last_fired {
            Some(last) => (last + self.min_spacing).max(now),
            None => now,
        })
    }

    /// Release the lowest-ordinal ready attempt if the spacing guard allows.
    pub fn release(&mut self, now: Instant) -> Option<LaneRelease> {
        if self.ready_at(now)? > now {
            return None;
        }
        while let Some((ordinal_index, attempt_id)) = self.ready.pop_front() {
            if let Some(contact) = self.contacts.remove(&attempt_id) {
                return Some(LaneRelease {
                    attempt_id,
                    ordinal_index,
                    contact,
                });
            }
        }
        None
    }

    /// Start the spacing window. Call only when an invocation actually began.
    pub fn mark_fired(&mut self, now: Instant) {
        self.last_fired = Some(now);
        self.total_fired += 1;
    }

    /// Forget an attempt that will never be released.
    pub fn drop_attempt(&mut self, attempt_id: &str) -> bool {
        self.ready.retain(|(_, id)| id != attempt_id);
        self.contacts.remove(attempt_id).is_some()
    }

    /// Attempts admitted but not yet released.
    pub fn outstanding(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_drained(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn stats(&self, batch_id: u64) -> LaneStats {
        LaneStats {
            batch_id,
            campaign_id: self.campaign_id.clone(),
            ready: self.ready.len(),
            waiting: self.contacts.len() - self.ready.len(),
            total_fired: self.total_fired,
        }
    }
}

/// Statistics for a single lane.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LaneStats {
    pub batch_id: u64,
    pub campaign_id: String,
    /// Due, held back by the spacing guard.
    pub ready: usize,
    /// Not yet due.
    pub waiting: usize,
    pub total_fired: u64,
}
