//! Dispatch engine: admits batches of attempts, owns the timeline and the
//! attempt status map, and drives each attempt to a terminal status.
//!
//! The engine is a cheap cloneable handle. All mutable state sits behind one
//! async mutex, so every status transition is serialized and no attempt is
//! ever written by two tasks at once. The background worker (`worker.rs`)
//! sleeps until the next fire time or spacing window, releases attempts,
//! and receives invocation outcomes over a channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use ringflow_core::config::DispatchConfig;
use ringflow_core::error::{Result, RingflowError};
use ringflow_core::traits::{CallInvoker, ContactDirectory, CredentialProvider};
use ringflow_core::types::{Contact, CredentialBundle};
use tokio::sync::{Mutex, Notify, RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::attempt::{Attempt, AttemptStatus, reasons};
use crate::builder::{DispatchParams, build_attempts};
use crate::campaign::{Campaign, CampaignRegistry, CampaignStatus};
use crate::events::{EventLog, StatusChange};
use crate::lanes::{BatchLane, LaneStats};
use crate::policy::{DispatchPolicy, batch_window};
use crate::stats::DispatchStats;
use crate::timeline::{Timeline, TimelineEntry};
use crate::worker::{self, InvocationOutcome};

/// Mutable dispatch state, guarded by `Shared::state`.
pub(crate) struct DispatchState {
    pub(crate) attempts: HashMap<String, Attempt>,
    /// Attempt ids in admission order.
    pub(crate) order: Vec<String>,
    pub(crate) timeline: Timeline,
    pub(crate) lanes: HashMap<u64, BatchLane>,
    next_batch: u64,
    log: EventLog,
}

impl DispatchState {
    fn new(history_limit: usize) -> Self {
        Self {
            attempts: HashMap::new(),
            order: Vec::new(),
            timeline: Timeline::new(),
            lanes: HashMap::new(),
            next_batch: 1,
            log: EventLog::new(history_limit),
        }
    }

    fn insert(&mut self, attempt: Attempt) {
        self.order.push(attempt.id.clone());
        self.attempts.insert(attempt.id.clone(), attempt);
    }

    pub(crate) fn is_pending(&self, attempt_id: &str) -> bool {
        self.attempts
            .get(attempt_id)
            .is_some_and(|a| a.status == AttemptStatus::Pending)
    }

    /// The single place attempt status changes.
    pub(crate) fn transition(&mut self, attempt_id: &str, next: AttemptStatus) -> Result<StatusChange> {
        let attempt = self
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| RingflowError::NotFound(format!("attempt '{attempt_id}'")))?;
        if !attempt.status.can_transition_to(&next) {
            return Err(RingflowError::Validation(format!(
                "attempt '{attempt_id}' cannot move from {} to {}",
                attempt.status, next
            )));
        }
        let change = StatusChange::new(
            attempt_id,
            &attempt.campaign_id,
            attempt.status.clone(),
            next.clone(),
        );
        attempt.status = next;
        attempt.updated_at = change.timestamp;
        self.log.record(change.clone());
        Ok(change)
    }
}

/// State shared between engine handles and the worker task.
pub(crate) struct Shared {
    pub(crate) config: DispatchConfig,
    pub(crate) campaigns: RwLock<CampaignRegistry>,
    pub(crate) state: Mutex<DispatchState>,
    pub(crate) directory: Arc<dyn ContactDirectory>,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) invoker: Arc<dyn CallInvoker>,
    /// Poked whenever the timeline changes.
    pub(crate) wake: Notify,
    events: broadcast::Sender<StatusChange>,
    pub(crate) outcomes_tx: mpsc::UnboundedSender<InvocationOutcome>,
    outcomes_rx: Mutex<Option<mpsc::UnboundedReceiver<InvocationOutcome>>>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    pub(crate) fn publish(&self, changes: Vec<StatusChange>) {
        for change in changes {
            // No subscribers is fine.
            let _ = self.events.send(change);
        }
    }
}

/// Handle to the dispatch engine.
#[derive(Clone)]
pub struct DispatchEngine {
    pub(crate) shared: Arc<Shared>,
}

impl DispatchEngine {
    pub fn new(
        config: DispatchConfig,
        directory: Arc<dyn ContactDirectory>,
        credentials: Arc<dyn CredentialProvider>,
        invoker: Arc<dyn CallInvoker>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let state = DispatchState::new(config.history_limit);
        Self {
            shared: Arc::new(Shared {
                config,
                campaigns: RwLock::new(CampaignRegistry::new()),
                state: Mutex::new(state),
                directory,
                credentials,
                invoker,
                wake: Notify::new(),
                events,
                outcomes_tx,
                outcomes_rx: Mutex::new(Some(outcomes_rx)),
                shutdown,
            }),
        }
    }

    /// Spawn the background worker. Can only be done once per engine.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        let outcomes = self.shared.outcomes_rx.lock().await.take().ok_or_else(|| {
            RingflowError::Validation("dispatch worker already started".into())
        })?;
        let shutdown = self.shared.shutdown.subscribe();
        let shared = Arc::clone(&self.shared);
        Ok(tokio::spawn(worker::run(shared, outcomes, shutdown)))
    }

    /// Ask the worker to stop. In-flight invocations keep running but their
    /// outcomes are no longer applied.
    pub fn shutdown(&self) {
        let _ = self.shared.shutdown.send(true);
    }

    /// Subscribe to every attempt status change.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.shared.config
    }

    // ─── Submission ───────────────────────────────────────────

    /// Expand a dispatch request into attempts and admit them.
    ///
    /// The stagger interval is clamped to `[1, 60]`. Unknown contact ids
    /// still get an attempt, immediately failed with "contact not found".
    pub async fn submit_campaign_dispatch(
        &self,
        campaign_id: &str,
        contact_ids: &[String],
        params: DispatchParams,
    ) -> Result<Vec<Attempt>> {
        let campaign = self.require_active(campaign_id).await?;
        self.check_repeat_count(params.repeat_count)?;
        let credentials = self.shared.credentials.credential_bundle()?;

        let params = DispatchParams {
            policy: params.policy.clamped(),
            ..params
        };
        let now = Utc::now();
        let attempts = build_attempts(&campaign, contact_ids, &params, now)?;
        if let Some((first, last)) = batch_window(&params.policy, now, attempts.len()) {
            tracing::info!(
                "📥 Dispatch request for '{}': {} contact(s), policy={}, repeat={}, window {} .. {}",
                campaign.name,
                attempts.len(),
                params.policy.label(),
                params.repeat_count,
                first.format("%H:%M:%S"),
                last.format("%H:%M:%S")
            );
        }
        self.admit(&campaign, attempts, credentials).await
    }

    /// Admit prebuilt attempts for a campaign.
    pub async fn submit(&self, campaign_id: &str, attempts: Vec<Attempt>) -> Result<Vec<Attempt>> {
        if attempts.is_empty() {
            return Err(RingflowError::Validation("no attempts to submit".into()));
        }
        let campaign = self.require_active(campaign_id).await?;
        for attempt in &attempts {
            if attempt.campaign_id != campaign_id {
                return Err(RingflowError::Validation(format!(
                    "attempt '{}' belongs to campaign '{}'",
                    attempt.id, attempt.campaign_id
                )));
            }
            if attempt.status != AttemptStatus::Pending {
                return Err(RingflowError::Validation(format!(
                    "attempt '{}' is {}, only pending attempts can be submitted",
                    attempt.id, attempt.status
                )));
            }
            self.check_repeat_count(attempt.repeat_count)?;
        }
        let credentials = self.shared.credentials.credential_bundle()?;
        self.admit(&campaign, attempts, credentials).await
    }

    async fn require_active(&self, campaign_id: &str) -> Result<Campaign> {
        let campaigns = self.shared.campaigns.read().await;
        let campaign = campaigns.require(campaign_id)?;
        if !campaign.is_active() {
            return Err(RingflowError::Validation(format!(
                "campaign '{}' is {}, only active campaigns accept dispatches",
                campaign.name, campaign.status
            )));
        }
        Ok(campaign.clone())
    }

    fn check_repeat_count(&self, repeat_count: u32) -> Result<()> {
        let max = self.shared.config.max_repeat_count.max(1);
        if repeat_count == 0 || repeat_count > max {
            return Err(RingflowError::Validation(format!(
                "repeat count must be between 1 and {max}, got {repeat_count}"
            )));
        }
        Ok(())
    }

    async fn admit(
        &self,
        campaign: &Campaign,
        attempts: Vec<Attempt>,
        credentials: CredentialBundle,
    ) -> Result<Vec<Attempt>> {
        // Directory lookups happen before taking the state lock.
        let contacts: Vec<Option<Contact>> = attempts
            .iter()
            .map(|a| match self.shared.directory.get_contact(&a.contact_id) {
                Ok(contact) => Some(contact),
                Err(e) => {
                    tracing::warn!("⚠️ Attempt {} for '{}': {e}", a.id, a.contact_id);
                    None
                }
            })
            .collect();

        let mut changes = Vec::new();
        let admitted = {
            let mut guard = self.shared.state.lock().await;
            let st = &mut *guard;

            let duplicate = {
                let mut seen = HashSet::new();
                attempts
                    .iter()
                    .find(|a| st.attempts.contains_key(&a.id) || !seen.insert(a.id.as_str()))
                    .map(|a| a.id.clone())
            };
            if let Some(dup) = duplicate {
                return Err(RingflowError::Validation(format!(
                    "attempt '{dup}' was already submitted"
                )));
            }

            let batch_id = st.next_batch;
            st.next_batch += 1;
            let mut lane = BatchLane::new(&campaign.id, credentials, self.shared.config.min_spacing());
            let ids: Vec<String> = attempts.iter().map(|a| a.id.clone()).collect();

            for (attempt, contact) in attempts.into_iter().zip(contacts) {
                let entry = TimelineEntry {
                    fire_at: attempt.scheduled_time,
                    ordinal_index: attempt.ordinal_index,
                    batch_id,
                    attempt_id: attempt.id.clone(),
                };
                st.insert(attempt);
                match contact {
                    Some(contact) => {
                        lane.admit(&entry.attempt_id, contact);
                        st.timeline.push(entry);
                    }
                    None => {
                        let failed = AttemptStatus::Failed(reasons::CONTACT_NOT_FOUND.into());
                        changes.push(st.transition(&entry.attempt_id, failed)?);
                    }
                }
            }

            tracing::info!(
                "🗓️ Batch {batch_id} admitted for '{}': {} scheduled, {} failed at admission",
                campaign.name,
                lane.outstanding(),
                changes.len()
            );
            if !lane.is_drained() {
                st.lanes.insert(batch_id, lane);
            }
            ids.iter()
                .filter_map(|id| st.attempts.get(id).cloned())
                .collect::<Vec<_>>()
        };

        self.shared.publish(changes);
        self.shared.wake.notify_one();
        Ok(admitted)
    }

    // ─── Cancellation ─────────────────────────────────────────

    /// Fail every still-pending attempt of a campaign with "cancelled".
    /// Attempts already calling are left to finish.
    pub async fn cancel_pending(&self, campaign_id: &str) -> usize {
        let mut changes = Vec::new();
        {
            let mut guard = self.shared.state.lock().await;
            let st = &mut *guard;
            let pending: Vec<String> = st
                .order
                .iter()
                .filter(|id| {
                    st.attempts.get(*id).is_some_and(|a| {
                        a.campaign_id == campaign_id && a.status == AttemptStatus::Pending
                    })
                })
                .cloned()
                .collect();

            for id in &pending {
                if let Ok(change) = st.transition(id, AttemptStatus::Failed(reasons::CANCELLED.into())) {
                    changes.push(change);
                }
                for lane in st.lanes.values_mut() {
                    if lane.drop_attempt(id) {
                        break;
                    }
                }
            }
            let attempts = &st.attempts;
            let purged = st.timeline.retain(|e| {
                attempts
                    .get(&e.attempt_id)
                    .is_some_and(|a| a.status == AttemptStatus::Pending)
            });
            st.lanes.retain(|_, lane| !lane.is_drained());
            tracing::debug!("🧹 Purged {purged} timeline entries for campaign {campaign_id}");
        }

        let count = changes.len();
        if count > 0 {
            tracing::info!("🛑 Cancelled {count} pending attempt(s) of campaign {campaign_id}");
        }
        self.shared.publish(changes);
        self.shared.wake.notify_one();
        count
    }

    // ─── Campaigns ────────────────────────────────────────────

    /// Create and register an `Active` campaign.
    pub async fn create_campaign(
        &self,
        name: &str,
        description: &str,
        contact_ids: &[String],
    ) -> Result<Campaign> {
        let campaign = Campaign::new(name, description, contact_ids)?;
        self.shared.campaigns.write().await.insert(campaign.clone());
        Ok(campaign)
    }

    /// Register an existing campaign (e.g. loaded from storage).
    pub async fn add_campaign(&self, campaign: Campaign) {
        self.shared.campaigns.write().await.insert(campaign);
    }

    pub async fn campaign(&self, id: &str) -> Option<Campaign> {
        self.shared.campaigns.read().await.get(id).cloned()
    }

    pub async fn campaigns(&self) -> Vec<Campaign> {
        self.shared
            .campaigns
            .read()
            .await
            .list()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn activate_campaign(&self, id: &str) -> Result<Campaign> {
        self.shared.campaigns.write().await.set_status(id, CampaignStatus::Active)
    }

    /// Pause a campaign. New dispatches are refused; admitted attempts still fire.
    pub async fn pause_campaign(&self, id: &str) -> Result<Campaign> {
        self.shared.campaigns.write().await.set_status(id, CampaignStatus::Paused)
    }

    /// Flip between `Active` and `Paused`.
    pub async fn toggle_campaign(&self, id: &str) -> Result<Campaign> {
        self.shared.campaigns.write().await.toggle(id)
    }

    pub async fn complete_campaign(&self, id: &str) -> Result<Campaign> {
        self.shared.campaigns.write().await.set_status(id, CampaignStatus::Completed)
    }

    /// Remove a campaign. Its attempts stay queryable and keep running.
    pub async fn delete_campaign(&self, id: &str) -> Result<Campaign> {
        self.shared
            .campaigns
            .write()
            .await
            .remove(id)
            .ok_or_else(|| RingflowError::NotFound(format!("campaign '{id}'")))
    }

    /// Call every contact of the campaign now, one spacing window apart.
    pub async fn start_campaign(&self, id: &str) -> Result<Vec<Attempt>> {
        // Credentials first, before anything is built.
        self.shared.credentials.credential_bundle()?;
        let campaign = self.require_active(id).await?;
        self.submit_campaign_dispatch(
            id,
            &campaign.contact_ids,
            DispatchParams::new(DispatchPolicy::Immediate),
        )
        .await
    }

    /// Pause the campaign and cancel whatever has not started yet.
    pub async fn stop_campaign(&self, id: &str) -> Result<usize> {
        self.pause_campaign(id).await?;
        Ok(self.cancel_pending(id).await)
    }

    // ─── Queries ──────────────────────────────────────────────

    pub async fn attempt(&self, id: &str) -> Option<Attempt> {
        self.shared.state.lock().await.attempts.get(id).cloned()
    }

    /// All attempts in admission order.
    pub async fn attempts(&self) -> Vec<Attempt> {
        let st = self.shared.state.lock().await;
        st.order
            .iter()
            .filter_map(|id| st.attempts.get(id).cloned())
            .collect()
    }

    /// Attempts of one campaign, in admission order.
    pub async fn attempts_for(&self, campaign_id: &str) -> Vec<Attempt> {
        let st = self.shared.state.lock().await;
        st.order
            .iter()
            .filter_map(|id| st.attempts.get(id))
            .filter(|a| a.campaign_id == campaign_id)
            .cloned()
            .collect()
    }

    /// Recent status changes, oldest first.
    pub async fn history(&self) -> Vec<StatusChange> {
        self.shared.state.lock().await.log.snapshot()
    }

    pub async fn stats(&self) -> DispatchStats {
        let (active, total) = {
            let campaigns = self.shared.campaigns.read().await;
            (campaigns.active_count(), campaigns.count())
        };
        let st = self.shared.state.lock().await;
        DispatchStats::collect(st.attempts.values(), active, total)
    }

    pub async fn lane_stats(&self) -> Vec<LaneStats> {
        let st = self.shared.state.lock().await;
        let mut stats: Vec<_> = st.lanes.iter().map(|(id, lane)| lane.stats(*id)).collect();
        stats.sort_by_key(|s| s.batch_id);
        stats
    }

    /// Attempts not yet terminal.
    pub async fn unsettled_count(&self) -> usize {
        let st = self.shared.state.lock().await;
        st.attempts.values().filter(|a| !a.status.is_terminal()).count()
    }

    /// Wait until every listed attempt is `Completed` or `Failed`.
    pub async fn wait_settled(&self, attempt_ids: &[String]) {
        let mut events = self.subscribe();
        loop {
            {
                let st = self.shared.state.lock().await;
                let settled = attempt_ids.iter().all(|id| {
                    st.attempts.get(id).is_none_or(|a| a.status.is_terminal())
                });
                if settled {
                    return;
                }
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    // ─── Restore ──────────────────────────────────────────────

    /// Load persisted campaigns and attempts. Attempts a previous process
    /// left pending or calling are failed with "interrupted".
    /// Returns how many were interrupted.
    pub async fn restore(&self, campaigns: Vec<Campaign>, attempts: Vec<Attempt>) -> usize {
        self.ingest(campaigns, attempts, true).await
    }

    /// Load persisted state for inspection only. Statuses are kept as stored,
    /// so a dispatch still running in another process is left untouched.
    pub async fn load(&self, campaigns: Vec<Campaign>, attempts: Vec<Attempt>) {
        self.ingest(campaigns, attempts, false).await;
    }

    async fn ingest(&self, campaigns: Vec<Campaign>, attempts: Vec<Attempt>, interrupt: bool) -> usize {
        {
            let mut registry = self.shared.campaigns.write().await;
            for campaign in campaigns {
                registry.insert(campaign);
            }
        }

        let mut changes = Vec::new();
        {
            let mut st = self.shared.state.lock().await;
            for attempt in attempts {
                if st.attempts.contains_key(&attempt.id) {
                    continue;
                }
                let id = attempt.id.clone();
                let unfinished = !attempt.status.is_terminal();
                st.insert(attempt);
                if interrupt && unfinished {
                    let failed = AttemptStatus::Failed(reasons::INTERRUPTED.into());
                    if let Ok(change) = st.transition(&id, failed) {
                        changes.push(change);
                    }
                }
            }
        }

        let interrupted = changes.len();
        if interrupted > 0 {
            tracing::warn!("⚠️ {interrupted} attempt(s) from a previous run marked interrupted");
        }
        self.shared.publish(changes);
        interrupted
    }
}
