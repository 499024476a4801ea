//! Dispatch worker: the engine's timer loop.
//!
//! Each pass moves due timeline entries into their batch lanes, releases at
//! most one attempt per lane (spacing guard), flips it to `Calling` and hands
//! the call to a spawned task. Outcomes come back over an mpsc channel and
//! are applied here, so the loop never blocks on network latency.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ringflow_core::error::{Result, RingflowError};
use ringflow_core::types::{CallReceipt, CallRequest, Contact, CredentialBundle};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::attempt::AttemptStatus;
use crate::engine::Shared;

/// Result of one invocation, sent back to the worker.
#[derive(Debug)]
pub(crate) struct InvocationOutcome {
    pub attempt_id: String,
    pub result: Result<CallReceipt>,
}

/// Everything a spawned invocation task owns.
struct InvocationJob {
    attempt_id: String,
    contact: Contact,
    credentials: CredentialBundle,
    message: Option<String>,
    repeat_count: u32,
}

/// Run until shutdown is signalled.
pub(crate) async fn run(
    shared: Arc<Shared>,
    mut outcomes: mpsc::UnboundedReceiver<InvocationOutcome>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        "⏰ Dispatch worker started (spacing {}ms, invoker '{}', timeout {}s)",
        shared.config.min_spacing_ms,
        shared.invoker.name(),
        shared.config.invocation_timeout_secs
    );

    loop {
        let next_wake = advance(&shared).await;
        let sleep = async {
            match next_wake {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = sleep => {}
            _ = shared.wake.notified() => {}
            Some(outcome) = outcomes.recv() => apply_outcome(&shared, outcome).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("⏹️ Dispatch worker stopped");
}

/// One scheduling pass. Returns when the worker should look again.
async fn advance(shared: &Arc<Shared>) -> Option<Instant> {
    let now_utc = Utc::now();
    let now = Instant::now();
    let mut jobs = Vec::new();
    let mut changes = Vec::new();

    let next_wake = {
        let mut guard = shared.state.lock().await;
        let st = &mut *guard;

        for entry in st.timeline.pop_due(now_utc) {
            if !st.is_pending(&entry.attempt_id) {
                continue;
            }
            if let Some(lane) = st.lanes.get_mut(&entry.batch_id) {
                lane.mark_ready(entry.ordinal_index, entry.attempt_id);
            }
        }

        let batch_ids: Vec<u64> = st.lanes.keys().copied().collect();
        for batch_id in batch_ids {
            loop {
                let Some(lane) = st.lanes.get_mut(&batch_id) else { break };
                let Some(release) = lane.release(now) else { break };
                let credentials = lane.credentials.clone();

                // Cancelled in the meantime: skip without using up the window.
                let Ok(change) = st.transition(&release.attempt_id, AttemptStatus::Calling) else {
                    continue;
                };
                if let Some(lane) = st.lanes.get_mut(&batch_id) {
                    lane.mark_fired(now);
                }
                let (message, repeat_count) = st
                    .attempts
                    .get(&release.attempt_id)
                    .map(|a| (a.message.clone(), a.repeat_count))
                    .unwrap_or((None, 1));

                tracing::info!(
                    "📞 Calling {} ({}), attempt {} #{}",
                    release.contact.display_name,
                    release.contact.phone_number,
                    release.attempt_id,
                    release.ordinal_index
                );
                changes.push(change);
                jobs.push(InvocationJob {
                    attempt_id: release.attempt_id,
                    contact: release.contact,
                    credentials,
                    message,
                    repeat_count,
                });
                break;
            }
        }

        st.lanes.retain(|_, lane| !lane.is_drained());

        let lane_wake = st.lanes.values().filter_map(|lane| lane.ready_at(now)).min();
        let timeline_wake = st.timeline.next_fire_at().map(|fire_at| {
            let wait = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            Instant::now() + wait
        });
        match (lane_wake, timeline_wake) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    };

    shared.publish(changes);
    for job in jobs {
        spawn_invocation(shared, job);
    }
    next_wake
}

/// Invoke on a separate task, bounded by the invocation timeout.
fn spawn_invocation(shared: &Arc<Shared>, job: InvocationJob) {
    let invoker = Arc::clone(&shared.invoker);
    let outcomes = shared.outcomes_tx.clone();
    let limit = shared.config.invocation_timeout();
    let attempt_id = job.attempt_id.clone();

    tokio::spawn(async move {
        let mut call = tokio::spawn(async move {
            let request = CallRequest {
                attempt_id: &job.attempt_id,
                contact: &job.contact,
                credentials: &job.credentials,
                message: job.message.as_deref(),
                repeat_count: job.repeat_count,
            };
            invoker.invoke(request).await
        });

        let result = match tokio::time::timeout(limit, &mut call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(RingflowError::Invocation(format!(
                "invoker task aborted: {join_err}"
            ))),
            Err(_) => {
                call.abort();
                Err(RingflowError::Invocation(format!(
                    "no response within {}s",
                    limit.as_secs()
                )))
            }
        };
        let _ = outcomes.send(InvocationOutcome { attempt_id, result });
    });
}

/// Move a calling attempt to its terminal status.
async fn apply_outcome(shared: &Arc<Shared>, outcome: InvocationOutcome) {
    let change = {
        let mut st = shared.state.lock().await;
        match outcome.result {
            Ok(receipt) => {
                if let Some(attempt) = st.attempts.get_mut(&outcome.attempt_id) {
                    attempt.provider_ref = receipt.provider_ref;
                }
                tracing::info!("✅ Call completed: attempt {}", outcome.attempt_id);
                st.transition(&outcome.attempt_id, AttemptStatus::Completed)
            }
            Err(e) => {
                tracing::warn!("⚠️ Call failed: attempt {}: {e}", outcome.attempt_id);
                st.transition(&outcome.attempt_id, AttemptStatus::Failed(e.to_string()))
            }
        }
    };

    match change {
        Ok(change) => shared.publish(vec![change]),
        Err(e) => tracing::debug!("Outcome for {} ignored: {e}", outcome.attempt_id),
    }
}
