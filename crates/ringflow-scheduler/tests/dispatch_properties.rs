//! End-to-end dispatch behaviour: ordering, spacing, isolation between
//! batches, cancellation and failure handling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ringflow_core::config::DispatchConfig;
use ringflow_core::error::{Result, RingflowError};
use ringflow_core::types::{CallReceipt, CallRequest, Contact, CredentialBundle};
use ringflow_core::{CallInvoker, MemoryDirectory};
use ringflow_scheduler::{AttemptStatus, DispatchEngine, DispatchParams, DispatchPolicy};
use tokio::time::Instant;

#[derive(Clone, Copy)]
enum Behaviour {
    Answer,
    Fail,
    Hang,
}

/// Records which contact was called and when.
struct Recorder {
    behaviour: Behaviour,
    calls: Mutex<Vec<(String, Instant)>>,
    /// Wall-clock time of each call, for comparing against fire times.
    wall_clock: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl Recorder {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: Mutex::new(Vec::new()),
            wall_clock: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    fn wall_clock(&self) -> Vec<(String, DateTime<Utc>)> {
        self.wall_clock.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallInvoker for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn invoke(&self, request: CallRequest<'_>) -> Result<CallReceipt> {
        self.calls
            .lock()
            .unwrap()
            .push((request.contact.id.clone(), Instant::now()));
        self.wall_clock
            .lock()
            .unwrap()
            .push((request.contact.id.clone(), Utc::now()));
        match self.behaviour {
            Behaviour::Answer => Ok(CallReceipt {
                provider_ref: Some(format!("CA-{}", request.contact.id)),
            }),
            Behaviour::Fail => Err(RingflowError::Invocation("line busy".into())),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(CallReceipt::default())
            }
        }
    }
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn directory(list: &[&str]) -> Arc<MemoryDirectory> {
    Arc::new(MemoryDirectory::new(
        list.iter()
            .map(|id| Contact::new(id, &format!("Contact {id}"), &format!("+9198000000{id}"))),
    ))
}

async fn engine_with(
    contacts: &[&str],
    config: DispatchConfig,
    invoker: Arc<Recorder>,
) -> DispatchEngine {
    let engine = DispatchEngine::new(
        config,
        directory(contacts),
        Arc::new(CredentialBundle::new("AC1", "secret", "+15550001111")),
        invoker,
    );
    engine.start().await.unwrap();
    engine
}

#[tokio::test(start_paused = true)]
async fn test_missing_contact_fails_alone() {
    let recorder = Recorder::new(Behaviour::Answer);
    let engine = engine_with(&["1", "2", "4", "5"], DispatchConfig::default(), recorder.clone()).await;
    let selection = ids(&["1", "2", "3", "4", "5"]);
    let campaign = engine.create_campaign("Ward 7", "", &selection).await.unwrap();

    let attempts = engine
        .submit_campaign_dispatch(&campaign.id, &selection, DispatchParams::new(DispatchPolicy::Immediate))
        .await
        .unwrap();
    assert_eq!(attempts.len(), 5);
    assert_eq!(
        attempts[2].status,
        AttemptStatus::Failed("contact not found".into())
    );

    let attempt_ids: Vec<String> = attempts.iter().map(|a| a.id.clone()).collect();
    engine.wait_settled(&attempt_ids).await;

    for (i, id) in attempt_ids.iter().enumerate() {
        let attempt = engine.attempt(id).await.unwrap();
        if i == 2 {
            assert_eq!(attempt.status.failure_reason(), Some("contact not found"));
        } else {
            assert_eq!(attempt.status, AttemptStatus::Completed);
            assert_eq!(attempt.provider_ref, Some(format!("CA-{}", attempt.contact_id)));
        }
    }
    assert_eq!(recorder.calls().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_calls_fire_in_order_with_spacing() {
    let recorder = Recorder::new(Behaviour::Answer);
    let engine = engine_with(&["1", "2", "3"], DispatchConfig::default(), recorder.clone()).await;
    let selection = ids(&["3", "1", "2"]);
    let campaign = engine.create_campaign("Spacing", "", &selection).await.unwrap();

    let attempts = engine
        .submit_campaign_dispatch(&campaign.id, &selection, DispatchParams::new(DispatchPolicy::Immediate))
        .await
        .unwrap();
    let attempt_ids: Vec<String> = attempts.iter().map(|a| a.id.clone()).collect();
    engine.wait_settled(&attempt_ids).await;

    let calls = recorder.calls();
    let order: Vec<&str> = calls.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(order, vec!["3", "1", "2"]);
    for pair in calls.windows(2) {
        assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(3000));
    }
}

#[tokio::test(start_paused = true)]
async fn test_batches_do_not_share_spacing() {
    let recorder = Recorder::new(Behaviour::Answer);
    let engine = engine_with(&["a1", "a2", "b1", "b2"], DispatchConfig::default(), recorder.clone()).await;
    let first = engine.create_campaign("A", "", &ids(&["a1", "a2"])).await.unwrap();
    let second = engine.create_campaign("B", "", &ids(&["b1", "b2"])).await.unwrap();

    let started = Instant::now();
    let mut all = Vec::new();
    for (campaign, selection) in [(&first, ids(&["a1", "a2"])), (&second, ids(&["b1", "b2"]))] {
        let attempts = engine
            .submit_campaign_dispatch(&campaign.id, &selection, DispatchParams::new(DispatchPolicy::Immediate))
            .await
            .unwrap();
        all.extend(attempts.into_iter().map(|a| a.id));
    }
    engine.wait_settled(&all).await;

    let fired: HashMap<String, Instant> = recorder.calls().into_iter().collect();
    assert!(fired["a1"] - started < Duration::from_millis(3000));
    assert!(fired["b1"] - started < Duration::from_millis(3000));
    assert!(fired["a2"] - fired["a1"] >= Duration::from_millis(3000));
    assert!(fired["b2"] - fired["b1"] >= Duration::from_millis(3000));
}

#[tokio::test]
async fn test_future_batch_fires_on_time_in_order() {
    let recorder = Recorder::new(Behaviour::Answer);
    let config = DispatchConfig {
        min_spacing_ms: 300,
        ..DispatchConfig::default()
    };
    let engine = engine_with(&["1", "2"], config, recorder.clone()).await;
    let selection = ids(&["1", "2"]);
    let campaign = engine.create_campaign("Evening", "", &selection).await.unwrap();
    let start = Utc::now() + chrono::Duration::milliseconds(1500);

    let attempts = engine
        .submit_campaign_dispatch(
            &campaign.id,
            &selection,
            DispatchParams::new(DispatchPolicy::ScheduledForLater { start }),
        )
        .await
        .unwrap();
    let attempt_ids: Vec<String> = attempts.iter().map(|a| a.id.clone()).collect();
    assert!(recorder.calls().is_empty());

    tokio::time::timeout(Duration::from_secs(10), engine.wait_settled(&attempt_ids))
        .await
        .unwrap();

    let wall_clock = recorder.wall_clock();
    let order: Vec<&str> = wall_clock.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(order, vec!["1", "2"]);
    for (attempt, (contact_id, called_at)) in attempts.iter().zip(&wall_clock) {
        assert_eq!(&attempt.contact_id, contact_id);
        assert_eq!(attempt.scheduled_time, start);
        assert!(*called_at >= attempt.scheduled_time);
    }
    let calls = recorder.calls();
    assert!(calls[1].1 - calls[0].1 >= Duration::from_millis(300));
    for id in &attempt_ids {
        assert_eq!(engine.attempt(id).await.unwrap().status, AttemptStatus::Completed);
    }
}

#[tokio::test]
async fn test_cancel_before_fire_time() {
    let recorder = Recorder::new(Behaviour::Answer);
    let engine = engine_with(&["1", "2", "3", "4"], DispatchConfig::default(), recorder.clone()).await;
    let selection = ids(&["1", "2", "3", "4"]);
    let campaign = engine.create_campaign("Later", "", &selection).await.unwrap();
    let start = Utc::now() + chrono::Duration::hours(1);

    let attempts = engine
        .submit_campaign_dispatch(
            &campaign.id,
            &selection,
            DispatchParams::new(DispatchPolicy::ScheduledForLater { start }),
        )
        .await
        .unwrap();
    assert!(attempts.iter().all(|a| a.scheduled_time == start));

    assert_eq!(engine.cancel_pending(&campaign.id).await, 4);
    for attempt in engine.attempts_for(&campaign.id).await {
        assert_eq!(attempt.status.failure_reason(), Some("cancelled"));
    }
    assert!(engine.history().await.iter().all(|c| c.new_status != AttemptStatus::Calling));
    assert!(recorder.calls().is_empty());
    assert_eq!(engine.cancel_pending(&campaign.id).await, 0);
}

#[tokio::test]
async fn test_cancel_leaves_other_campaigns_alone() {
    let recorder = Recorder::new(Behaviour::Answer);
    let engine = engine_with(&["1", "2"], DispatchConfig::default(), recorder).await;
    let selection = ids(&["1", "2"]);
    let first = engine.create_campaign("One", "", &selection).await.unwrap();
    let second = engine.create_campaign("Two", "", &selection).await.unwrap();
    let start = Utc::now() + chrono::Duration::hours(2);
    let params = DispatchParams::new(DispatchPolicy::ScheduledForLater { start });

    engine.submit_campaign_dispatch(&first.id, &selection, params.clone()).await.unwrap();
    engine.submit_campaign_dispatch(&second.id, &selection, params).await.unwrap();

    assert_eq!(engine.cancel_pending(&first.id).await, 2);
    assert!(
        engine
            .attempts_for(&second.id)
            .await
            .iter()
            .all(|a| a.status == AttemptStatus::Pending)
    );
}

#[tokio::test]
async fn test_empty_selection_rejected() {
    let engine = engine_with(&["1"], DispatchConfig::default(), Recorder::new(Behaviour::Answer)).await;
    let campaign = engine.create_campaign("Empty", "", &ids(&["1"])).await.unwrap();

    let err = engine
        .submit_campaign_dispatch(&campaign.id, &[], DispatchParams::new(DispatchPolicy::Immediate))
        .await
        .unwrap_err();
    assert!(matches!(err, RingflowError::Validation(_)));
    assert!(engine.attempts().await.is_empty());
}

#[tokio::test]
async fn test_stagger_fire_times() {
    let engine = engine_with(&["1", "2", "3"], DispatchConfig::default(), Recorder::new(Behaviour::Answer)).await;
    let selection = ids(&["1", "2", "3"]);
    let campaign = engine.create_campaign("Stagger", "", &selection).await.unwrap();
    let start = Utc::now() + chrono::Duration::hours(1);

    let attempts = engine
        .submit_campaign_dispatch(
            &campaign.id,
            &selection,
            DispatchParams::new(DispatchPolicy::Staggered { start, interval_minutes: 5 }),
        )
        .await
        .unwrap();
    for (i, attempt) in attempts.iter().enumerate() {
        assert_eq!(attempt.ordinal_index, i);
        assert_eq!(attempt.scheduled_time, start + chrono::Duration::minutes(5 * i as i64));
        assert_eq!(attempt.interval_minutes, Some(5));
    }

    // Out-of-range intervals are clamped, not rejected.
    let attempts = engine
        .submit_campaign_dispatch(
            &campaign.id,
            &selection,
            DispatchParams::new(DispatchPolicy::Staggered { start, interval_minutes: 90 }),
        )
        .await
        .unwrap();
    assert_eq!(attempts[2].scheduled_time, start + chrono::Duration::minutes(120));
    engine.cancel_pending(&campaign.id).await;
}

#[tokio::test(start_paused = true)]
async fn test_invoker_failure_and_timeout() {
    let failing = Recorder::new(Behaviour::Fail);
    let engine = engine_with(&["1"], DispatchConfig::default(), failing).await;
    let campaign = engine.create_campaign("Busy", "", &ids(&["1"])).await.unwrap();
    let attempts = engine
        .submit_campaign_dispatch(&campaign.id, &ids(&["1"]), DispatchParams::new(DispatchPolicy::Immediate))
        .await
        .unwrap();
    engine.wait_settled(&[attempts[0].id.clone()]).await;
    let failed = engine.attempt(&attempts[0].id).await.unwrap();
    assert!(failed.status.failure_reason().unwrap().contains("line busy"));

    let config = DispatchConfig {
        invocation_timeout_secs: 2,
        ..DispatchConfig::default()
    };
    let engine = engine_with(&["1"], config, Recorder::new(Behaviour::Hang)).await;
    let campaign = engine.create_campaign("Silent", "", &ids(&["1"])).await.unwrap();
    let attempts = engine
        .submit_campaign_dispatch(&campaign.id, &ids(&["1"]), DispatchParams::new(DispatchPolicy::Immediate))
        .await
        .unwrap();
    engine.wait_settled(&[attempts[0].id.clone()]).await;
    let timed_out = engine.attempt(&attempts[0].id).await.unwrap();
    assert!(timed_out.status.failure_reason().unwrap().contains("no response within 2s"));
}

#[tokio::test(start_paused = true)]
async fn test_terminal_attempts_never_change() {
    let engine = engine_with(&["1", "2"], DispatchConfig::default(), Recorder::new(Behaviour::Answer)).await;
    let selection = ids(&["1", "2"]);
    let campaign = engine.create_campaign("Once", "", &selection).await.unwrap();
    let mut events = engine.subscribe();

    let attempts = engine
        .submit_campaign_dispatch(&campaign.id, &selection, DispatchParams::new(DispatchPolicy::Immediate))
        .await
        .unwrap();
    let attempt_ids: Vec<String> = attempts.iter().map(|a| a.id.clone()).collect();
    engine.wait_settled(&attempt_ids).await;
    assert_eq!(engine.cancel_pending(&campaign.id).await, 0);

    let mut seen: HashMap<String, Vec<AttemptStatus>> = HashMap::new();
    while let Ok(change) = events.try_recv() {
        seen.entry(change.attempt_id).or_default().push(change.new_status);
    }
    for id in &attempt_ids {
        assert_eq!(seen[id], vec![AttemptStatus::Calling, AttemptStatus::Completed]);
    }
    let stats = engine.stats().await;
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.success_rate, 100);
}
