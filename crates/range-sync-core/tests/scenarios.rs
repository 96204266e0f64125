//! End-to-end scenario tests covering the core lifecycle scenarios:
//! single-step success, two-step success, compensation, conflict,
//! producer saturation, and disconnect mid-saga.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use range_sync_core::{
    Action, ConnectionHandler, Event, EventProcessor, EventQueue, Registry, Rule, RuleMatch,
    RuleMatcher, RuleSet, SagaEngine, SagaStatus, SendHandle,
};
use serde_json::{json, Value};

struct RecordingHandle {
    sent: Mutex<Vec<Value>>,
}

impl RecordingHandle {
    fn new() -> Arc<Self> {
        Arc::new(RecordingHandle { sent: Mutex::new(Vec::new()) })
    }

    fn frames(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SendHandle for RecordingHandle {
    async fn send(&self, envelope: Value) -> Result<(), String> {
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }
}

fn single_action_rule_set(target: &str, command: &str) -> RuleSet {
    RuleSet {
        name: "single-step".to_string(),
        rules: vec![Rule {
            when: RuleMatch {
                event_type: "attack.detected".to_string(),
                from: Some("cyber".to_string()),
            },
            then: vec![Action {
                target: target.to_string(),
                command: command.to_string(),
                params: json!({"msg": "!"}),
                compensate_command: None,
                compensate_params: None,
            }],
        }],
    }
}

/// Scenario 1: single-step success.
#[tokio::test]
async fn scenario_single_step_success() {
    let registry = Arc::new(Registry::new());
    let sagas = SagaEngine::new(registry.clone());
    registry.set_connection_loss_hook(sagas.clone()).await;

    let vr = RecordingHandle::new();
    registry.register("vr".to_string(), "VR Rig".to_string(), vr.clone()).await;
    registry.register("cyber".to_string(), "Cyber Range".to_string(), RecordingHandle::new()).await;

    let matcher = Arc::new(RuleMatcher::new(single_action_rule_set("vr", "show_alert")));
    let queue = Arc::new(EventQueue::new(1000));
    let handler = ConnectionHandler::new(registry.clone(), queue.clone(), sagas.clone());
    let processor = EventProcessor::new(matcher, sagas.clone());

    let outcome = handler
        .handle_frame("cyber", r#"{"type":"event","event_type":"attack.detected","payload":{}}"#)
        .await;
    assert_eq!(outcome, range_sync_core::DispatchOutcome::EventEnqueued);
    queue.close();
    processor.run(queue).await;

    let frames = vr.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "command");
    assert_eq!(frames[0]["command"], "show_alert");
    assert_eq!(frames[0]["params"], json!({"msg": "!"}));
    assert_eq!(frames[0]["step_id"], 0);
    let saga_id = frames[0]["saga_id"].as_str().unwrap().to_string();

    handler
        .handle_frame("vr", &format!(r#"{{"type":"step.completed","saga_id":"{saga_id}","step_id":0}}"#))
        .await;

    let saga = sagas.snapshot().await.into_iter().find(|s| s.saga_id.0 == saga_id).unwrap();
    assert_eq!(saga.status, SagaStatus::Completed);
}

/// Scenario 2: two-step success — step 1 is only dispatched after
/// step 0's ack arrives.
#[tokio::test]
async fn scenario_two_step_success() {
    let registry = Arc::new(Registry::new());
    let sagas = SagaEngine::new(registry.clone());
    registry.set_connection_loss_hook(sagas.clone()).await;

    let vr = RecordingHandle::new();
    let sensor = RecordingHandle::new();
    registry.register("vr".to_string(), "VR Rig".to_string(), vr.clone()).await;
    registry.register("sensor".to_string(), "Sensor Rig".to_string(), sensor.clone()).await;

    let saga_id = sagas
        .create_saga(vec![
            Action {
                target: "vr".to_string(),
                command: "A".to_string(),
                params: json!({}),
                compensate_command: None,
                compensate_params: None,
            },
            Action {
                target: "sensor".to_string(),
                command: "B".to_string(),
                params: json!({}),
                compensate_command: None,
                compensate_params: None,
            },
        ])
        .await
        .unwrap();

    assert_eq!(vr.frames().len(), 1);
    assert_eq!(sensor.frames().len(), 0);

    sagas.on_step_completed(saga_id.clone(), 0).await;
    assert_eq!(sensor.frames().len(), 1);
    assert_eq!(sensor.frames()[0]["command"], "B");

    sagas.on_step_completed(saga_id.clone(), 1).await;
    let saga = sagas.snapshot().await.into_iter().find(|s| s.saga_id == saga_id).unwrap();
    assert_eq!(saga.status, SagaStatus::Completed);
}

/// Scenario 3: compensation — a step failure after one completion
/// sends exactly one compensating frame for the completed step.
#[tokio::test]
async fn scenario_compensation_unwinds_only_completed_steps() {
    let registry = Arc::new(Registry::new());
    let sagas = SagaEngine::new(registry.clone());
    registry.set_connection_loss_hook(sagas.clone()).await;

    let vr = RecordingHandle::new();
    let sensor = RecordingHandle::new();
    registry.register("vr".to_string(), "VR Rig".to_string(), vr.clone()).await;
    registry.register("sensor".to_string(), "Sensor Rig".to_string(), sensor.clone()).await;

    let saga_id = sagas
        .create_saga(vec![
            Action {
                target: "vr".to_string(),
                command: "on".to_string(),
                params: json!({}),
                compensate_command: Some("off".to_string()),
                compensate_params: Some(json!({})),
            },
            Action {
                target: "sensor".to_string(),
                command: "activate".to_string(),
                params: json!({}),
                compensate_command: Some("deactivate".to_string()),
                compensate_params: Some(json!({})),
            },
        ])
        .await
        .unwrap();

    sagas.on_step_completed(saga_id.clone(), 0).await;
    sagas.on_step_failed(saga_id.clone(), 1).await;

    let vr_frames = vr.frames();
    // index 0: original "on" dispatch, index 1: compensating "off".
    assert_eq!(vr_frames.len(), 2);
    assert_eq!(vr_frames[1]["command"], "off");
    assert_eq!(vr_frames[1]["step_id"], 0);

    // sensor only ever saw the original "activate" — no compensation,
    // because its step never reached Completed.
    let sensor_frames = sensor.frames();
    assert_eq!(sensor_frames.len(), 1);
    assert_eq!(sensor_frames[0]["command"], "activate");

    let saga = sagas.snapshot().await.into_iter().find(|s| s.saga_id == saga_id).unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);
}

/// Scenario 4: conflict — a second saga targeting a busy simulation
/// is rejected with no outbound traffic; once the first saga
/// completes, a third identical event proceeds normally.
#[tokio::test]
async fn scenario_conflict_then_recovery() {
    let registry = Arc::new(Registry::new());
    let sagas = SagaEngine::new(registry.clone());
    registry.set_connection_loss_hook(sagas.clone()).await;

    let vr = RecordingHandle::new();
    registry.register("vr".to_string(), "VR Rig".to_string(), vr.clone()).await;

    let action = || Action {
        target: "vr".to_string(),
        command: "show_alert".to_string(),
        params: json!({}),
        compensate_command: None,
        compensate_params: None,
    };

    let first = sagas.create_saga(vec![action()]).await.unwrap();
    assert_eq!(vr.frames().len(), 1);

    let conflict = sagas.create_saga(vec![action()]).await;
    assert!(conflict.is_err());
    assert_eq!(vr.frames().len(), 1, "no outbound frame for the conflicting saga");

    sagas.on_step_completed(first, 0).await;

    let third = sagas.create_saga(vec![action()]).await;
    assert!(third.is_ok());
    assert_eq!(vr.frames().len(), 2);
}

/// Scenario 5: producer saturation — a stalled consumer means the
/// 5th of 5 rapid-fire events on a capacity-4 queue is rejected with
/// exactly one `error/queue_full` reply, and that 5th event never
/// creates a saga even after the consumer unblocks.
#[tokio::test]
async fn scenario_producer_saturation() {
    let registry = Arc::new(Registry::new());
    let sagas = SagaEngine::new(registry.clone());
    registry.set_connection_loss_hook(sagas.clone()).await;

    let vr = RecordingHandle::new();
    registry.register("vr".to_string(), "VR Rig".to_string(), vr.clone()).await;
    let producer = RecordingHandle::new();
    registry.register("cyber".to_string(), "Cyber Range".to_string(), producer.clone()).await;

    let queue = Arc::new(EventQueue::new(4));
    let handler = ConnectionHandler::new(registry.clone(), queue.clone(), sagas.clone());

    let mut outcomes = Vec::new();
    for i in 0..5 {
        let outcome = handler
            .handle_frame(
                "cyber",
                &format!(r#"{{"type":"event","event_type":"attack.detected.{i}","payload":{{}}}}"#),
            )
            .await;
        outcomes.push(outcome);
    }

    assert_eq!(
        outcomes,
        vec![
            range_sync_core::DispatchOutcome::EventEnqueued,
            range_sync_core::DispatchOutcome::EventEnqueued,
            range_sync_core::DispatchOutcome::EventEnqueued,
            range_sync_core::DispatchOutcome::EventEnqueued,
            range_sync_core::DispatchOutcome::EventRejected,
        ]
    );

    let producer_frames = producer.frames();
    assert_eq!(producer_frames.len(), 1);
    assert_eq!(producer_frames[0]["type"], "error");
    assert_eq!(producer_frames[0]["status"], "queue_full");

    // Rule set would match "attack.detected.4" too, but it was never
    // enqueued, so draining the queue must not produce a 5th saga.
    let rule_set = RuleSet {
        name: "saturation".to_string(),
        rules: (0..5)
            .map(|i| Rule {
                when: RuleMatch { event_type: format!("attack.detected.{i}"), from: None },
                then: vec![Action {
                    target: "vr".to_string(),
                    command: "show_alert".to_string(),
                    params: json!({}),
                    compensate_command: None,
                    compensate_params: None,
                }],
            })
            .collect(),
    };
    let matcher = Arc::new(RuleMatcher::new(rule_set));
    let processor = EventProcessor::new(matcher, sagas.clone());
    queue.close();
    processor.run(queue).await;

    assert_eq!(vr.frames().len(), 4, "only the 4 accepted events create sagas");
}

/// Scenario 6: disconnect mid-saga — the in-flight step's target
/// disappears before acking; the saga fails without compensation
/// (step 0 never completed) and its lock is released.
#[tokio::test]
async fn scenario_disconnect_mid_saga() {
    let registry = Arc::new(Registry::new());
    let sagas = SagaEngine::new(registry.clone());
    registry.set_connection_loss_hook(sagas.clone()).await;

    let vr = RecordingHandle::new();
    registry.register("vr".to_string(), "VR Rig".to_string(), vr.clone()).await;

    let saga_id = sagas
        .create_saga(vec![Action {
            target: "vr".to_string(),
            command: "on".to_string(),
            params: json!({}),
            compensate_command: Some("off".to_string()),
            compensate_params: None,
        }])
        .await
        .unwrap();
    assert_eq!(vr.frames().len(), 1);

    registry.unregister("vr").await;

    let saga = sagas.snapshot().await.into_iter().find(|s| s.saga_id == saga_id).unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);
    // No compensation attempted: step 0 never reached Completed, so
    // the only frame ever sent to "vr" is the original dispatch (the
    // handle is already gone from the registry anyway).
    assert_eq!(vr.frames().len(), 1);
}

/// A rule with no matching event produces no saga and no outbound
/// traffic (boundary behavior from the testable-properties section).
#[tokio::test]
async fn no_matching_rule_produces_no_saga() {
    let registry = Arc::new(Registry::new());
    let sagas = SagaEngine::new(registry.clone());
    registry.set_connection_loss_hook(sagas.clone()).await;
    let vr = RecordingHandle::new();
    registry.register("vr".to_string(), "VR Rig".to_string(), vr.clone()).await;

    let matcher = Arc::new(RuleMatcher::new(single_action_rule_set("vr", "show_alert")));
    let queue = Arc::new(EventQueue::new(10));
    queue.enqueue(Event {
        source: "cyber".to_string(),
        event_type: "nothing.interesting".to_string(),
        payload: json!({}),
    });
    queue.close();

    let processor = EventProcessor::new(matcher, sagas.clone());
    processor.run(queue).await;

    assert!(vr.frames().is_empty());
    assert!(sagas.snapshot().await.is_empty());
}

/// Delivering the same `step.completed` twice is equivalent to
/// delivering it once (idempotence law).
#[tokio::test]
async fn duplicate_ack_is_idempotent_end_to_end() {
    let counter = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(Registry::new());
    let sagas = SagaEngine::new(registry.clone());
    registry.set_connection_loss_hook(sagas.clone()).await;
    let vr = RecordingHandle::new();
    registry.register("vr".to_string(), "VR Rig".to_string(), vr.clone()).await;

    let saga_id = sagas
        .create_saga(vec![Action {
            target: "vr".to_string(),
            command: "show_alert".to_string(),
            params: json!({}),
            compensate_command: None,
            compensate_params: None,
        }])
        .await
        .unwrap();

    sagas.on_step_completed(saga_id.clone(), 0).await;
    counter.fetch_add(1, Ordering::SeqCst);
    sagas.on_step_completed(saga_id.clone(), 0).await;

    let saga = sagas.snapshot().await.into_iter().find(|s| s.saga_id == saga_id).unwrap();
    assert_eq!(saga.status, SagaStatus::Completed);
    assert_eq!(saga.steps[0].status, range_sync_core::StepStatus::Completed);
}
