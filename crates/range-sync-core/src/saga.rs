//! Saga Engine: creates, advances, fails, and compensates sagas, and
//! owns the per-target exclusion locks that keep concurrently-created
//! sagas from racing over the same simulation.
//!
//! This is the largest component in the engine because it is the only
//! piece whose transitions are driven by external acknowledgments that
//! may arrive on any connection, in any order, or never arrive at all.
//! Every public entry point is written to be idempotent against that
//! uncertainty.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::RangeSyncError;
use crate::metrics::{noop_saga_metrics, SagaMetrics};
use crate::model::{Action, Saga, SagaId, SagaStatus, SagaStep, StepStatus};
use crate::registry::{ConnectionLossHook, Registry};

/// Outcome of applying an inbound `step.completed` to a saga, decided
/// while holding the saga's own lock so the decision and the mutation
/// are atomic; the network/lock work that follows happens after the
/// lock is released.
enum CompletionOutcome {
    /// Duplicate or late ack against a step that wasn't InFlight, or a
    /// saga that had already reached a terminal state. Idempotent
    /// no-op.
    Ignored,
    /// The completed step was the last one; the saga is now Completed.
    SagaCompleted,
    /// There is a next step to dispatch.
    Advance { next_index: usize },
}

/// Owns saga records, per-target exclusion, and drives compensation.
pub struct SagaEngine {
    registry: Arc<Registry>,
    sagas: RwLock<HashMap<SagaId, Arc<AsyncMutex<Saga>>>>,
    /// `target_id -> saga_id` holding it. A short-lived `std::sync`
    /// mutex: acquisition is non-blocking try-lock only and it is
    /// never held across a network write.
    target_locks: StdMutex<HashMap<String, SagaId>>,
    metrics: Arc<dyn SagaMetrics>,
    /// Optional per-step acknowledgment deadline. Expiry synthesizes a
    /// step failure exactly like an explicit `step.failed`. `None`
    /// disables it entirely — the default.
    step_deadline: Option<Duration>,
    /// Lets a spawned deadline-watcher task upgrade back to `Arc<Self>`
    /// without the engine holding a reference to itself strongly.
    self_ref: Weak<SagaEngine>,
}

impl SagaEngine {
    pub fn new(registry: Arc<Registry>) -> Arc<Self> {
        Self::with_deadline(registry, noop_saga_metrics(), None)
    }

    pub fn with_metrics(registry: Arc<Registry>, metrics: Arc<dyn SagaMetrics>) -> Arc<Self> {
        Self::with_deadline(registry, metrics, None)
    }

    /// Full constructor: also takes an optional per-step acknowledgment
    /// deadline. When set, every dispatched step schedules a watcher
    /// that fails the step (and triggers compensation) if it is still
    /// InFlight once the deadline elapses.
    pub fn with_deadline(
        registry: Arc<Registry>,
        metrics: Arc<dyn SagaMetrics>,
        step_deadline: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| SagaEngine {
            registry,
            sagas: RwLock::new(HashMap::new()),
            target_locks: StdMutex::new(HashMap::new()),
            metrics,
            step_deadline,
            self_ref: self_ref.clone(),
        })
    }

    fn next_saga_id(&self) -> SagaId {
        SagaId(uuid::Uuid::new_v4().to_string())
    }

    async fn lookup_saga(&self, saga_id: &SagaId) -> Option<Arc<AsyncMutex<Saga>>> {
        self.sagas.read().await.get(saga_id).cloned()
    }

    /// Read-only snapshot of every tracked saga, terminal or not, for
    /// the observability surface.
    pub async fn snapshot(&self) -> Vec<Saga> {
        let sagas = self.sagas.read().await;
        let mut out = Vec::with_capacity(sagas.len());
        for saga_arc in sagas.values() {
            out.push(saga_arc.lock().await.clone());
        }
        out
    }

    /// Test/tool each distinct target id's exclusion lock and hold
    /// whichever succeed; on first busy target, release everything
    /// acquired so far and report the full busy set. All-or-nothing,
    /// non-blocking.
    fn try_acquire(&self, saga_id: &SagaId, targets: &[String]) -> Result<(), Vec<String>> {
        let mut locks = self.target_locks.lock().unwrap();
        let busy: Vec<String> = targets
            .iter()
            .filter(|t| locks.contains_key(t.as_str()))
            .cloned()
            .collect();
        if !busy.is_empty() {
            return Err(busy);
        }
        for target in targets {
            locks.insert(target.clone(), saga_id.clone());
        }
        Ok(())
    }

    fn release_targets(&self, targets: &[String]) {
        let mut locks = self.target_locks.lock().unwrap();
        for target in targets {
            locks.remove(target);
        }
    }

    async fn release_saga_locks(&self, saga_id: &SagaId) {
        if let Some(saga_arc) = self.lookup_saga(saga_id).await {
            let targets = saga_arc.lock().await.locked_targets.clone();
            self.release_targets(&targets);
        }
    }

    /// Materialize and launch a saga from one rule's matched actions.
    /// Returns the new saga's id, or the conflict/dispatch error that
    /// stopped it from starting.
    pub async fn create_saga(&self, actions: Vec<Action>) -> Result<SagaId, RangeSyncError> {
        if actions.is_empty() {
            return Err(RangeSyncError::EmptySaga);
        }

        let mut distinct_targets = Vec::new();
        for action in &actions {
            if !distinct_targets.contains(&action.target) {
                distinct_targets.push(action.target.clone());
            }
        }

        let saga_id = self.next_saga_id();

        if let Err(busy) = self.try_acquire(&saga_id, &distinct_targets) {
            warn!(?busy, "saga creation conflict: target already held");
            self.metrics.saga_conflict();
            return Err(RangeSyncError::SagaConflict { targets: busy });
        }

        let steps: Vec<SagaStep> = actions
            .iter()
            .enumerate()
            .map(|(index, action)| SagaStep::from_action(index, action))
            .collect();

        let saga = Saga {
            saga_id: saga_id.clone(),
            created_at: Utc::now(),
            status: SagaStatus::Pending,
            steps,
            locked_targets: distinct_targets.clone(),
        };
        let saga_arc = Arc::new(AsyncMutex::new(saga));

        self.sagas.write().await.insert(saga_id.clone(), saga_arc.clone());
        info!(saga_id = %saga_id, targets = ?distinct_targets, "saga created");
        self.metrics.saga_created();

        match self.dispatch_step(&saga_arc, &saga_id, 0).await {
            Ok(()) => Ok(saga_id),
            Err(err) => {
                saga_arc.lock().await.status = SagaStatus::Failed;
                self.release_targets(&distinct_targets);
                warn!(saga_id = %saga_id, error = %err, "saga failed on first dispatch");
                self.metrics.saga_dispatch_failed();
                self.metrics.saga_failed();
                Err(err)
            }
        }
    }

    /// Locate the target, write the command envelope, and on success
    /// mark the step InFlight / the saga InProgress. The per-saga lock
    /// is never held across the network write itself.
    async fn dispatch_step(
        &self,
        saga_arc: &Arc<AsyncMutex<Saga>>,
        saga_id: &SagaId,
        step_index: usize,
    ) -> Result<(), RangeSyncError> {
        let (target, command, params) = {
            let saga = saga_arc.lock().await;
            let step = saga.steps.get(step_index).expect("step index in range");
            (step.target_id.clone(), step.command.clone(), step.params.clone())
        };

        let handle = self
            .registry
            .lookup(&target)
            .await
            .ok_or_else(|| RangeSyncError::DispatchFailed {
                target: target.clone(),
                reason: "simulation not registered".to_string(),
            })?;

        let envelope = json!({
            "type": "command",
            "command": command,
            "params": params,
            "saga_id": saga_id.0,
            "step_id": step_index,
        });

        handle
            .send(envelope)
            .await
            .map_err(|reason| RangeSyncError::DispatchFailed {
                target: target.clone(),
                reason,
            })?;

        {
            let mut saga = saga_arc.lock().await;
            saga.steps[step_index].status = StepStatus::InFlight;
            if saga.status == SagaStatus::Pending {
                saga.status = SagaStatus::InProgress;
            }
        }
        debug!(saga_id = %saga_id, step_id = step_index, target = %target, "step dispatched");
        self.schedule_deadline_watch(saga_id.clone(), step_index);
        Ok(())
    }

    /// If a step deadline is configured, spawn a task that fails the
    /// step if it is still InFlight once the deadline elapses. A no-op
    /// when no deadline is configured (the default).
    fn schedule_deadline_watch(&self, saga_id: SagaId, step_index: usize) {
        let Some(deadline) = self.step_deadline else { return };
        let Some(engine) = self.self_ref.upgrade() else { return };
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            engine.expire_step_if_still_in_flight(saga_id, step_index).await;
        });
    }

    /// Invoked after a step's deadline elapses. Re-checks the step's
    /// status under the saga lock before acting, since the ack may
    /// have arrived in the meantime — this is exactly the guard that
    /// keeps a late legitimate ack from racing a stale timeout.
    async fn expire_step_if_still_in_flight(&self, saga_id: SagaId, step_id: usize) {
        let still_in_flight = match self.lookup_saga(&saga_id).await {
            Some(saga_arc) => {
                let saga = saga_arc.lock().await;
                !saga.status.is_terminal()
                    && saga
                        .steps
                        .get(step_id)
                        .map(|s| s.status == StepStatus::InFlight)
                        .unwrap_or(false)
            }
            None => false,
        };
        if still_in_flight {
            warn!(saga_id = %saga_id, step_id, "step deadline exceeded, synthesizing step failure");
            self.on_step_failed(saga_id, step_id).await;
        }
    }

    /// Advance a saga on an inbound `step.completed`. Duplicate or
    /// late acks are silently idempotent.
    pub async fn on_step_completed(&self, saga_id: SagaId, step_id: usize) {
        let saga_arc = match self.lookup_saga(&saga_id).await {
            Some(s) => s,
            None => {
                warn!(saga_id = %saga_id, "step.completed for unknown saga, ignoring");
                return;
            }
        };

        let outcome = {
            let mut saga = saga_arc.lock().await;
            if saga.status.is_terminal() {
                CompletionOutcome::Ignored
            } else {
                match saga.steps.get(step_id) {
                    Some(step) if step.status == StepStatus::InFlight => {
                        saga.steps[step_id].status = StepStatus::Completed;
                        saga.steps[step_id].completed_at = Some(Utc::now());
                        if step_id + 1 == saga.steps.len() {
                            saga.status = SagaStatus::Completed;
                            CompletionOutcome::SagaCompleted
                        } else {
                            CompletionOutcome::Advance { next_index: step_id + 1 }
                        }
                    }
                    _ => CompletionOutcome::Ignored,
                }
            }
        };

        match outcome {
            CompletionOutcome::Ignored => {
                debug!(saga_id = %saga_id, step_id, "ignoring duplicate or late step.completed");
            }
            CompletionOutcome::SagaCompleted => {
                info!(saga_id = %saga_id, "saga completed");
                self.release_saga_locks(&saga_id).await;
                self.metrics.saga_completed();
            }
            CompletionOutcome::Advance { next_index } => {
                if let Err(err) = self.dispatch_step(&saga_arc, &saga_id, next_index).await {
                    warn!(saga_id = %saga_id, step_id = next_index, error = %err,
                        "dispatch failed mid-saga, compensating");
                    self.metrics.saga_dispatch_failed();
                    self.compensate(&saga_arc, &saga_id, Some(step_id)).await;
                }
            }
        }
    }

    /// A target explicitly rejected a step. Compensates every
    /// completed step below it, in reverse order, then fails the saga.
    pub async fn on_step_failed(&self, saga_id: SagaId, step_id: usize) {
        let saga_arc = match self.lookup_saga(&saga_id).await {
            Some(s) => s,
            None => {
                warn!(saga_id = %saga_id, "step.failed for unknown saga, ignoring");
                return;
            }
        };

        {
            let mut saga = saga_arc.lock().await;
            if saga.status.is_terminal() {
                debug!(saga_id = %saga_id, step_id, "step.failed on terminal saga, ignoring");
                return;
            }
            match saga.steps.get_mut(step_id) {
                Some(step) if step.status == StepStatus::InFlight => {
                    step.status = StepStatus::Failed;
                }
                _ => {
                    debug!(saga_id = %saga_id, step_id, "ignoring duplicate or invalid step.failed");
                    return;
                }
            }
            saga.status = SagaStatus::Compensating;
        }

        info!(saga_id = %saga_id, step_id, "step failed, compensating");
        self.compensate(&saga_arc, &saga_id, step_id.checked_sub(1)).await;
    }

    /// Best-effort, fire-and-forget reverse-order rollback.
    /// `from_index` is the highest index that might have a completed
    /// step worth compensating (usually the failed/last-dispatched
    /// step's predecessor); anything above it was never InFlight.
    async fn compensate(
        &self,
        saga_arc: &Arc<AsyncMutex<Saga>>,
        saga_id: &SagaId,
        from_index: Option<usize>,
    ) {
        {
            let mut saga = saga_arc.lock().await;
            saga.status = SagaStatus::Compensating;
        }

        if let Some(start) = from_index {
            let steps_snapshot = saga_arc.lock().await.steps.clone();
            for index in (0..=start.min(steps_snapshot.len().saturating_sub(1))).rev() {
                let step = &steps_snapshot[index];
                if step.status != StepStatus::Completed {
                    continue;
                }
                let Some(compensate_command) = step.compensate_command.clone() else {
                    continue;
                };
                if compensate_command.is_empty() {
                    continue;
                }

                match self.registry.lookup(&step.target_id).await {
                    None => {
                        warn!(saga_id = %saga_id, step_id = index, target = %step.target_id,
                            "compensation target no longer registered, skipping");
                    }
                    Some(handle) => {
                        let envelope = json!({
                            "type": "command",
                            "command": compensate_command,
                            "params": step.compensate_params.clone().unwrap_or(serde_json::Value::Null),
                            "saga_id": saga_id.0,
                            "step_id": index,
                        });
                        if let Err(reason) = handle.send(envelope).await {
                            warn!(saga_id = %saga_id, step_id = index, error = %reason,
                                "compensation send failed, continuing with earlier steps");
                        } else {
                            self.metrics.saga_compensated_step();
                        }
                        let mut saga = saga_arc.lock().await;
                        saga.steps[index].status = StepStatus::Failed;
                    }
                }
            }
        }

        {
            let mut saga = saga_arc.lock().await;
            saga.status = SagaStatus::Failed;
        }
        info!(saga_id = %saga_id, "saga failed, compensation complete");
        self.release_saga_locks(saga_id).await;
        self.metrics.saga_failed();
    }
}

/// When a simulation disappears, any saga holding its
/// exclusion lock whose in-flight step targets it is synthesized a
/// step-failure. A target disappearing while no step currently
/// targets it needs no action here — if a later step in the saga
/// would dispatch to it, that dispatch will fail naturally and
/// trigger compensation through the normal path.
#[async_trait]
impl ConnectionLossHook for SagaEngine {
    async fn on_connection_lost(&self, simulation_id: &str) {
        let saga_id = {
            let locks = self.target_locks.lock().unwrap();
            locks.get(simulation_id).cloned()
        };
        let Some(saga_id) = saga_id else { return };
        let Some(saga_arc) = self.lookup_saga(&saga_id).await else { return };

        let in_flight = {
            let saga = saga_arc.lock().await;
            saga.in_flight_index()
                .filter(|&idx| saga.steps[idx].target_id == simulation_id)
        };

        if let Some(step_id) = in_flight {
            warn!(saga_id = %saga_id, step_id, simulation_id,
                "simulation disconnected mid-saga, synthesizing step failure");
            self.on_step_failed(saga_id, step_id).await;
        }
    }
}
