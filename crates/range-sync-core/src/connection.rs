//! Connection Handler: per-connection dispatch logic, expressed
//! generically over an abstract send-handle so it is unit-testable
//! without any real socket (the actual upgrade/framing lives in the
//! `range-sync-app` transport layer).

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::envelope::{InboundEnvelope, OutboundEnvelope};
use crate::error::ConnectionError;
use crate::model::{Event, SimulationInfo};
use crate::queue::EventQueue;
use crate::registry::{Registry, SendHandle};
use crate::rules::RuleMatcher;
use crate::saga::SagaEngine;

/// What happened to one post-registration envelope. Exposed for unit
/// tests to assert dispatch behavior without inspecting side effects.
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// An `event` envelope was accepted onto the Event Queue.
    EventEnqueued,
    /// An `event` envelope was rejected because the queue is full;
    /// the caller has already been sent `error/queue_full`.
    EventRejected,
    /// A `step.completed`/`step.failed` was delivered to the Saga
    /// Engine synchronously.
    AckDelivered,
    /// An unrecognized message type; logged and otherwise ignored.
    UnknownType,
}

/// Owns references to the three components a connection dispatches
/// into. Cheap to clone (all fields are `Arc`s); one instance is
/// typically shared across every connection.
#[derive(Clone)]
pub struct ConnectionHandler {
    registry: Arc<Registry>,
    queue: Arc<EventQueue>,
    sagas: Arc<SagaEngine>,
}

impl ConnectionHandler {
    pub fn new(registry: Arc<Registry>, queue: Arc<EventQueue>, sagas: Arc<SagaEngine>) -> Self {
        ConnectionHandler { registry, queue, sagas }
    }

    /// Handle the mandatory first frame on a new connection. On
    /// success, registers the simulation and returns its info — the
    /// caller is expected to send `{type:"registered", status:"ok"}`
    /// over `handle` itself (kept as a caller responsibility so this
    /// method has no side effect beyond the registry mutation, which
    /// simplifies testing the "otherwise close" branch).
    pub async fn register_first_frame(
        &self,
        raw: &str,
        handle: Arc<dyn SendHandle>,
    ) -> Result<SimulationInfo, ConnectionError> {
        let envelope: InboundEnvelope = serde_json::from_str(raw)
            .map_err(|e| ConnectionError::MalformedEnvelope(e.to_string()))?;

        match envelope {
            InboundEnvelope::Register { id, name } if !id.trim().is_empty() => {
                let info = self.registry.register(id, name, handle).await;
                Ok(info)
            }
            _ => Err(ConnectionError::MissingRegistration),
        }
    }

    /// Handle one post-registration frame. `registered_id` is the
    /// server-authoritative id this connection registered as; it is
    /// always used for `source`, regardless of what the client sent.
    pub async fn handle_frame(&self, registered_id: &str, raw: &str) -> DispatchOutcome {
        let envelope: InboundEnvelope = match serde_json::from_str(raw) {
            Ok(env) => env,
            Err(e) => {
                debug!(simulation_id = registered_id, error = %e, "dropping malformed envelope");
                return DispatchOutcome::UnknownType;
            }
        };

        match envelope {
            InboundEnvelope::Event { event_type, payload, source: _ } => {
                let event = Event {
                    source: registered_id.to_string(),
                    event_type,
                    payload,
                };
                if self.queue.enqueue(event) {
                    DispatchOutcome::EventEnqueued
                } else {
                    if let Some(handle) = self.registry.lookup(registered_id).await {
                        let _ = handle.send(
                            serde_json::to_value(OutboundEnvelope::queue_full()).unwrap(),
                        ).await;
                    }
                    DispatchOutcome::EventRejected
                }
            }
            InboundEnvelope::StepCompleted { saga_id, step_id } => {
                self.sagas.on_step_completed(saga_id.into(), step_id).await;
                DispatchOutcome::AckDelivered
            }
            InboundEnvelope::StepFailed { saga_id, step_id } => {
                self.sagas.on_step_failed(saga_id.into(), step_id).await;
                DispatchOutcome::AckDelivered
            }
            InboundEnvelope::Register { id, .. } => {
                warn!(simulation_id = registered_id, attempted_id = %id,
                    "ignoring re-registration attempt on an already-registered connection");
                DispatchOutcome::UnknownType
            }
        }
    }

    /// Connection closed or errored. Unregistering triggers the Saga
    /// Engine's connection-loss hook through the Registry.
    pub async fn handle_disconnect(&self, registered_id: &str) {
        info!(simulation_id = registered_id, "connection closed, unregistering");
        self.registry.unregister(registered_id).await;
    }
}

/// The single consumer of the Event Queue: matches each drained event
/// against the rule set and, on a nonempty match, creates a saga.
pub struct EventProcessor {
    matcher: Arc<RuleMatcher>,
    sagas: Arc<SagaEngine>,
}

impl EventProcessor {
    pub fn new(matcher: Arc<RuleMatcher>, sagas: Arc<SagaEngine>) -> Self {
        EventProcessor { matcher, sagas }
    }

    /// Run forever, draining `queue`. Returns when the queue closes
    /// and drains (see [`EventQueue::run`]). This is the single
    /// consumer: rule matching and saga creation happen only here.
    pub async fn run(&self, queue: Arc<EventQueue>) {
        queue
            .run(|event| async {
                let actions = self.matcher.matching_actions(&event);
                if actions.is_empty() {
                    debug!(event_type = %event.event_type, source = %event.source,
                        "no rule matched, dropping event");
                    return;
                }
                if let Err(err) = self.sagas.create_saga(actions).await {
                    debug!(event_type = %event.event_type, error = %err,
                        "saga not created for matched event");
                }
            })
            .await;
    }
}
