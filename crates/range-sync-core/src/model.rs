//! Core data model: simulations, rules, actions, events, sagas.
//!
//! These types are intentionally plain data — the behavior that acts
//! on them lives in [`crate::registry`], [`crate::rules`],
//! [`crate::queue`] and [`crate::saga`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A saga's unique identifier. Newtype over `String` so it can't be
/// confused with a simulation id or a command name at call sites.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SagaId(pub String);

impl fmt::Display for SagaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SagaId {
    fn from(value: String) -> Self {
        SagaId(value)
    }
}

/// A registered simulation's stable identity, independent of its
/// current send-handle. Cheap to clone and hand around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationInfo {
    pub id: String,
    pub name: String,
}

/// A single `event_type`/`from` match predicate paired with the
/// ordered actions to take when it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub when: RuleMatch,
    pub then: Vec<Action>,
}

/// Predicate half of a [`Rule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMatch {
    pub event_type: String,
    #[serde(default)]
    pub from: Option<String>,
}

/// One step of a rule's `then`-list: a command to send to a target,
/// plus the compensating command to send if the saga later fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub target: String,
    pub command: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub compensate_command: Option<String>,
    #[serde(default)]
    pub compensate_params: Option<Value>,
}

/// An event emitted by a registered simulation. `source` is always
/// stamped by the Connection Handler from the registered connection
/// id — never trusted from the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub source: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

/// Overall lifecycle state of a [`Saga`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaStatus {
    Pending,
    InProgress,
    Compensating,
    Completed,
    Failed,
}

impl SagaStatus {
    /// Terminal states are `Completed` and `Failed`: no further
    /// transitions or dispatches happen once a saga reaches one.
    pub fn is_terminal(self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed)
    }
}

/// Lifecycle state of a single [`SagaStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

/// One action materialized inside a running saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStep {
    pub index: usize,
    pub target_id: String,
    pub command: String,
    pub params: Value,
    pub compensate_command: Option<String>,
    pub compensate_params: Option<Value>,
    pub status: StepStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SagaStep {
    pub fn from_action(index: usize, action: &Action) -> Self {
        SagaStep {
            index,
            target_id: action.target.clone(),
            command: action.command.clone(),
            params: action.params.clone(),
            compensate_command: action.compensate_command.clone(),
            compensate_params: action.compensate_params.clone(),
            status: StepStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// A distributed transaction materialized from one matched rule's
/// actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saga {
    pub saga_id: SagaId,
    pub created_at: DateTime<Utc>,
    pub status: SagaStatus,
    pub steps: Vec<SagaStep>,
    /// Simulation ids this saga holds the exclusion lock for, until
    /// it terminates.
    pub locked_targets: Vec<String>,
}

impl Saga {
    /// Index of the step currently in flight, if any.
    pub fn in_flight_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.status == StepStatus::InFlight)
    }

    /// Highest index with status `Completed`, if any.
    pub fn last_completed_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .rposition(|s| s.status == StepStatus::Completed)
    }
}

