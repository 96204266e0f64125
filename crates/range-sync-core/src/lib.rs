//! `range-sync-core`: the event→saga coordination engine.
//!
//! This crate is the orchestration server's core — the sequential
//! event intake queue, the rule-matching stage, the saga lifecycle
//! with per-simulation exclusion locking, and compensation-on-failure
//! semantics. It deliberately knows nothing about sockets, HTTP, or
//! the rule-set file format on disk: those are the concern of
//! `range-sync-app`, which wires a concrete WebSocket transport and a
//! YAML/JSON rule-set loader on top of the types exported here.
//!
//! See `DESIGN.md` at the workspace root for the full design.

pub mod connection;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod registry;
pub mod rules;
pub mod saga;

pub use connection::{ConnectionHandler, DispatchOutcome, EventProcessor};
pub use envelope::{InboundEnvelope, OutboundEnvelope};
pub use error::{ConnectionError, RangeSyncError};
pub use model::{
    Action, Event, Rule, RuleMatch, Saga, SagaId, SagaStatus, SagaStep, SimulationInfo, StepStatus,
};
pub use queue::EventQueue;
pub use registry::{ConnectionLossHook, Registry, SendHandle};
pub use rules::{RuleMatcher, RuleSet, RuleSetDocument};
pub use saga::SagaEngine;
