//! Error types for the event→saga coordination engine.
//!
//! Every fallible operation in this crate returns a variant of
//! [`RangeSyncError`]. Internal component failures never escape as
//! `Box<dyn Error>` — callers match on the specific variant they care
//! about.

use std::fmt;

use crate::model::SagaId;

/// Primary error type for the coordination engine.
#[derive(Debug, thiserror::Error)]
pub enum RangeSyncError {
    /// `create_saga` was called with an empty action list.
    #[error("saga would have no steps")]
    EmptySaga,

    /// One or more targets named by the saga's actions are already held
    /// by another non-terminal saga.
    #[error("targets busy: {targets:?}")]
    SagaConflict {
        /// The simulation ids that could not be locked.
        targets: Vec<String>,
    },

    /// Step dispatch failed because the target simulation is not
    /// registered, or because the write to its send-handle failed.
    #[error("dispatch to {target} failed: {reason}")]
    DispatchFailed {
        /// The simulation id the step targeted.
        target: String,
        /// Human-readable cause.
        reason: String,
    },

    /// A `step.completed`/`step.failed` envelope named a saga id that
    /// is not tracked by the engine. Disposition: log and ignore.
    #[error("unknown saga: {saga_id}")]
    UnknownSaga {
        /// The saga id that could not be found.
        saga_id: SagaId,
    },

    /// Registry lookup failed for a simulation id.
    #[error("unknown simulation: {id}")]
    UnknownSimulation {
        /// The simulation id that was not registered.
        id: String,
    },

    /// Rule-set document failed loader validation. Carries every
    /// problem found, not just the first.
    #[error("invalid rule set: {}", .problems.join("; "))]
    InvalidRuleSet {
        /// One message per validation failure.
        problems: Vec<String>,
    },
}

/// A connection-handler-level error: distinct from [`RangeSyncError`]
/// because these never propagate past the connection (they're either
/// logged-and-continue or logged-and-close, never returned to a
/// caller that needs to branch on them).
#[derive(Debug)]
pub enum ConnectionError {
    /// The frame was not valid JSON, or did not match any known
    /// envelope shape.
    MalformedEnvelope(String),
    /// The first frame on the connection was not a valid `register`.
    MissingRegistration,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::MalformedEnvelope(reason) => {
                write!(f, "malformed envelope: {reason}")
            }
            ConnectionError::MissingRegistration => {
                write!(f, "connection did not open with a valid registration")
            }
        }
    }
}

impl std::error::Error for ConnectionError {}
