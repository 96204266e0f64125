//! Instrumentation seams for the ambient observability surface.
//!
//! The core crate never depends on `prometheus` directly — that stays
//! an app-crate concern — but the Saga Engine and Event Queue still
//! need a place to call out to at the exact points a real deployment
//! wants counters bumped. `range-sync-app` provides the concrete
//! `prometheus`-backed implementation; tests and call sites that
//! don't care use [`NoopMetrics`].

use std::sync::Arc;

/// Counters the Saga Engine increments at each lifecycle transition.
pub trait SagaMetrics: Send + Sync {
    fn saga_created(&self) {}
    fn saga_conflict(&self) {}
    fn saga_dispatch_failed(&self) {}
    fn saga_completed(&self) {}
    fn saga_failed(&self) {}
    fn saga_compensated_step(&self) {}
}

/// Counters the Event Queue increments on intake.
pub trait QueueMetrics: Send + Sync {
    fn event_enqueued(&self) {}
    fn event_rejected(&self) {}
}

/// No-op implementation used as the default so call sites never need
/// an `Option` check.
pub struct NoopMetrics;

impl SagaMetrics for NoopMetrics {}
impl QueueMetrics for NoopMetrics {}

pub fn noop_saga_metrics() -> Arc<dyn SagaMetrics> {
    Arc::new(NoopMetrics)
}

pub fn noop_queue_metrics() -> Arc<dyn QueueMetrics> {
    Arc::new(NoopMetrics)
}
