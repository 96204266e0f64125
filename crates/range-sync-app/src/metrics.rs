//! Prometheus-backed implementations of `range_sync_core`'s metrics
//! seams, behind the `monitoring` feature. One registry, no labels,
//! since there's exactly one saga engine and one queue per process.

#![cfg(feature = "monitoring")]

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use range_sync_core::metrics::{QueueMetrics, SagaMetrics};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    static ref SAGAS_CREATED_TOTAL: IntCounter =
        IntCounter::with_opts(Opts::new("sagas_created_total", "Total sagas created")).unwrap();
    static ref SAGAS_CONFLICT_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "sagas_conflict_total",
        "Total saga creation attempts rejected for target conflicts"
    ))
    .unwrap();
    static ref SAGAS_DISPATCH_FAILED_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "sagas_dispatch_failed_total",
        "Total saga steps that failed to dispatch"
    ))
    .unwrap();
    static ref SAGAS_COMPLETED_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "sagas_completed_total",
        "Total sagas that reached Completed"
    ))
    .unwrap();
    static ref SAGAS_FAILED_TOTAL: IntCounter =
        IntCounter::with_opts(Opts::new("sagas_failed_total", "Total sagas that reached Failed")).unwrap();
    static ref SAGAS_COMPENSATED_STEPS_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "sagas_compensated_steps_total",
        "Total individual steps compensated during unwind"
    ))
    .unwrap();
    static ref EVENTS_ENQUEUED_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "events_enqueued_total",
        "Total inbound events accepted onto the queue"
    ))
    .unwrap();
    static ref EVENTS_REJECTED_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "events_rejected_total",
        "Total inbound events rejected because the queue was full"
    ))
    .unwrap();
}

/// Registers every collector with the global registry. Must be called
/// once at startup before `/metrics` is served; registering the same
/// collector twice is a programmer error, so this returns the
/// `prometheus::Error` rather than swallowing it.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(SAGAS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SAGAS_CONFLICT_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SAGAS_DISPATCH_FAILED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SAGAS_COMPLETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SAGAS_FAILED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SAGAS_COMPENSATED_STEPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EVENTS_ENQUEUED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EVENTS_REJECTED_TOTAL.clone()))?;
    Ok(())
}

/// Renders the current state of every registered collector in the
/// Prometheus text exposition format, for the `/metrics` handler.
pub fn export_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder.encode_to_string(&metric_families)
}

pub struct PrometheusSagaMetrics;

impl SagaMetrics for PrometheusSagaMetrics {
    fn saga_created(&self) {
        SAGAS_CREATED_TOTAL.inc();
    }
    fn saga_conflict(&self) {
        SAGAS_CONFLICT_TOTAL.inc();
    }
    fn saga_dispatch_failed(&self) {
        SAGAS_DISPATCH_FAILED_TOTAL.inc();
    }
    fn saga_completed(&self) {
        SAGAS_COMPLETED_TOTAL.inc();
    }
    fn saga_failed(&self) {
        SAGAS_FAILED_TOTAL.inc();
    }
    fn saga_compensated_step(&self) {
        SAGAS_COMPENSATED_STEPS_TOTAL.inc();
    }
}

pub struct PrometheusQueueMetrics;

impl QueueMetrics for PrometheusQueueMetrics {
    fn event_enqueued(&self) {
        EVENTS_ENQUEUED_TOTAL.inc();
    }
    fn event_rejected(&self) {
        EVENTS_REJECTED_TOTAL.inc();
    }
}
