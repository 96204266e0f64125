//! Read-only HTTP endpoints for operational visibility: `/health` for
//! liveness, `/snapshot` for the current registry and saga state, and
//! — behind the `monitoring` feature — `/metrics` in Prometheus
//! exposition format.

use actix_web::{get, web, HttpResponse, Responder};
use range_sync_core::{Registry, SagaEngine};
use serde::Serialize;
use std::sync::Arc;

pub struct ObservabilityState {
    pub registry: Arc<Registry>,
    pub sagas: Arc<SagaEngine>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct SnapshotResponse {
    simulations: Vec<range_sync_core::SimulationInfo>,
    sagas: Vec<range_sync_core::Saga>,
}

#[get("/snapshot")]
pub async fn snapshot(state: web::Data<ObservabilityState>) -> impl Responder {
    let simulations = state.registry.snapshot().await;
    let sagas = state.sagas.snapshot().await;
    HttpResponse::Ok().json(SnapshotResponse { simulations, sagas })
}

#[cfg(feature = "monitoring")]
#[get("/metrics")]
pub async fn metrics() -> impl Responder {
    match crate::metrics::export_metrics() {
        Ok(body) => HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(body),
        Err(e) => HttpResponse::InternalServerError().body(format!("failed to export metrics: {e}")),
    }
}
