//! Library half of the `range-sync-server` binary: everything the
//! `main.rs` entrypoint wires together is exposed here too, so
//! integration tests can bind a real server on an OS-assigned port and
//! drive it over an actual WebSocket connection instead of only
//! exercising the core crate in-process (see `tests/websocket.rs`).

use std::net::SocketAddr;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{dev::Server, web, App, HttpServer};
use tracing::info;

use range_sync_core::{ConnectionHandler, EventProcessor, EventQueue, Registry, RuleMatcher, RuleSet, SagaEngine};

pub mod config;
pub mod error;
pub mod observability;
pub mod rule_loader;
pub mod transport;

#[cfg(feature = "monitoring")]
pub mod metrics;

pub use config::{Config, LogFormat};
use observability::ObservabilityState;

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match format {
        LogFormat::Pretty => {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).json().try_init();
        }
    }
}

/// Wires registry, saga engine, event queue, rule matcher and
/// connection handler exactly as `main` does, then binds an
/// `actix-web` `HttpServer` on `config.bind_addr`/`config.bind_port`.
/// Returns the not-yet-polled server future together with the address
/// it actually bound to (useful when `bind_port` is `0`, as in tests).
pub async fn build_server(config: &Config, rule_set: RuleSet) -> std::io::Result<(Server, SocketAddr)> {
    #[cfg(feature = "monitoring")]
    metrics::init_metrics().ok();

    let registry = Arc::new(Registry::new());
    let step_deadline = config.saga_step_deadline_secs.map(std::time::Duration::from_secs);

    #[cfg(feature = "monitoring")]
    let sagas = SagaEngine::with_deadline(registry.clone(), Arc::new(metrics::PrometheusSagaMetrics), step_deadline);
    #[cfg(not(feature = "monitoring"))]
    let sagas = SagaEngine::with_deadline(registry.clone(), range_sync_core::metrics::noop_saga_metrics(), step_deadline);

    registry.set_connection_loss_hook(sagas.clone()).await;

    #[cfg(feature = "monitoring")]
    let queue = Arc::new(EventQueue::with_metrics(
        config.event_queue_capacity,
        Arc::new(metrics::PrometheusQueueMetrics),
    ));
    #[cfg(not(feature = "monitoring"))]
    let queue = Arc::new(EventQueue::new(config.event_queue_capacity));

    let matcher = Arc::new(RuleMatcher::new(rule_set));
    let connection_handler = ConnectionHandler::new(registry.clone(), queue.clone(), sagas.clone());

    let processor = EventProcessor::new(matcher, sagas.clone());
    let processor_queue = queue.clone();
    tokio::spawn(async move {
        processor.run(processor_queue).await;
    });

    let observability_state = web::Data::new(ObservabilityState { registry, sagas });
    let connection_handler_data = web::Data::new(connection_handler);

    info!(bind_addr = %config.bind_addr, bind_port = config.bind_port, "starting range-sync-server");

    let server = HttpServer::new(move || {
        let app = App::new()
            .wrap(Cors::permissive())
            .app_data(observability_state.clone())
            .app_data(connection_handler_data.clone())
            .route("/ws", web::get().to(transport::websocket_handler))
            .service(observability::health)
            .service(observability::snapshot);

        #[cfg(feature = "monitoring")]
        let app = app.service(observability::metrics);

        app
    })
    .bind((config.bind_addr.as_str(), config.bind_port))?;

    let addr = server
        .addrs()
        .into_iter()
        .next()
        .expect("HttpServer::bind always yields at least one address");

    Ok((server.run(), addr))
}

/// Entrypoint body shared with `main.rs`; factored out so the binary
/// stays a thin `#[actix_web::main]` shim over this library.
pub async fn run(mut config: Config, rule_set_override: Option<String>) -> std::io::Result<()> {
    if let Some(path) = rule_set_override {
        config.rule_set_path = path;
    }
    init_tracing(config.log_format);

    let rule_set = rule_loader::load_rule_set(&config.rule_set_path).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to load rule set");
        std::process::exit(1);
    });
    info!(rule_set = %rule_set.name, path = %config.rule_set_path, "loaded rule set");

    let (server, _addr) = build_server(&config, rule_set).await?;
    server.await
}
