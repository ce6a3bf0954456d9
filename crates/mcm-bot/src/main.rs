mod commands;
mod config;
mod error;
mod lifecycle;
mod monitor;
mod notify;
mod probe;
mod routes;
mod server;
mod shutdown;
mod state;

use std::sync::Arc;

use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::commands::CommandRouter;
use crate::config::{AppConfig, FleetConfig};
use crate::lifecycle::Lifecycle;
use crate::monitor::{Monitor, spawn_monitors};
use crate::probe::{BedrockProber, Prober};
use crate::routes::api_router;
use crate::server::Server;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env().expect("invalid configuration");

    // Fleet
    let servers: Arc<[Arc<Server>]> = FleetConfig::load(&config.servers_file)
        .and_then(FleetConfig::resolve)
        .expect("failed to load servers file")
        .into_iter()
        .map(|spec| Arc::new(Server::new(spec)))
        .collect();
    for server in servers.iter() {
        tracing::info!(
            server = %server.address(),
            vm = %server.instance_id(),
            interval = %humantime::format_duration(server.policy.check_interval),
            threshold = server.policy.deallocation_threshold,
            "server configured"
        );
    }

    // Compute provider
    let provider = mcm_infra::build_provider().expect("failed to build compute provider");
    tracing::info!(provider = %provider.name(), "compute provider ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let prober: Arc<dyn Prober> = Arc::new(BedrockProber);
    let notifier = notify::build_notifier(config.notify_webhook_url.clone());
    let lifecycle = Arc::new(Lifecycle::new(
        provider,
        prober.clone(),
        config.operation_timeout,
        shutdown_rx.clone(),
    ));

    // Background monitors
    let monitor = Monitor::new(
        lifecycle.clone(),
        prober.clone(),
        notifier.clone(),
        config.reconcile_interval,
    );
    let monitors = spawn_monitors(&monitor, &servers, shutdown_rx);

    let state = AppState {
        servers: servers.clone(),
        commands: CommandRouter::new(servers, lifecycle, prober, notifier, config.host_name.clone()),
    };

    let app = api_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .expect("failed to bind listener");

    tracing::info!(addr = %config.listen_addr, "starting operator API");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await
        .expect("server error");

    // Stop the monitors and any cloud waits they are in.
    let _ = shutdown_tx.send(true);
    for handle in monitors {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "monitor task failed");
        }
    }
    tracing::info!("shut down");
}
