pub mod commands;
pub mod servers;

use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        // Operator commands, same grammar as chat
        .route("/commands", post(commands::run_command))
        // Servers
        .route("/servers", get(servers::list_servers))
        .route("/servers/{name}", get(servers::get_server))
        .route("/servers/{name}/start", post(servers::start_server))
        .route("/servers/{name}/stop", post(servers::stop_server))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
