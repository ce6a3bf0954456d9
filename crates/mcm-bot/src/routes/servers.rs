use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use crate::error::ApiError;
use crate::lifecycle::Operation;
use crate::server::ServerSnapshot;
use crate::state::AppState;

pub async fn list_servers(State(state): State<AppState>) -> Json<Vec<ServerSnapshot>> {
    let mut snapshots = Vec::with_capacity(state.servers.len());
    for server in state.servers.iter() {
        snapshots.push(server.snapshot().await);
    }
    Json(snapshots)
}

pub async fn get_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServerSnapshot>, ApiError> {
    let server = state.commands.resolve(&name)?;
    Ok(Json(server.snapshot().await))
}

pub async fn start_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, String), ApiError> {
    let server = state.commands.resolve(&name)?.clone();
    Ok((StatusCode::ACCEPTED, state.commands.spawn(server, Operation::Start)))
}

pub async fn stop_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, String), ApiError> {
    let server = state.commands.resolve(&name)?.clone();
    Ok((StatusCode::ACCEPTED, state.commands.spawn(server, Operation::Deallocate)))
}
