use axum::extract::State;

use crate::error::ApiError;
use crate::state::AppState;

/// Plain-text body in, plain-text reply out.
pub async fn run_command(State(state): State<AppState>, body: String) -> Result<String, ApiError> {
    let line = body.trim();
    if line.is_empty() {
        return Err(ApiError::BadRequest("empty command".into()));
    }
    Ok(state.commands.handle(line).await)
}
