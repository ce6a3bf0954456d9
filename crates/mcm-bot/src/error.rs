use std::path::PathBuf;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::lifecycle::Operation;

/// Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    MissingEnv(&'static str),

    #[error("{var} is invalid: {reason}")]
    InvalidEnv { var: &'static str, reason: String },

    #[error("reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing servers file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{field}: invalid duration {value:?}")]
    InvalidDuration { field: String, value: String },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: String },

    #[error("invalid server host: {0}")]
    InvalidHost(String),

    #[error("{0}: deallocation threshold must be at least 1")]
    InvalidThreshold(String),

    #[error("duplicate server host: {0}")]
    DuplicateHost(String),

    #[error("no servers configured")]
    NoServers,
}

/// Operator reference did not pick out exactly one server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("server not found: {0}")]
    NotFound(String),

    #[error("{token:?} matches more than one server: {}", .candidates.join(", "))]
    Ambiguous {
        token: String,
        candidates: Vec<String>,
    },
}

/// A start or deallocate that could not be carried out.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{operation} {server} ({stage}): {source}")]
    Cloud {
        server: String,
        operation: Operation,
        stage: &'static str,
        #[source]
        source: mcm_infra::Error,
    },

    #[error("{operation} {server}: interrupted by shutdown")]
    Cancelled { server: String, operation: Operation },

    #[error("{operation} {server}: no result within {after:?}")]
    TimedOut {
        server: String,
        operation: Operation,
        after: Duration,
    },
}

/// Operator input that is not a usable command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command, try help")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Resolve(ResolveError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Resolve(ResolveError::Ambiguous { .. }) => StatusCode::CONFLICT,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
