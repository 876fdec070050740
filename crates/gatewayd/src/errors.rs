//! Top-level `GatewayError`: wraps each crate's error taxonomy and maps it
//! to an HTTP response (spec.md §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::{CoreError, EnvError, ProjectError, SandboxError, SessionError};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::Env(e) => code_to_status(e.error_code()),
            GatewayError::Project(e) => code_to_status(e.error_code()),
            GatewayError::Session(e) => code_to_status(e.error_code()),
            GatewayError::Sandbox(e) => code_to_status(e.error_code()),
            GatewayError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn code_to_status(code: &str) -> StatusCode {
    match code {
        "INVALID_ARGUMENT" => StatusCode::BAD_REQUEST,
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "PERMISSION_DENIED" => StatusCode::FORBIDDEN,
        "CONFLICT" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(event = "gateway.http.error", error = %self);
        } else {
            tracing::warn!(event = "gateway.http.user_error", error = %self);
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
