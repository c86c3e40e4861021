use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application-wide error type
///
/// Every variant serializes as `{ "detail": string }`, matching the error
/// contract of the HTTP surface. Upstream failures carry a fixed code string
/// (e.g. `kundli_failed`) so the front end can branch without parsing prose.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Upstream { code: &'static str, message: String },
    NotImplemented(String),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Upstream { code, message } => write!(f, "Upstream error ({}): {}", code, message),
            AppError::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn upstream(code: &'static str, err: impl fmt::Display) -> Self {
        AppError::Upstream {
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Upstream { code, message } => {
                tracing::error!("Upstream error ({}): {}", code, message);
                (StatusCode::BAD_GATEWAY, format!("{}: {}", code, message))
            }
            AppError::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, msg),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "detail": detail,
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Upstream {
            code: "upstream_failed",
            message: err.to_string(),
        }
    }
}
