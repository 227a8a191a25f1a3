//! REST API endpoints
//!
//! ```text
//! /api/
//! ├── health                 GET     Health check
//! ├── vapid-public-key       GET     Push application server key
//! ├── download               POST    Submit a download
//! ├── downloads              GET     Recent downloads, newest first
//! ├── downloads/{id}         GET     One download
//! └── subscribe              POST    Register a push subscription
//! ```

pub mod downloads;
pub mod subscriptions;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, instrument};
use unidl_core::Error;

use crate::state::AppState;

/// Standard API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub success: bool,
    pub error: ApiErrorDetails,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetails {
    pub code: String,
    pub message: String,
}

pub type ApiResponse = (StatusCode, Json<ApiError>);

impl ApiError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ApiErrorDetails {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn not_found(resource: &str) -> ApiResponse {
        (
            StatusCode::NOT_FOUND,
            Json(Self::new("NOT_FOUND", format!("{} not found", resource))),
        )
    }

    pub fn bad_request(message: impl Into<String>) -> ApiResponse {
        (
            StatusCode::BAD_REQUEST,
            Json(Self::new("BAD_REQUEST", message)),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> ApiResponse {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(Self::new("INTERNAL_ERROR", message)),
        )
    }

    /// Map a core error onto a status code
    pub fn from_core(err: Error) -> ApiResponse {
        match err {
            Error::Validation(msg) => Self::bad_request(msg),
            e @ Error::UnsupportedService(_) => (
                StatusCode::BAD_REQUEST,
                Json(Self::new("UNSUPPORTED_SERVICE", e.to_string())),
            ),
            Error::NotFound(what) => Self::not_found(&what),
            other => {
                error!(error = %other, "Request failed");
                Self::internal_error(other.to_string())
            }
        }
    }

    /// Malformed or incomplete JSON bodies are client errors
    pub fn from_rejection(rejection: JsonRejection) -> ApiResponse {
        Self::bad_request(rejection.body_text())
    }
}

/// Create the API router
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/vapid-public-key", get(vapid_public_key))
        .merge(downloads::routes())
        .merge(subscriptions::routes())
}

/// Health check endpoint
#[instrument]
async fn health_check() -> impl IntoResponse {
    debug!("Health check requested");
    Json(json!({
        "status": "OK",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Public key browsers need to create a push subscription
#[instrument(skip(state))]
async fn vapid_public_key(State(state): State<AppState>) -> impl IntoResponse {
    match state.config.push.public_key.clone() {
        Some(key) => (StatusCode::OK, key),
        None => (
            StatusCode::NOT_FOUND,
            "Push public key not configured".to_string(),
        ),
    }
}
