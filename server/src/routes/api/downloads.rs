//! Download submission and history endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{ApiError, ApiResponse};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/download", post(submit_download))
        .route("/downloads", get(list_downloads))
        .route("/downloads/{id}", get(get_download))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    #[serde(default)]
    url: String,
    #[serde(default)]
    service_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

/// Accept a download; the job runs in the background
#[instrument(skip(state, body))]
async fn submit_download(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiResponse> {
    let Json(req) = body.map_err(ApiError::from_rejection)?;

    let service_type = req
        .service_type
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("serviceType is required"))?;

    let job = state
        .orchestrator
        .submit(&req.url, &service_type)
        .await
        .map_err(|e| {
            warn!(error = %e, url = %req.url, "Download rejected");
            ApiError::from_core(e)
        })?;

    info!(job_id = %job.id, "Download queued");
    Ok((StatusCode::ACCEPTED, Json(json!({ "download": job }))))
}

/// Most recent downloads first
#[instrument(skip(state))]
async fn list_downloads(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let downloads = state.orchestrator.list(params.limit).await;
    Json(json!({ "downloads": downloads }))
}

#[instrument(skip(state))]
async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiResponse> {
    let job = state
        .orchestrator
        .get(&id)
        .await
        .map_err(ApiError::from_core)?;
    Ok(Json(json!({ "download": job })))
}
