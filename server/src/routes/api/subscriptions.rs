//! Push subscription registration

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};
use unidl_core::PushSubscription;

use super::{ApiError, ApiResponse};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/subscribe", post(subscribe))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest {
    subscription: Option<PushSubscription>,
    client_id: Option<String>,
}

/// Register or replace the subscription of one client
#[instrument(skip(state, body))]
async fn subscribe(
    State(state): State<AppState>,
    body: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiResponse> {
    let Json(req) = body.map_err(ApiError::from_rejection)?;

    let (subscription, client_id) = match (req.subscription, req.client_id) {
        (Some(subscription), Some(client_id)) => (subscription, client_id),
        _ => {
            return Err(ApiError::bad_request(
                "subscription and clientId are required",
            ))
        }
    };

    let replaced = state
        .orchestrator
        .subscribe(&client_id, subscription)
        .await
        .map_err(ApiError::from_core)?;

    debug!(client_id = %client_id, replaced, "Subscribe request handled");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "Subscription saved" })),
    ))
}
