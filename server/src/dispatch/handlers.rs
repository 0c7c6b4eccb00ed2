//! Send API Handler

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use super::SendError;
use crate::api::AppState;

/// Request body for `POST /send`.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub tenant_id: Uuid,
    pub recipient: String,
    pub message: String,
}

/// Response body for `POST /send`.
#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub upstream_message_id: String,
}

/// POST /send
#[instrument(skip(state, req), fields(tenant_id = %req.tenant_id))]
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, SendError> {
    let receipt = state
        .dispatcher
        .send(req.tenant_id, &req.recipient, &req.message)
        .await?;

    Ok(Json(SendResponse {
        upstream_message_id: receipt.upstream_message_id,
    }))
}
