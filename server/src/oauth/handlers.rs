//! Channel Connection API Handlers
//!
//! Connect, callback, disconnect, and status endpoints for tenant channels.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};
use uuid::Uuid;

use super::OAuthError;
use crate::api::AppState;
use crate::db::{ConnectionStatus, QuotaStatus, Store};

/// Request body for `POST /connect`.
#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub tenant_id: Uuid,
}

/// Response body for `POST /connect`.
#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub oauth_url: String,
}

/// Request body for `POST /callback`.
#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub tenant_id: Uuid,
    pub code: String,
    pub state: String,
}

/// Connection summary returned by the callback and status endpoints. Never
/// includes credential material.
#[derive(Debug, Serialize)]
pub struct ConnectionSummary {
    pub tenant_id: Uuid,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

/// Response body for `GET /status/{tenant_id}`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub connection: ConnectionSummary,
    pub quota: QuotaStatus,
}

/// POST /connect
#[instrument(skip(state, req), fields(tenant_id = %req.tenant_id))]
pub async fn connect(
    State(state): State<AppState>,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, OAuthError> {
    let oauth_url = state.connector.initiate(req.tenant_id).await?;
    Ok(Json(ConnectResponse { oauth_url }))
}

/// POST /callback
#[instrument(skip(state, req), fields(tenant_id = %req.tenant_id))]
pub async fn callback(
    State(state): State<AppState>,
    Json(req): Json<CallbackRequest>,
) -> Result<Json<ConnectionSummary>, OAuthError> {
    let conn = state
        .connector
        .complete(req.tenant_id, &req.code, &req.state)
        .await?;

    Ok(Json(ConnectionSummary {
        tenant_id: conn.tenant_id,
        status: conn.status,
        phone_number: conn.display_number,
        business_name: conn.business_name,
        connected_at: conn.connected_at,
    }))
}

/// POST /disconnect/{tenant_id}
#[instrument(skip(state))]
pub async fn disconnect(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<StatusCode, OAuthError> {
    state.connector.disconnect(tenant_id).await?;
    Ok(StatusCode::OK)
}

/// GET /status/{tenant_id}
#[instrument(skip(state))]
pub async fn status(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let conn = state.store.get_connection(tenant_id).await.map_err(|e| {
        error!(tenant_id = %tenant_id, "Store error in status lookup: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    })?;

    let quota = state.ledger.peek(tenant_id).await.map_err(|e| {
        error!(tenant_id = %tenant_id, "Quota peek failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    })?;

    let connection = conn.map_or(
        ConnectionSummary {
            tenant_id,
            status: ConnectionStatus::Disconnected,
            phone_number: None,
            business_name: None,
            connected_at: None,
        },
        |c| ConnectionSummary {
            tenant_id: c.tenant_id,
            status: c.status,
            phone_number: c.display_number,
            business_name: c.business_name,
            connected_at: c.connected_at,
        },
    );

    Ok(Json(StatusResponse { connection, quota }))
}
