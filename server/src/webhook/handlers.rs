//! Webhook HTTP Handlers
//!
//! The two public endpoints the upstream platform calls: the handshake
//! verification and the signed event delivery. Delivery acknowledges with
//! 200 immediately after verify + dedup + enqueue; routing happens on the
//! worker. Processing problems after verification never turn into non-200
//! responses, or upstream would retry-storm us.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use tracing::{error, instrument, warn};

use super::verify::{self, SIGNATURE_HEADER};
use super::worker::{self, RoutedEventItem};
use crate::api::AppState;
use crate::db::{EventSighting, EventStatus, Store};

/// Query parameters of the handshake verification request.
#[derive(Debug, Deserialize)]
pub struct HandshakeParams {
    #[serde(rename = "hub.mode", default)]
    pub mode: String,
    #[serde(rename = "hub.verify_token", default)]
    pub verify_token: String,
    #[serde(rename = "hub.challenge", default)]
    pub challenge: String,
}

/// GET /webhook
///
/// Echoes the challenge verbatim on success. The 403 body carries no hint
/// about why verification failed.
#[instrument(skip(state, params))]
pub async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<HandshakeParams>,
) -> Result<String, (StatusCode, &'static str)> {
    verify::verify_handshake(
        &params.mode,
        &params.verify_token,
        &params.challenge,
        &state.config.webhook_verify_token,
    )
    .map_err(|_| {
        warn!("Webhook handshake verification failed");
        (StatusCode::FORBIDDEN, "Forbidden")
    })
}

/// POST /webhook
///
/// Signed event delivery. The raw body is authenticated before any parsing;
/// the dedup record is written before the ack so at-least-once redelivery
/// is idempotent end-to-end.
#[instrument(skip(state, headers, body))]
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, (StatusCode, &'static str)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    if verify::verify_signature(&state.config.app_secret, &body, signature).is_err() {
        warn!("Webhook payload signature rejected");
        return Err((StatusCode::UNAUTHORIZED, "Unauthorized"));
    }

    // Identity first: the hash covers the raw bytes, so even a payload that
    // fails to parse below still gets its audit record.
    let (event_id, payload_hash) = verify::event_identity(&body);

    let sighting = state
        .store
        .insert_event_if_new(&event_id, &payload_hash)
        .await
        .map_err(|e| {
            // Fail closed on the dedup write path: a 500 makes upstream
            // redeliver rather than us guessing about duplicates.
            error!(event_id = %event_id, "Dedup check failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        })?;

    match sighting {
        EventSighting::New => {}
        EventSighting::Duplicate(EventStatus::Processed | EventStatus::Pending) => {
            // At-least-once redelivery: absorbed silently.
            return Ok(StatusCode::OK);
        }
        EventSighting::Duplicate(EventStatus::Failed) => {
            // Redelivery of a failed event is our recovery path.
            if let Err(e) = state
                .store
                .set_event_status(&event_id, EventStatus::Pending, None)
                .await
            {
                error!(event_id = %event_id, "Failed to reset event for reprocessing: {}", e);
                return Ok(StatusCode::OK);
            }
        }
    }

    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&body) else {
        // Signed but unparseable. Keep the audit record, don't invite a
        // redelivery loop.
        warn!(event_id = %event_id, "Signed webhook payload is not valid JSON");
        if let Err(e) = state
            .store
            .set_event_status(&event_id, EventStatus::Failed, Some("payload is not valid JSON"))
            .await
        {
            error!(event_id = %event_id, "Failed to record parse failure: {}", e);
        }
        return Ok(StatusCode::OK);
    };

    let item = RoutedEventItem {
        platform_event_id: event_id.clone(),
        payload,
        received_at: chrono::Utc::now(),
    };

    // The ack must stay fast even when Redis is struggling. On any enqueue
    // failure we still return 200: the event record stays pending and
    // upstream redelivery recovers it.
    match tokio::time::timeout(
        std::time::Duration::from_secs(2),
        worker::enqueue(&state.redis, &item),
    )
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(event_id = %event_id, "Failed to enqueue event for routing: {}", e);
        }
        Err(_) => {
            error!(event_id = %event_id, "Timed out enqueueing event for routing");
        }
    }

    Ok(StatusCode::OK)
}
