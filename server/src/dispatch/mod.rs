//! Message Dispatcher
//!
//! Outbound send pipeline: resolve the tenant's channel connection, debit
//! the quota, decrypt the credential, call the upstream API, and persist
//! the attempt. The quota debit models attempted sends, not confirmed
//! deliveries, so upstream failures never refund it. Retry policy belongs
//! to the caller; the dispatcher never retries.

pub mod handlers;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{
    AttemptResult, ChannelConnection, ConnectionStatus, OutboundAttempt, Store, StoreError,
};
use crate::quota::{QuotaError, QuotaLedger};
use crate::upstream::{GraphClient, UpstreamError};
use crate::vault::{Vault, VaultError};

/// Send errors.
#[derive(Error, Debug)]
pub enum SendError {
    /// No connected channel for the tenant (absent, disconnected, revoked).
    #[error("No active channel connection")]
    NotConnected,

    /// The quota window is exhausted. No upstream call was made.
    #[error("Message quota exceeded ({remaining} remaining)")]
    QuotaExceeded { remaining: i64 },

    /// The upstream call did not complete within its deadline.
    #[error("Upstream send timed out")]
    Timeout,

    /// The upstream API rejected the message (terminal for this attempt).
    #[error("Upstream rejected the message: {0}")]
    UpstreamRejected(String),

    /// The upstream API is unavailable. Retryable by the caller.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Credential could not be decrypted.
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Persistence failure. Fails closed: the send is rejected.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for SendError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::NotConnected => (StatusCode::CONFLICT, "NOT_CONNECTED"),
            Self::QuotaExceeded { remaining } => {
                let body = Json(serde_json::json!({
                    "error": "QUOTA_EXCEEDED",
                    "message": self.to_string(),
                    "remaining": remaining,
                }));
                return (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            }
            Self::Timeout => (StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT"),
            Self::UpstreamRejected(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_REJECTED"),
            Self::UpstreamUnavailable(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE"),
            Self::Vault(e) => {
                error!("Credential error during send: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
            Self::Store(e) => {
                error!("Store error during send: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = Json(serde_json::json!({
            "error": code,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Proof of an accepted upstream send.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub attempt_id: Uuid,
    pub upstream_message_id: String,
}

/// Outbound message pipeline.
#[derive(Clone)]
pub struct MessageDispatcher {
    store: Arc<dyn Store>,
    vault: Vault,
    ledger: QuotaLedger,
    upstream: Arc<dyn GraphClient>,
}

impl MessageDispatcher {
    /// Assemble the pipeline.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        vault: Vault,
        ledger: QuotaLedger,
        upstream: Arc<dyn GraphClient>,
    ) -> Self {
        Self {
            store,
            vault,
            ledger,
            upstream,
        }
    }

    /// Send a text message on the tenant's channel.
    #[tracing::instrument(skip(self, body), fields(tenant_id = %tenant_id))]
    pub async fn send(
        &self,
        tenant_id: Uuid,
        recipient: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, SendError> {
        let conn = self
            .store
            .get_connection(tenant_id)
            .await?
            .filter(|c| c.status == ConnectionStatus::Connected)
            .ok_or(SendError::NotConnected)?;

        // Quota gate before any upstream contact. A store failure here
        // rejects the send (fail closed).
        if let Err(e) = self.ledger.try_debit(tenant_id).await {
            return match e {
                QuotaError::Exceeded { remaining } => {
                    self.record_attempt(
                        tenant_id,
                        recipient,
                        body,
                        false,
                        None,
                        AttemptResult::RejectedQuota,
                        Some("quota exhausted"),
                    )
                    .await;
                    Err(SendError::QuotaExceeded { remaining })
                }
                QuotaError::Store(e) => Err(SendError::Store(e)),
            };
        }

        let token = self.vault.open(&conn)?;

        match self
            .upstream
            .send_text(&token, &conn.phone_number_id, recipient, body)
            .await
        {
            Ok(upstream_message_id) => {
                let attempt_id = self
                    .record_attempt(
                        tenant_id,
                        recipient,
                        body,
                        true,
                        Some(&upstream_message_id),
                        AttemptResult::Sent,
                        None,
                    )
                    .await;

                info!(upstream_message_id = %upstream_message_id, "Message sent");
                Ok(DeliveryReceipt {
                    attempt_id,
                    upstream_message_id,
                })
            }
            Err(e) => Err(self.record_send_failure(&conn, recipient, body, e).await),
        }
    }

    /// Persist the failed attempt and translate the upstream error. The
    /// quota debit stands: it charged the attempt, not the delivery.
    async fn record_send_failure(
        &self,
        conn: &ChannelConnection,
        recipient: &str,
        body: &str,
        e: UpstreamError,
    ) -> SendError {
        let (result, send_error) = match e {
            UpstreamError::CredentialRevoked => {
                // Mark the connection so subsequent sends fail fast instead
                // of repeatedly hitting upstream.
                warn!(tenant_id = %conn.tenant_id, "Upstream invalidated the channel credential");
                if let Err(e) = self
                    .store
                    .set_connection_status(conn.tenant_id, ConnectionStatus::Revoked)
                    .await
                {
                    error!("Failed to mark connection revoked: {}", e);
                }
                (AttemptResult::Failed, SendError::NotConnected)
            }
            UpstreamError::Timeout => (AttemptResult::Failed, SendError::Timeout),
            UpstreamError::Unavailable { message } => {
                (AttemptResult::Failed, SendError::UpstreamUnavailable(message))
            }
            UpstreamError::Rejected { message } => (
                AttemptResult::RejectedUpstream,
                SendError::UpstreamRejected(message),
            ),
            UpstreamError::CodeExpired => (
                AttemptResult::Failed,
                SendError::UpstreamRejected("unexpected oauth error during send".into()),
            ),
        };

        self.record_attempt(
            conn.tenant_id,
            recipient,
            body,
            true,
            None,
            result,
            Some(&send_error.to_string()),
        )
        .await;

        send_error
    }

    /// Write the attempt row. Attempt persistence must never turn a settled
    /// upstream outcome into a send failure, so errors are logged only.
    #[allow(clippy::too_many_arguments)]
    async fn record_attempt(
        &self,
        tenant_id: Uuid,
        recipient: &str,
        body: &str,
        quota_charged: bool,
        upstream_message_id: Option<&str>,
        result: AttemptResult,
        error_message: Option<&str>,
    ) -> Uuid {
        let attempt = OutboundAttempt {
            id: Uuid::now_v7(),
            tenant_id,
            recipient: recipient.to_string(),
            body: body.to_string(),
            requested_at: Utc::now(),
            quota_charged,
            upstream_message_id: upstream_message_id.map(String::from),
            result,
            error_message: error_message.map(String::from),
            delivered_at: None,
            read_at: None,
        };

        if let Err(e) = self.store.insert_attempt(&attempt).await {
            error!(tenant_id = %tenant_id, "Failed to persist outbound attempt: {}", e);
        }

        attempt.id
    }
}
