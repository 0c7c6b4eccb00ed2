//! Database Models
//!
//! Row types shared by the Postgres and in-memory store implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel connection status matching the `connection_status` `PostgreSQL` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "connection_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No channel linked (or explicitly unlinked).
    Disconnected,
    /// OAuth flow started, waiting for the callback.
    Connecting,
    /// Credential stored, channel usable for sends.
    Connected,
    /// Credential invalidated upstream; sends fail fast.
    Revoked,
}

impl ConnectionStatus {
    /// Convert to the snake_case string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Revoked => "revoked",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Webhook event processing status matching the `event_status` `PostgreSQL` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// First sighting recorded, routing not yet finished.
    Pending,
    /// All units routed without error.
    Processed,
    /// At least one unit failed routing.
    Failed,
}

impl EventStatus {
    /// Convert to the snake_case string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of an outbound send attempt, matching the `attempt_result` `PostgreSQL` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "attempt_result", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    /// Accepted by the upstream API.
    Sent,
    /// Rejected locally before any upstream call (quota exhausted).
    RejectedQuota,
    /// Rejected by the upstream API (invalid recipient, policy, ...).
    RejectedUpstream,
    /// Transport-level failure (timeout, 5xx, connection error).
    Failed,
}

impl AttemptResult {
    /// Convert to the snake_case string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::RejectedQuota => "rejected_quota",
            Self::RejectedUpstream => "rejected_upstream",
            Self::Failed => "failed",
        }
    }
}

/// A tenant's link to an upstream WhatsApp Business account.
///
/// At most one row per tenant; `disconnected`/`revoked` are soft states so
/// the row doubles as an audit trail of the last connection.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChannelConnection {
    pub tenant_id: Uuid,
    /// Vault-sealed access token (`v1:<hex>`), never plaintext.
    pub encrypted_access_token: String,
    pub phone_number_id: String,
    pub display_number: Option<String>,
    pub business_name: Option<String>,
    pub waba_id: Option<String>,
    pub status: ConnectionStatus,
    pub connected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit record for a webhook event delivery, keyed by the platform event id.
///
/// Rows are never deleted; they back replay detection and auditing.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WebhookEventRecord {
    pub platform_event_id: String,
    pub payload_hash: String,
    pub processing_status: EventStatus,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// One outbound send attempt. Immutable once `result` is recorded, except
/// for the receipt timestamps filled in by later status webhooks.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OutboundAttempt {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub recipient: String,
    pub body: String,
    pub requested_at: DateTime<Utc>,
    pub quota_charged: bool,
    pub upstream_message_id: Option<String>,
    pub result: AttemptResult,
    pub error_message: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

/// An inbound message extracted from a webhook event.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InboundMessageRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub platform_message_id: String,
    pub sender: String,
    pub body: Option<String>,
    pub kind: String,
    pub received_at: DateTime<Utc>,
}

/// Single-use OAuth state token binding a pending flow to a tenant.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OAuthStateRecord {
    pub state: String,
    pub tenant_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Committed quota counter values for one tenant window.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QuotaStatus {
    pub limit: i64,
    pub consumed: i64,
    pub window_end: DateTime<Utc>,
}
