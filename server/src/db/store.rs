//! Persistence Store Contract
//!
//! Narrow interface over durable row storage. The quota debit, the dedup
//! first-sighting check, and the oauth-state claim all require atomic
//! compare-and-swap semantics in the backing store: two concurrent calls
//! for the same key must never both succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::{
    ChannelConnection, ConnectionStatus, EventStatus, InboundMessageRecord, OAuthStateRecord,
    OutboundAttempt, QuotaStatus, WebhookEventRecord,
};
use crate::quota::QuotaWindow;

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of the dedup first-sighting check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSighting {
    /// The event id has never been seen; a pending record was created.
    New,
    /// The event id already has a record with the given status.
    Duplicate(EventStatus),
}

/// Outcome of an atomic quota debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// The debit committed; `consumed` includes it.
    Debited { consumed: i64, limit: i64 },
    /// The debit would exceed the window limit; nothing was written.
    Exceeded { remaining: i64 },
}

/// Durable row storage consumed by every component that holds state.
///
/// Implementations: [`super::PgStore`] (production) and
/// [`super::MemoryStore`] (tests, local development).
#[async_trait]
pub trait Store: Send + Sync {
    // --- Channel connections ---

    /// Fetch a tenant's connection row regardless of status.
    async fn get_connection(&self, tenant_id: Uuid) -> StoreResult<Option<ChannelConnection>>;

    /// Resolve the tenant owning a `phone_number_id` (connected rows only).
    async fn find_connection_by_phone(
        &self,
        phone_number_id: &str,
    ) -> StoreResult<Option<ChannelConnection>>;

    /// Insert or replace a tenant's connection row.
    async fn upsert_connection(&self, conn: &ChannelConnection) -> StoreResult<()>;

    /// Transition a tenant's connection status. Returns false if no row exists.
    async fn set_connection_status(
        &self,
        tenant_id: Uuid,
        status: ConnectionStatus,
    ) -> StoreResult<bool>;

    // --- Webhook event dedup ---

    /// Atomically record the first sighting of a platform event id.
    ///
    /// Exactly one of two concurrent calls for the same id observes
    /// [`EventSighting::New`].
    async fn insert_event_if_new(
        &self,
        platform_event_id: &str,
        payload_hash: &str,
    ) -> StoreResult<EventSighting>;

    /// Update an event's processing status (and audit error, if any).
    async fn set_event_status(
        &self,
        platform_event_id: &str,
        status: EventStatus,
        last_error: Option<&str>,
    ) -> StoreResult<()>;

    /// Fetch an event record for auditing.
    async fn get_event(&self, platform_event_id: &str) -> StoreResult<Option<WebhookEventRecord>>;

    // --- Quota counter ---

    /// Atomically debit `amount` from the tenant's counter for `window`,
    /// initializing the counter at the window's `limit` on first use.
    ///
    /// Under concurrent callers, debits serialize: a debit that would push
    /// `consumed` past `limit` fails with [`DebitOutcome::Exceeded`] and
    /// writes nothing.
    async fn debit_quota(
        &self,
        tenant_id: Uuid,
        window: &QuotaWindow,
        limit: i64,
        amount: i64,
    ) -> StoreResult<DebitOutcome>;

    /// Non-mutating read of the tenant's counter for `window`. Reflects at
    /// least the last committed debit. Returns the zero counter if the
    /// window has not been used yet.
    async fn read_quota(
        &self,
        tenant_id: Uuid,
        window: &QuotaWindow,
        limit: i64,
    ) -> StoreResult<QuotaStatus>;

    // --- Outbound attempts & inbound messages ---

    /// Persist an outbound send attempt.
    async fn insert_attempt(&self, attempt: &OutboundAttempt) -> StoreResult<()>;

    /// Record a delivery/read receipt on the attempt owning an upstream
    /// message id. Returns false if no such attempt exists.
    async fn record_attempt_receipt(
        &self,
        upstream_message_id: &str,
        status: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Persist an inbound message. Duplicate platform message ids are
    /// absorbed silently (webhook redelivery).
    async fn insert_inbound_message(&self, msg: &InboundMessageRecord) -> StoreResult<()>;

    // --- OAuth state tokens ---

    /// Store a pending single-use state token.
    async fn put_oauth_state(&self, state: &OAuthStateRecord) -> StoreResult<()>;

    /// Atomically claim (remove and return) a state token. A token can be
    /// claimed at most once; concurrent claims see at most one `Some`.
    async fn claim_oauth_state(&self, state: &str) -> StoreResult<Option<OAuthStateRecord>>;

    /// Delete state tokens that expired before `now`. Returns the count.
    async fn purge_expired_oauth_states(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}
