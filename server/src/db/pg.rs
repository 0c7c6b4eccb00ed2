//! Postgres Store
//!
//! `Store` implementation over `PostgreSQL`. Uses runtime queries
//! (`sqlx::query` / `sqlx::query_as`) to avoid requiring a live database at
//! compile time. The quota debit and the dedup first-sighting check rely on
//! single-statement row updates for their atomicity, never on in-process
//! state, so multiple server processes can share one database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{
    ChannelConnection, ConnectionStatus, EventStatus, InboundMessageRecord, OAuthStateRecord,
    OutboundAttempt, QuotaStatus, WebhookEventRecord,
};
use super::store::{DebitOutcome, EventSighting, Store, StoreError, StoreResult};
use crate::quota::QuotaWindow;

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_connection(&self, tenant_id: Uuid) -> StoreResult<Option<ChannelConnection>> {
        let row = sqlx::query_as::<_, ChannelConnection>(
            r"
            SELECT tenant_id, encrypted_access_token, phone_number_id,
                   display_number, business_name, waba_id,
                   status, connected_at, created_at, updated_at
            FROM channel_connections
            WHERE tenant_id = $1
            ",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_connection_by_phone(
        &self,
        phone_number_id: &str,
    ) -> StoreResult<Option<ChannelConnection>> {
        let row = sqlx::query_as::<_, ChannelConnection>(
            r"
            SELECT tenant_id, encrypted_access_token, phone_number_id,
                   display_number, business_name, waba_id,
                   status, connected_at, created_at, updated_at
            FROM channel_connections
            WHERE phone_number_id = $1 AND status = 'connected'
            ",
        )
        .bind(phone_number_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn upsert_connection(&self, conn: &ChannelConnection) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO channel_connections
                (tenant_id, encrypted_access_token, phone_number_id, display_number,
                 business_name, waba_id, status, connected_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7::connection_status, $8)
            ON CONFLICT (tenant_id) DO UPDATE
            SET encrypted_access_token = EXCLUDED.encrypted_access_token,
                phone_number_id = EXCLUDED.phone_number_id,
                display_number = EXCLUDED.display_number,
                business_name = EXCLUDED.business_name,
                waba_id = EXCLUDED.waba_id,
                status = EXCLUDED.status,
                connected_at = EXCLUDED.connected_at,
                updated_at = NOW()
            ",
        )
        .bind(conn.tenant_id)
        .bind(&conn.encrypted_access_token)
        .bind(&conn.phone_number_id)
        .bind(&conn.display_number)
        .bind(&conn.business_name)
        .bind(&conn.waba_id)
        .bind(conn.status.as_str())
        .bind(conn.connected_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_connection_status(
        &self,
        tenant_id: Uuid,
        status: ConnectionStatus,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE channel_connections
            SET status = $2::connection_status, updated_at = NOW()
            WHERE tenant_id = $1
            ",
        )
        .bind(tenant_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_event_if_new(
        &self,
        platform_event_id: &str,
        payload_hash: &str,
    ) -> StoreResult<EventSighting> {
        // ON CONFLICT DO NOTHING makes the first-sighting check a single
        // atomic statement: exactly one concurrent caller gets the row back.
        let inserted: Option<(String,)> = sqlx::query_as(
            r"
            INSERT INTO webhook_events (platform_event_id, payload_hash, processing_status)
            VALUES ($1, $2, 'pending')
            ON CONFLICT (platform_event_id) DO NOTHING
            RETURNING platform_event_id
            ",
        )
        .bind(platform_event_id)
        .bind(payload_hash)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            return Ok(EventSighting::New);
        }

        // Event rows are never deleted, so the losing insert always finds one.
        let status: Option<(EventStatus,)> =
            sqlx::query_as("SELECT processing_status FROM webhook_events WHERE platform_event_id = $1")
                .bind(platform_event_id)
                .fetch_optional(&self.pool)
                .await?;

        match status {
            Some((status,)) => Ok(EventSighting::Duplicate(status)),
            None => Err(StoreError::Unavailable(
                "dedup record missing after conflicting insert".into(),
            )),
        }
    }

    async fn set_event_status(
        &self,
        platform_event_id: &str,
        status: EventStatus,
        last_error: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE webhook_events
            SET processing_status = $2::event_status,
                processed_at = CASE WHEN $2 = 'pending' THEN NULL ELSE NOW() END,
                last_error = $3
            WHERE platform_event_id = $1
            ",
        )
        .bind(platform_event_id)
        .bind(status.as_str())
        .bind(last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_event(&self, platform_event_id: &str) -> StoreResult<Option<WebhookEventRecord>> {
        let row = sqlx::query_as::<_, WebhookEventRecord>(
            r"
            SELECT platform_event_id, payload_hash, processing_status,
                   received_at, processed_at, last_error
            FROM webhook_events
            WHERE platform_event_id = $1
            ",
        )
        .bind(platform_event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn debit_quota(
        &self,
        tenant_id: Uuid,
        window: &QuotaWindow,
        limit: i64,
        amount: i64,
    ) -> StoreResult<DebitOutcome> {
        // First debit in a window initializes the counter row; concurrent
        // initializers collapse on the (tenant_id, window_start) key.
        sqlx::query(
            r"
            INSERT INTO quota_counters (tenant_id, window_start, window_end, message_limit, consumed)
            VALUES ($1, $2, $3, $4, 0)
            ON CONFLICT (tenant_id, window_start) DO NOTHING
            ",
        )
        .bind(tenant_id)
        .bind(window.start)
        .bind(window.end)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        // The conditional update is the compare-and-swap: the row lock
        // serializes concurrent debits, and the WHERE clause rejects any
        // debit that would exceed the limit.
        let debited: Option<(i64, i64)> = sqlx::query_as(
            r"
            UPDATE quota_counters
            SET consumed = consumed + $3, updated_at = NOW()
            WHERE tenant_id = $1 AND window_start = $2
              AND consumed + $3 <= message_limit
            RETURNING consumed, message_limit
            ",
        )
        .bind(tenant_id)
        .bind(window.start)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((consumed, limit)) = debited {
            return Ok(DebitOutcome::Debited { consumed, limit });
        }

        let (consumed, limit): (i64, i64) = sqlx::query_as(
            r"
            SELECT consumed, message_limit FROM quota_counters
            WHERE tenant_id = $1 AND window_start = $2
            ",
        )
        .bind(tenant_id)
        .bind(window.start)
        .fetch_one(&self.pool)
        .await?;

        Ok(DebitOutcome::Exceeded {
            remaining: (limit - consumed).max(0),
        })
    }

    async fn read_quota(
        &self,
        tenant_id: Uuid,
        window: &QuotaWindow,
        limit: i64,
    ) -> StoreResult<QuotaStatus> {
        let row: Option<(i64, i64, DateTime<Utc>)> = sqlx::query_as(
            r"
            SELECT consumed, message_limit, window_end FROM quota_counters
            WHERE tenant_id = $1 AND window_start = $2
            ",
        )
        .bind(tenant_id)
        .bind(window.start)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map_or(
            QuotaStatus {
                limit,
                consumed: 0,
                window_end: window.end,
            },
            |(consumed, limit, window_end)| QuotaStatus {
                limit,
                consumed,
                window_end,
            },
        ))
    }

    async fn insert_attempt(&self, attempt: &OutboundAttempt) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO outbound_attempts
                (id, tenant_id, recipient, body, requested_at, quota_charged,
                 upstream_message_id, result, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8::attempt_result, $9)
            ",
        )
        .bind(attempt.id)
        .bind(attempt.tenant_id)
        .bind(&attempt.recipient)
        .bind(&attempt.body)
        .bind(attempt.requested_at)
        .bind(attempt.quota_charged)
        .bind(&attempt.upstream_message_id)
        .bind(attempt.result.as_str())
        .bind(&attempt.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_attempt_receipt(
        &self,
        upstream_message_id: &str,
        status: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE outbound_attempts
            SET delivered_at = CASE WHEN $2 = 'delivered' THEN $3 ELSE delivered_at END,
                read_at = CASE WHEN $2 = 'read' THEN $3 ELSE read_at END
            WHERE upstream_message_id = $1
            ",
        )
        .bind(upstream_message_id)
        .bind(status)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_inbound_message(&self, msg: &InboundMessageRecord) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO inbound_messages
                (id, tenant_id, platform_message_id, sender, body, kind, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (platform_message_id) DO NOTHING
            ",
        )
        .bind(msg.id)
        .bind(msg.tenant_id)
        .bind(&msg.platform_message_id)
        .bind(&msg.sender)
        .bind(&msg.body)
        .bind(&msg.kind)
        .bind(msg.received_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn put_oauth_state(&self, state: &OAuthStateRecord) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO oauth_states (state, tenant_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(&state.state)
        .bind(state.tenant_id)
        .bind(state.expires_at)
        .bind(state.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_oauth_state(&self, state: &str) -> StoreResult<Option<OAuthStateRecord>> {
        // DELETE .. RETURNING is the single-use guarantee: of two concurrent
        // claims, only one gets the row.
        let row = sqlx::query_as::<_, OAuthStateRecord>(
            r"
            DELETE FROM oauth_states
            WHERE state = $1
            RETURNING state, tenant_id, expires_at, created_at
            ",
        )
        .bind(state)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn purge_expired_oauth_states(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
