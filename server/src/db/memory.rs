//! In-Memory Store
//!
//! `Store` implementation over process memory. Used by the test suite and
//! for local development without a database. One mutex guards all tables,
//! which gives every operation the same check-and-set atomicity the
//! Postgres implementation gets from single-statement row updates.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{
    ChannelConnection, ConnectionStatus, EventStatus, InboundMessageRecord, OAuthStateRecord,
    OutboundAttempt, QuotaStatus, WebhookEventRecord,
};
use super::store::{DebitOutcome, EventSighting, Store, StoreError, StoreResult};
use crate::quota::QuotaWindow;

#[derive(Debug, Clone)]
struct QuotaCounter {
    window_end: DateTime<Utc>,
    limit: i64,
    consumed: i64,
}

#[derive(Default)]
struct Tables {
    connections: HashMap<Uuid, ChannelConnection>,
    events: HashMap<String, WebhookEventRecord>,
    quotas: HashMap<(Uuid, DateTime<Utc>), QuotaCounter>,
    attempts: Vec<OutboundAttempt>,
    inbound: HashMap<String, InboundMessageRecord>,
    oauth_states: HashMap<String, OAuthStateRecord>,
}

/// Memory-backed store for tests and local development.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".into()))
    }

    /// Snapshot of all recorded outbound attempts (test observability).
    pub fn attempts(&self) -> Vec<OutboundAttempt> {
        self.tables
            .lock()
            .map(|t| t.attempts.clone())
            .unwrap_or_default()
    }

    /// Snapshot of all recorded inbound messages (test observability).
    pub fn inbound_messages(&self) -> Vec<InboundMessageRecord> {
        self.tables
            .lock()
            .map(|t| t.inbound.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_connection(&self, tenant_id: Uuid) -> StoreResult<Option<ChannelConnection>> {
        Ok(self.lock()?.connections.get(&tenant_id).cloned())
    }

    async fn find_connection_by_phone(
        &self,
        phone_number_id: &str,
    ) -> StoreResult<Option<ChannelConnection>> {
        Ok(self
            .lock()?
            .connections
            .values()
            .find(|c| c.phone_number_id == phone_number_id && c.status == ConnectionStatus::Connected)
            .cloned())
    }

    async fn upsert_connection(&self, conn: &ChannelConnection) -> StoreResult<()> {
        self.lock()?.connections.insert(conn.tenant_id, conn.clone());
        Ok(())
    }

    async fn set_connection_status(
        &self,
        tenant_id: Uuid,
        status: ConnectionStatus,
    ) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        match tables.connections.get_mut(&tenant_id) {
            Some(conn) => {
                conn.status = status;
                conn.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_event_if_new(
        &self,
        platform_event_id: &str,
        payload_hash: &str,
    ) -> StoreResult<EventSighting> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables.events.get(platform_event_id) {
            return Ok(EventSighting::Duplicate(existing.processing_status));
        }
        tables.events.insert(
            platform_event_id.to_string(),
            WebhookEventRecord {
                platform_event_id: platform_event_id.to_string(),
                payload_hash: payload_hash.to_string(),
                processing_status: EventStatus::Pending,
                received_at: Utc::now(),
                processed_at: None,
                last_error: None,
            },
        );
        Ok(EventSighting::New)
    }

    async fn set_event_status(
        &self,
        platform_event_id: &str,
        status: EventStatus,
        last_error: Option<&str>,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if let Some(event) = tables.events.get_mut(platform_event_id) {
            event.processing_status = status;
            event.processed_at = match status {
                EventStatus::Pending => None,
                EventStatus::Processed | EventStatus::Failed => Some(Utc::now()),
            };
            event.last_error = last_error.map(String::from);
        }
        Ok(())
    }

    async fn get_event(&self, platform_event_id: &str) -> StoreResult<Option<WebhookEventRecord>> {
        Ok(self.lock()?.events.get(platform_event_id).cloned())
    }

    async fn debit_quota(
        &self,
        tenant_id: Uuid,
        window: &QuotaWindow,
        limit: i64,
        amount: i64,
    ) -> StoreResult<DebitOutcome> {
        let mut tables = self.lock()?;
        let counter = tables
            .quotas
            .entry((tenant_id, window.start))
            .or_insert_with(|| QuotaCounter {
                window_end: window.end,
                limit,
                consumed: 0,
            });

        if counter.consumed + amount <= counter.limit {
            counter.consumed += amount;
            Ok(DebitOutcome::Debited {
                consumed: counter.consumed,
                limit: counter.limit,
            })
        } else {
            Ok(DebitOutcome::Exceeded {
                remaining: (counter.limit - counter.consumed).max(0),
            })
        }
    }

    async fn read_quota(
        &self,
        tenant_id: Uuid,
        window: &QuotaWindow,
        limit: i64,
    ) -> StoreResult<QuotaStatus> {
        Ok(self.lock()?.quotas.get(&(tenant_id, window.start)).map_or(
            QuotaStatus {
                limit,
                consumed: 0,
                window_end: window.end,
            },
            |c| QuotaStatus {
                limit: c.limit,
                consumed: c.consumed,
                window_end: c.window_end,
            },
        ))
    }

    async fn insert_attempt(&self, attempt: &OutboundAttempt) -> StoreResult<()> {
        self.lock()?.attempts.push(attempt.clone());
        Ok(())
    }

    async fn record_attempt_receipt(
        &self,
        upstream_message_id: &str,
        status: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        let mut updated = false;
        for attempt in tables
            .attempts
            .iter_mut()
            .filter(|a| a.upstream_message_id.as_deref() == Some(upstream_message_id))
        {
            match status {
                "delivered" => attempt.delivered_at = Some(at),
                "read" => attempt.read_at = Some(at),
                _ => {}
            }
            updated = true;
        }
        Ok(updated)
    }

    async fn insert_inbound_message(&self, msg: &InboundMessageRecord) -> StoreResult<()> {
        let mut tables = self.lock()?;
        tables
            .inbound
            .entry(msg.platform_message_id.clone())
            .or_insert_with(|| msg.clone());
        Ok(())
    }

    async fn put_oauth_state(&self, state: &OAuthStateRecord) -> StoreResult<()> {
        self.lock()?
            .oauth_states
            .insert(state.state.clone(), state.clone());
        Ok(())
    }

    async fn claim_oauth_state(&self, state: &str) -> StoreResult<Option<OAuthStateRecord>> {
        Ok(self.lock()?.oauth_states.remove(state))
    }

    async fn purge_expired_oauth_states(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.lock()?;
        let before = tables.oauth_states.len();
        tables.oauth_states.retain(|_, s| s.expires_at >= now);
        Ok((before - tables.oauth_states.len()) as u64)
    }
}
