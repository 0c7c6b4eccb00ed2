//! Quota Ledger
//!
//! Tracks and atomically debits each tenant's outbound-message allowance
//! within a billing window. All mutation funnels through `try_debit`, which
//! delegates the check-and-set to the backing store; nothing is counted in
//! process memory, so any number of server processes stay consistent.

mod window;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use window::{QuotaWindow, WindowPolicy};

use crate::db::{DebitOutcome, QuotaStatus, Store, StoreError};

/// Quota errors.
#[derive(Error, Debug)]
pub enum QuotaError {
    /// The debit would exceed the window limit. Not retryable within the
    /// window.
    #[error("Message quota exceeded ({remaining} remaining)")]
    Exceeded { remaining: i64 },

    /// The debit could not be persisted. The caller must fail closed: a
    /// send is rejected, never silently allowed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Proof that a debit was committed.
#[derive(Debug, Clone, Copy)]
pub struct QuotaReceipt {
    pub tenant_id: Uuid,
    pub consumed: i64,
    pub limit: i64,
    pub window_end: DateTime<Utc>,
}

/// Per-tenant outbound message quota service.
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn Store>,
    policy: WindowPolicy,
    default_limit: i64,
}

impl QuotaLedger {
    /// Create a ledger over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, policy: WindowPolicy, default_limit: i64) -> Self {
        Self {
            store,
            policy,
            default_limit,
        }
    }

    /// Atomically debit one message from the tenant's current window.
    pub async fn try_debit(&self, tenant_id: Uuid) -> Result<QuotaReceipt, QuotaError> {
        self.try_debit_amount(tenant_id, 1).await
    }

    /// Atomically debit `amount` messages from the tenant's current window.
    ///
    /// The first debit observed after a window boundary initializes the new
    /// counter before debiting; there is no separate reset step.
    pub async fn try_debit_amount(
        &self,
        tenant_id: Uuid,
        amount: i64,
    ) -> Result<QuotaReceipt, QuotaError> {
        let window = self.policy.window_at(Utc::now());

        match self
            .store
            .debit_quota(tenant_id, &window, self.default_limit, amount)
            .await?
        {
            DebitOutcome::Debited { consumed, limit } => Ok(QuotaReceipt {
                tenant_id,
                consumed,
                limit,
                window_end: window.end,
            }),
            DebitOutcome::Exceeded { remaining } => Err(QuotaError::Exceeded { remaining }),
        }
    }

    /// Non-mutating read of the tenant's current counter. Reflects at least
    /// the last committed debit.
    pub async fn peek(&self, tenant_id: Uuid) -> Result<QuotaStatus, QuotaError> {
        let window = self.policy.window_at(Utc::now());
        Ok(self
            .store
            .read_quota(tenant_id, &window, self.default_limit)
            .await?)
    }
}
