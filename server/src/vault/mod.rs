//! Credential Vault
//!
//! Encrypts per-tenant channel access tokens at rest and decrypts them for
//! outbound sends. Key material is process-wide configuration loaded once at
//! startup; every sealed record carries a key-version tag so keys can rotate
//! without breaking existing rows.

mod cipher;

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

pub use cipher::{open_token, seal_token, CipherError};

use crate::db::{ChannelConnection, ConnectionStatus, Store, StoreError};
use crate::upstream::BusinessProfile;

/// Vault errors.
#[derive(Error, Debug)]
pub enum VaultError {
    /// No active channel connection for the tenant.
    #[error("No active channel connection")]
    NotFound,

    /// Authentication tag verification failed (tampering or wrong key).
    #[error("Credential decryption failed")]
    DecryptFailed,

    /// Sealing a new credential failed.
    #[error("Credential encryption failed: {0}")]
    EncryptFailed(String),

    /// Backing store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Encrypts and stores channel credentials.
#[derive(Clone)]
pub struct Vault {
    key: [u8; 32],
    store: Arc<dyn Store>,
}

impl Vault {
    /// Create a vault from a raw 32-byte key.
    #[must_use]
    pub fn new(key: [u8; 32], store: Arc<dyn Store>) -> Self {
        Self { key, store }
    }

    /// Create a vault from the configured hex key, validating it once at
    /// startup.
    pub fn from_hex_key(hex_key: &str, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        let bytes = hex::decode(hex_key)?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("VAULT_KEY must decode to exactly 32 bytes"))?;
        Ok(Self::new(key, store))
    }

    /// Seal a plaintext token without persisting (used by reconnects that
    /// update an existing row).
    pub fn seal(&self, token: &str) -> Result<String, VaultError> {
        seal_token(token, &self.key).map_err(|e| VaultError::EncryptFailed(e.to_string()))
    }

    /// Encrypt `token` and persist the tenant's channel connection as
    /// `connected`. Replaces any previous connection row for the tenant.
    pub async fn store(
        &self,
        tenant_id: Uuid,
        token: &str,
        profile: &BusinessProfile,
    ) -> Result<ChannelConnection, VaultError> {
        let sealed = self.seal(token)?;
        let now = Utc::now();

        let conn = ChannelConnection {
            tenant_id,
            encrypted_access_token: sealed,
            phone_number_id: profile.phone_number_id.clone(),
            display_number: profile.display_number.clone(),
            business_name: profile.business_name.clone(),
            waba_id: profile.waba_id.clone(),
            status: ConnectionStatus::Connected,
            connected_at: Some(now),
            created_at: now,
            updated_at: now,
        };

        self.store.upsert_connection(&conn).await?;
        info!(tenant_id = %tenant_id, phone_number_id = %conn.phone_number_id, "Channel credential stored");

        Ok(conn)
    }

    /// Decrypt the access token of the tenant's active connection.
    pub async fn retrieve(&self, tenant_id: Uuid) -> Result<Zeroizing<String>, VaultError> {
        let conn = self
            .store
            .get_connection(tenant_id)
            .await?
            .ok_or(VaultError::NotFound)?;

        if conn.status != ConnectionStatus::Connected {
            return Err(VaultError::NotFound);
        }

        self.open(&conn)
    }

    /// Decrypt the access token of an already-fetched connection row.
    pub fn open(&self, conn: &ChannelConnection) -> Result<Zeroizing<String>, VaultError> {
        open_token(&conn.encrypted_access_token, &self.key).map_err(|_| VaultError::DecryptFailed)
    }
}
