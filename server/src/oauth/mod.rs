//! OAuth Connector
//!
//! Drives the authorization-code exchange that links a tenant to its
//! WhatsApp Business account. The single-use state token is the only
//! correlation between the redirect-out and the callback-in: random,
//! tenant-bound, and time-limited.

pub mod handlers;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use rand::Rng;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{
    ChannelConnection, ConnectionStatus, OAuthStateRecord, Store, StoreError,
};
use crate::upstream::{BusinessProfile, GraphClient, UpstreamError, PENDING_CONFIGURATION};
use crate::vault::{Vault, VaultError};

/// OAuth scopes requested for a WhatsApp Business connection.
const OAUTH_SCOPES: &str =
    "whatsapp_business_management,whatsapp_business_messaging,business_management";

/// Facebook OAuth dialog endpoint.
const DIALOG_URL: &str = "https://www.facebook.com/v18.0/dialog/oauth";

/// OAuth errors.
#[derive(Error, Debug)]
pub enum OAuthError {
    /// State token reused, expired, unknown, or bound to another tenant.
    #[error("Invalid, expired, or already-used state token")]
    InvalidState,

    /// The authorization code is spent. Terminal; the user must restart.
    #[error("Authorization code expired; restart the connection flow")]
    CodeExpired,

    /// The authorization server is unreachable. Retryable; the state token
    /// remains valid until its own expiry.
    #[error("Upstream authorization server unavailable")]
    UpstreamUnavailable,

    /// The OAuth dialog URL could not be constructed.
    #[error("Failed to build authorization URL: {0}")]
    UrlBuild(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::InvalidState => (StatusCode::BAD_REQUEST, "INVALID_STATE"),
            Self::CodeExpired => (StatusCode::BAD_REQUEST, "CODE_EXPIRED"),
            Self::UpstreamUnavailable => (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE"),
            Self::UrlBuild(e) => {
                error!("OAuth URL construction failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
            Self::Store(e) => {
                error!("Store error in OAuth flow: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
            Self::Vault(e) => {
                error!("Vault error in OAuth flow: {}", e);
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

/// Connector configuration distilled from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub state_ttl_secs: i64,
}

/// Drives tenant channel connections through
/// `disconnected → connecting → connected`.
#[derive(Clone)]
pub struct OAuthConnector {
    store: Arc<dyn Store>,
    vault: Vault,
    upstream: Arc<dyn GraphClient>,
    config: ConnectorConfig,
}

impl OAuthConnector {
    /// Assemble the connector.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        vault: Vault,
        upstream: Arc<dyn GraphClient>,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            store,
            vault,
            upstream,
            config,
        }
    }

    /// Start the authorization flow for a tenant.
    ///
    /// Generates a single-use state token and returns the OAuth dialog URL
    /// the tenant's browser should visit.
    pub async fn initiate(&self, tenant_id: Uuid) -> Result<String, OAuthError> {
        let state = generate_state_token();
        let now = Utc::now();

        self.store
            .put_oauth_state(&OAuthStateRecord {
                state: state.clone(),
                tenant_id,
                expires_at: now + Duration::seconds(self.config.state_ttl_secs),
                created_at: now,
            })
            .await?;

        self.mark_connecting(tenant_id, now).await?;

        let url = reqwest::Url::parse_with_params(
            DIALOG_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("state", state.as_str()),
                ("response_type", "code"),
                ("scope", OAUTH_SCOPES),
            ],
        )
        .map_err(|e| OAuthError::UrlBuild(e.to_string()))?;

        info!(tenant_id = %tenant_id, "OAuth flow initiated");
        Ok(url.to_string())
    }

    /// Complete the authorization flow: validate the state token, exchange
    /// the code, discover the business profile, and store the credential.
    pub async fn complete(
        &self,
        tenant_id: Uuid,
        code: &str,
        state: &str,
    ) -> Result<ChannelConnection, OAuthError> {
        // Atomic claim: of two concurrent callbacks with the same token,
        // one gets the record and the other sees InvalidState.
        let claimed = self
            .store
            .claim_oauth_state(state)
            .await?
            .ok_or(OAuthError::InvalidState)?;

        if claimed.tenant_id != tenant_id {
            warn!(tenant_id = %tenant_id, "State token bound to a different tenant");
            return Err(OAuthError::InvalidState);
        }

        if claimed.expires_at < Utc::now() {
            return Err(OAuthError::InvalidState);
        }

        let token = match self.upstream.exchange_code(code).await {
            Ok(token) => token,
            Err(e) => return Err(self.exchange_failure(tenant_id, claimed, &e).await),
        };

        // Profile discovery is best-effort, exactly like the original flow:
        // a connection with pending fields beats a failed connection.
        let profile = match self.upstream.lookup_business_profile(&token).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "Business profile discovery failed");
                BusinessProfile::pending()
            }
        };

        let conn = self.vault.store(tenant_id, &token, &profile).await?;
        info!(tenant_id = %tenant_id, phone_number_id = %conn.phone_number_id, "Channel connected");
        Ok(conn)
    }

    /// Disconnect a tenant's channel. Idempotent: disconnecting an absent
    /// or already-disconnected channel is a no-op success.
    pub async fn disconnect(&self, tenant_id: Uuid) -> Result<(), OAuthError> {
        let updated = self
            .store
            .set_connection_status(tenant_id, ConnectionStatus::Disconnected)
            .await?;

        if updated {
            info!(tenant_id = %tenant_id, "Channel disconnected");
        }
        Ok(())
    }

    /// Classify an exchange failure and unwind the flow state accordingly.
    async fn exchange_failure(
        &self,
        tenant_id: Uuid,
        claimed: OAuthStateRecord,
        e: &UpstreamError,
    ) -> OAuthError {
        match e {
            UpstreamError::Timeout | UpstreamError::Unavailable { .. } => {
                // Transient: restore the claimed token with its original
                // expiry so the caller can retry the same callback.
                if let Err(e) = self.store.put_oauth_state(&claimed).await {
                    error!(tenant_id = %tenant_id, "Failed to restore state token: {}", e);
                }
                OAuthError::UpstreamUnavailable
            }
            _ => {
                // Terminal: the code is spent. The connecting attempt is over.
                if let Err(e) = self
                    .store
                    .set_connection_status(tenant_id, ConnectionStatus::Disconnected)
                    .await
                {
                    error!(tenant_id = %tenant_id, "Failed to reset connection status: {}", e);
                }
                OAuthError::CodeExpired
            }
        }
    }

    /// Transition the tenant to `connecting`, creating a placeholder row for
    /// first-time connections.
    async fn mark_connecting(
        &self,
        tenant_id: Uuid,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), OAuthError> {
        if let Some(existing) = self.store.get_connection(tenant_id).await? {
            if existing.status != ConnectionStatus::Connected {
                self.store
                    .set_connection_status(tenant_id, ConnectionStatus::Connecting)
                    .await?;
            }
            return Ok(());
        }

        self.store
            .upsert_connection(&ChannelConnection {
                tenant_id,
                encrypted_access_token: String::new(),
                phone_number_id: PENDING_CONFIGURATION.to_string(),
                display_number: None,
                business_name: None,
                waba_id: None,
                status: ConnectionStatus::Connecting,
                connected_at: None,
                created_at: now,
                updated_at: now,
            })
            .await?;
        Ok(())
    }
}

/// 32 random bytes, hex-encoded: unguessable and URL-safe.
fn generate_state_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::db::MemoryStore;

    /// Exchange double with scripted outcomes and call counting.
    struct FakeGraph {
        exchange_calls: AtomicUsize,
        outcome: Box<dyn Fn() -> Result<String, UpstreamError> + Send + Sync>,
    }

    impl FakeGraph {
        fn returning(
            outcome: impl Fn() -> Result<String, UpstreamError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                exchange_calls: AtomicUsize::new(0),
                outcome: Box::new(outcome),
            }
        }
    }

    #[async_trait]
    impl GraphClient for FakeGraph {
        async fn exchange_code(&self, _code: &str) -> Result<String, UpstreamError> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }

        async fn lookup_business_profile(
            &self,
            _access_token: &str,
        ) -> Result<BusinessProfile, UpstreamError> {
            Ok(BusinessProfile {
                waba_id: Some("waba-1".into()),
                phone_number_id: "phone-1".into(),
                display_number: Some("+15550001111".into()),
                business_name: Some("Acme".into()),
            })
        }

        async fn send_text(
            &self,
            _access_token: &str,
            _phone_number_id: &str,
            _to: &str,
            _body: &str,
        ) -> Result<String, UpstreamError> {
            Err(UpstreamError::Rejected {
                message: "not under test".into(),
            })
        }
    }

    fn connector(store: Arc<MemoryStore>, upstream: FakeGraph) -> OAuthConnector {
        let vault = Vault::new([5u8; 32], store.clone());
        OAuthConnector::new(
            store,
            vault,
            Arc::new(upstream),
            ConnectorConfig {
                client_id: "client-1".into(),
                redirect_uri: "https://example.com/callback".into(),
                state_ttl_secs: 600,
            },
        )
    }

    /// Pull the state value back out of the generated dialog URL.
    fn state_from_url(url: &str) -> String {
        let parsed = reqwest::Url::parse(url).expect("valid url");
        parsed
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.to_string())
            .expect("state param present")
    }

    #[tokio::test]
    async fn initiate_then_complete_connects_the_tenant() {
        let store = Arc::new(MemoryStore::new());
        let connector = connector(
            Arc::clone(&store),
            FakeGraph::returning(|| Ok("token-xyz".into())),
        );
        let tenant = Uuid::now_v7();

        let url = connector.initiate(tenant).await.expect("initiate failed");
        assert!(url.starts_with(DIALOG_URL));

        let pending = store
            .get_connection(tenant)
            .await
            .expect("lookup failed")
            .expect("placeholder row");
        assert_eq!(pending.status, ConnectionStatus::Connecting);

        let state = state_from_url(&url);
        let conn = connector
            .complete(tenant, "auth-code", &state)
            .await
            .expect("complete failed");
        assert_eq!(conn.status, ConnectionStatus::Connected);
        assert_eq!(conn.phone_number_id, "phone-1");
    }

    #[tokio::test]
    async fn state_tokens_are_single_use() {
        let store = Arc::new(MemoryStore::new());
        let connector = connector(store, FakeGraph::returning(|| Ok("token-xyz".into())));
        let tenant = Uuid::now_v7();

        let url = connector.initiate(tenant).await.expect("initiate failed");
        let state = state_from_url(&url);

        connector
            .complete(tenant, "auth-code", &state)
            .await
            .expect("first complete failed");

        let replay = connector.complete(tenant, "auth-code", &state).await;
        assert!(matches!(replay, Err(OAuthError::InvalidState)));
    }

    #[tokio::test]
    async fn expired_state_is_rejected_even_with_a_valid_code() {
        let store = Arc::new(MemoryStore::new());
        let upstream = FakeGraph::returning(|| Ok("token-xyz".into()));
        let connector = connector(Arc::clone(&store), upstream);
        let tenant = Uuid::now_v7();

        let now = Utc::now();
        store
            .put_oauth_state(&OAuthStateRecord {
                state: "expired-state".into(),
                tenant_id: tenant,
                expires_at: now - Duration::seconds(1),
                created_at: now - Duration::seconds(601),
            })
            .await
            .expect("seed failed");

        let result = connector.complete(tenant, "auth-code", "expired-state").await;
        assert!(matches!(result, Err(OAuthError::InvalidState)));
    }

    #[tokio::test]
    async fn foreign_tenant_state_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let connector = connector(Arc::clone(&store), FakeGraph::returning(|| Ok("t".into())));
        let owner = Uuid::now_v7();
        let intruder = Uuid::now_v7();

        let url = connector.initiate(owner).await.expect("initiate failed");
        let state = state_from_url(&url);

        let result = connector.complete(intruder, "auth-code", &state).await;
        assert!(matches!(result, Err(OAuthError::InvalidState)));
    }

    #[tokio::test]
    async fn transient_exchange_failure_keeps_the_state_retryable() {
        let store = Arc::new(MemoryStore::new());
        let connector = connector(
            Arc::clone(&store),
            FakeGraph::returning(|| {
                Err(UpstreamError::Unavailable {
                    message: "HTTP 503".into(),
                })
            }),
        );
        let tenant = Uuid::now_v7();

        let url = connector.initiate(tenant).await.expect("initiate failed");
        let state = state_from_url(&url);

        let first = connector.complete(tenant, "auth-code", &state).await;
        assert!(matches!(first, Err(OAuthError::UpstreamUnavailable)));

        // Same state again: still claimable, fails upstream again rather
        // than with InvalidState.
        let second = connector.complete(tenant, "auth-code", &state).await;
        assert!(matches!(second, Err(OAuthError::UpstreamUnavailable)));
    }

    #[tokio::test]
    async fn expired_code_is_terminal_and_resets_the_connection() {
        let store = Arc::new(MemoryStore::new());
        let connector = connector(
            Arc::clone(&store),
            FakeGraph::returning(|| Err(UpstreamError::CodeExpired)),
        );
        let tenant = Uuid::now_v7();

        let url = connector.initiate(tenant).await.expect("initiate failed");
        let state = state_from_url(&url);

        let result = connector.complete(tenant, "auth-code", &state).await;
        assert!(matches!(result, Err(OAuthError::CodeExpired)));

        let conn = store
            .get_connection(tenant)
            .await
            .expect("lookup failed")
            .expect("row exists");
        assert_eq!(conn.status, ConnectionStatus::Disconnected);

        // The state was consumed with the code.
        let retry = connector.complete(tenant, "auth-code", &state).await;
        assert!(matches!(retry, Err(OAuthError::InvalidState)));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let connector = connector(Arc::clone(&store), FakeGraph::returning(|| Ok("t".into())));
        let tenant = Uuid::now_v7();

        // Absent connection: still a no-op success.
        connector.disconnect(tenant).await.expect("disconnect failed");

        let url = connector.initiate(tenant).await.expect("initiate failed");
        let state = state_from_url(&url);
        connector
            .complete(tenant, "auth-code", &state)
            .await
            .expect("complete failed");

        connector.disconnect(tenant).await.expect("disconnect failed");
        connector.disconnect(tenant).await.expect("second disconnect failed");

        let conn = store
            .get_connection(tenant)
            .await
            .expect("lookup failed")
            .expect("row exists");
        assert_eq!(conn.status, ConnectionStatus::Disconnected);
    }
}
