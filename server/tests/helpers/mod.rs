//! Reusable test helpers for HTTP integration tests.
//!
//! Provides `TestApp` for building and sending requests through the full
//! axum router, backed by the in-memory store and mock upstream/reply
//! collaborators so no external service is needed. The Redis routing queue
//! is intentionally dead in tests; the worker step is driven synchronously
//! through `TestApp::route_pending_event`.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{self, Method, Request};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use wab_server::api::{create_router, AppState};
use wab_server::config::Config;
use wab_server::db::MemoryStore;
use wab_server::dispatch::MessageDispatcher;
use wab_server::oauth::{ConnectorConfig, OAuthConnector};
use wab_server::quota::QuotaLedger;
use wab_server::reply::ReplyGenerator;
use wab_server::upstream::{BusinessProfile, GraphClient, UpstreamError};
use wab_server::vault::Vault;
use wab_server::webhook::{verify, EventRouter};

/// Upstream double: always succeeds, counts and records every call.
#[derive(Default)]
pub struct MockGraphClient {
    pub exchange_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl GraphClient for MockGraphClient {
    async fn exchange_code(&self, _code: &str) -> Result<String, UpstreamError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        Ok("mock-access-token".into())
    }

    async fn lookup_business_profile(
        &self,
        _access_token: &str,
    ) -> Result<BusinessProfile, UpstreamError> {
        Ok(BusinessProfile {
            waba_id: Some("waba-test".into()),
            phone_number_id: "phone-test".into(),
            display_number: Some("+15550001111".into()),
            business_name: Some("Test Business".into()),
        })
    }

    async fn send_text(
        &self,
        _access_token: &str,
        _phone_number_id: &str,
        to: &str,
        body: &str,
    ) -> Result<String, UpstreamError> {
        let n = self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .expect("mock mutex")
            .push((to.to_string(), body.to_string()));
        Ok(format!("wamid.MOCK.{n}"))
    }
}

/// Reply double: echoes every text message, counts calls.
#[derive(Default)]
pub struct MockReplyGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ReplyGenerator for MockReplyGenerator {
    async fn generate(
        &self,
        _tenant_id: Uuid,
        _sender: &str,
        text: &str,
        _history_ref: &str,
    ) -> anyhow::Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("echo: {text}")))
    }
}

/// Full application wired over in-memory collaborators.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub upstream: Arc<MockGraphClient>,
    pub reply: Arc<MockReplyGenerator>,
    pub event_router: EventRouter,
    pub config: Config,
}

impl TestApp {
    /// Build an app with the default test configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default_for_test())
    }

    /// Build an app with a customized configuration.
    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let upstream = Arc::new(MockGraphClient::default());
        let reply = Arc::new(MockReplyGenerator::default());

        let vault =
            Vault::from_hex_key(&config.vault_key, store.clone()).expect("test vault key is valid");
        let ledger = QuotaLedger::new(
            store.clone(),
            config.quota_window_policy,
            config.quota_default_limit,
        );
        let connector = OAuthConnector::new(
            store.clone(),
            vault.clone(),
            upstream.clone(),
            ConnectorConfig {
                client_id: config.oauth_client_id.clone(),
                redirect_uri: config.oauth_redirect_uri.clone(),
                state_ttl_secs: config.oauth_state_ttl_secs,
            },
        );
        let dispatcher = MessageDispatcher::new(
            store.clone(),
            vault.clone(),
            ledger.clone(),
            upstream.clone(),
        );
        let event_router = EventRouter::new(store.clone(), reply.clone(), dispatcher.clone());

        let state = AppState::new(
            store.clone(),
            dead_redis(),
            config.clone(),
            vault,
            ledger,
            connector,
            dispatcher,
        );

        Self {
            router: create_router(state),
            store,
            upstream,
            reply,
            event_router,
            config,
        }
    }

    /// Connect a tenant through the OAuth endpoints and return its id.
    pub async fn connect_tenant(&self) -> Uuid {
        let tenant = Uuid::now_v7();
        let (status, body) = self
            .post_json("/connect", &serde_json::json!({ "tenant_id": tenant }))
            .await;
        assert_eq!(status, http::StatusCode::OK, "connect failed: {body}");

        let oauth_url = body["oauth_url"].as_str().expect("oauth_url in response");
        let state = reqwest::Url::parse(oauth_url)
            .expect("valid oauth url")
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.to_string())
            .expect("state param present");

        let (status, body) = self
            .post_json(
                "/callback",
                &serde_json::json!({
                    "tenant_id": tenant,
                    "code": "test-auth-code",
                    "state": state,
                }),
            )
            .await;
        assert_eq!(status, http::StatusCode::OK, "callback failed: {body}");

        tenant
    }

    /// Send an authenticated JSON request and parse the JSON response.
    pub async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> (http::StatusCode, serde_json::Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(
                http::header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_token),
            );
        if body.is_some() {
            builder = builder.header(http::header::CONTENT_TYPE, "application/json");
        }

        let request = builder
            .body(body.map_or_else(Body::empty, |b| {
                Body::from(serde_json::to_vec(b).expect("serializable body"))
            }))
            .expect("request builds");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router responds");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    /// POST an authenticated JSON body.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> (http::StatusCode, serde_json::Value) {
        self.request_json(Method::POST, path, Some(body)).await
    }

    /// Deliver a webhook payload with a valid signature.
    pub async fn post_signed_webhook(&self, payload: &[u8]) -> http::StatusCode {
        let signature = format!(
            "sha256={}",
            verify::sign_payload(&self.config.app_secret, payload)
        );
        self.post_webhook_raw(payload, Some(&signature)).await
    }

    /// Deliver a webhook payload with an arbitrary (or missing) signature.
    pub async fn post_webhook_raw(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> http::StatusCode {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/webhook")
            .header(http::header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header("x-hub-signature-256", signature);
        }

        let request = builder
            .body(Body::from(payload.to_vec()))
            .expect("request builds");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router responds")
            .status()
    }

    /// Fetch an unauthenticated GET and return status + raw body.
    pub async fn get_raw(&self, path: &str) -> (http::StatusCode, String) {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .expect("request builds");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router responds");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Run the routing step the background worker would perform for a
    /// delivered payload.
    pub async fn route_pending_event(&self, payload: &[u8]) {
        let (event_id, _) = verify::event_identity(payload);
        let value: serde_json::Value =
            serde_json::from_slice(payload).expect("routable payload is JSON");
        self.event_router.process_event(&event_id, &value).await;
    }
}

/// Redis client that is never connected: enqueue attempts fail or time out,
/// which is exactly the degraded path webhook handling must tolerate.
pub fn dead_redis() -> fred::clients::Client {
    use fred::prelude::*;
    Client::new(Config::default(), None, None, None)
}
