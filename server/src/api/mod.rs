//! API Router and Application State
//!
//! Central routing configuration and shared state.

use axum::{
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth,
    config::Config,
    db::Store,
    dispatch::{self, MessageDispatcher},
    oauth::{self, OAuthConnector},
    quota::QuotaLedger,
    vault::Vault,
    webhook,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Persistence store
    pub store: Arc<dyn Store>,
    /// Redis client (routing queue)
    pub redis: fred::clients::Client,
    /// Server configuration
    pub config: Arc<Config>,
    /// Credential vault
    pub vault: Vault,
    /// Quota ledger
    pub ledger: QuotaLedger,
    /// OAuth connector
    pub connector: OAuthConnector,
    /// Outbound message dispatcher
    pub dispatcher: MessageDispatcher,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        redis: fred::clients::Client,
        config: Config,
        vault: Vault,
        ledger: QuotaLedger,
        connector: OAuthConnector,
        dispatcher: MessageDispatcher,
    ) -> Self {
        Self {
            store,
            redis,
            config: Arc::new(config),
            vault,
            ledger,
            connector,
            dispatcher,
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Channel management routes behind the service token
    let protected_routes = Router::new()
        .route("/connect", post(oauth::handlers::connect))
        .route("/callback", post(oauth::handlers::callback))
        .route("/disconnect/{tenant_id}", post(oauth::handlers::disconnect))
        .route("/status/{tenant_id}", get(oauth::handlers::status))
        .route("/send", post(dispatch::handlers::send_message))
        .layer(from_fn_with_state(state.clone(), auth::require_service_auth));

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Public webhook surface called by the upstream platform
        .route(
            "/webhook",
            get(webhook::handlers::verify_webhook).post(webhook::handlers::receive_webhook),
        )
        .merge(protected_routes)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Whether a reply generator is configured
    reply_generation: bool,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        reply_generation: state.config.has_reply_generator(),
    })
}
