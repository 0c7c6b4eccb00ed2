//! Wab Server - Main Entry Point
//!
//! WhatsApp Business channel gateway backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use wab_server::db::Store;
use wab_server::{api, config, db, dispatch, oauth, quota, reply, upstream, vault, webhook};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wab_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Wab Server"
    );

    // Initialize database
    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;
    let store: Arc<dyn Store> = Arc::new(db::PgStore::new(db_pool));

    // Initialize Redis (routing queue)
    let redis = db::create_redis_client(&config.redis_url).await?;

    // Core components over the shared store
    let vault = vault::Vault::from_hex_key(&config.vault_key, Arc::clone(&store))?;
    let ledger = quota::QuotaLedger::new(
        Arc::clone(&store),
        config.quota_window_policy,
        config.quota_default_limit,
    );
    let upstream: Arc<dyn upstream::GraphClient> =
        Arc::new(upstream::GraphApiClient::new(&config)?);
    let connector = oauth::OAuthConnector::new(
        Arc::clone(&store),
        vault.clone(),
        Arc::clone(&upstream),
        oauth::ConnectorConfig {
            client_id: config.oauth_client_id.clone(),
            redirect_uri: config.oauth_redirect_uri.clone(),
            state_ttl_secs: config.oauth_state_ttl_secs,
        },
    );
    let dispatcher = dispatch::MessageDispatcher::new(
        Arc::clone(&store),
        vault.clone(),
        ledger.clone(),
        Arc::clone(&upstream),
    );

    // Reply generation collaborator (optional)
    let reply_generator: Arc<dyn reply::ReplyGenerator> = match &config.reply_api_url {
        Some(url) => {
            info!(url = %url, "Reply generator configured");
            Arc::new(reply::HttpReplyGenerator::new(
                url.clone(),
                Duration::from_secs(config.upstream_timeout_secs),
            )?)
        }
        None => {
            warn!("No reply generator configured; inbound messages will not be answered");
            Arc::new(reply::NoopReplyGenerator)
        }
    };

    // Background routing worker, decoupled from the webhook ack path
    let router = webhook::EventRouter::new(
        Arc::clone(&store),
        reply_generator,
        dispatcher.clone(),
    );
    tokio::spawn(webhook::worker::spawn_router_worker(redis.clone(), router));

    // Janitor for expired OAuth state tokens
    let janitor_store = Arc::clone(&store);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            match janitor_store
                .purge_expired_oauth_states(chrono::Utc::now())
                .await
            {
                Ok(0) => {}
                Ok(purged) => info!(purged, "Expired OAuth state tokens purged"),
                Err(e) => warn!("OAuth state purge failed: {}", e),
            }
        }
    });

    // Build application state
    let state = api::AppState::new(
        store,
        redis,
        config.clone(),
        vault,
        ledger,
        connector,
        dispatcher,
    );

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    info!("Server shutdown complete");

    Ok(())
}
