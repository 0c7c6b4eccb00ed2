//! Webhook Routing Worker
//!
//! Background worker that processes acknowledged webhook events from a
//! Redis queue, decoupling reply generation and dispatch from the HTTP
//! request lifecycle. A slow or failing reply engine degrades one event,
//! never the webhook acknowledgment latency.

use std::time::Duration;

use chrono::{DateTime, Utc};
use fred::interfaces::ListInterface;
use fred::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::router::EventRouter;

/// Redis key for the event routing queue.
const ROUTING_QUEUE_KEY: &str = "webhook:routing:queue";

/// An acknowledged event waiting to be routed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedEventItem {
    pub platform_event_id: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

/// Enqueue an event for asynchronous routing.
pub async fn enqueue(redis: &Client, item: &RoutedEventItem) -> Result<(), Error> {
    let payload = serde_json::to_string(item)
        .map_err(|e| Error::new(ErrorKind::Parse, format!("JSON serialize error: {e}")))?;

    redis.lpush::<(), _, _>(ROUTING_QUEUE_KEY, payload).await?;
    Ok(())
}

/// Spawn the background routing worker.
pub async fn spawn_router_worker(redis: Client, router: EventRouter) {
    info!("Webhook routing worker started");

    // Track consecutive BRPOP errors for exponential backoff
    let mut consecutive_errors: u32 = 0;

    loop {
        // BRPOP with a short timeout so shutdown signals are observed
        let result: Result<Option<(String, String)>, _> =
            redis.brpop(ROUTING_QUEUE_KEY, 2.0).await;

        let payload_str = match result {
            Ok(Some((_key, value))) => {
                consecutive_errors = 0;
                value
            }
            Ok(None) => {
                consecutive_errors = 0;
                continue; // Timeout, no items
            }
            Err(e) => {
                consecutive_errors += 1;
                let backoff_secs = 1u64 << consecutive_errors.min(6); // 2, 4, 8, ... 64
                if backoff_secs > 30 {
                    error!(
                        consecutive_errors,
                        backoff_secs,
                        "Persistent Redis failure in routing worker, backing off: {}",
                        e
                    );
                } else {
                    error!("Failed to BRPOP from routing queue: {}", e);
                }
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                continue;
            }
        };

        // Log truncated payload on deserialization failure for debugging
        let item: RoutedEventItem = match serde_json::from_str(&payload_str) {
            Ok(item) => item,
            Err(e) => {
                let truncated: String = payload_str.chars().take(500).collect();
                error!(
                    error = %e,
                    payload_preview = %truncated,
                    "Failed to deserialize routing item"
                );
                continue;
            }
        };

        let router = router.clone();

        // Spawn routing with a panic-catching wrapper so one poisoned event
        // never takes down the worker loop.
        tokio::spawn(async move {
            let event_id = item.platform_event_id.clone();
            let handle = tokio::spawn(async move {
                router.process_event(&item.platform_event_id, &item.payload).await;
            });
            if let Err(e) = handle.await {
                error!(event_id = %event_id, "Routing task panicked: {}", e);
            }
        });
    }
}
