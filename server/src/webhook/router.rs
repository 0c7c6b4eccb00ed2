//! Event Routing
//!
//! Per-event state machine: a verified, deduplicated event is split into
//! independent units; each text message flows through the reply generator
//! and the dispatcher, each status receipt lands on its outbound attempt.
//! One failing unit marks the event `failed` without aborting its siblings.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::payload::{self, InboundMessage, InboundUnit, StatusUpdate};
use crate::db::{EventStatus, InboundMessageRecord, Store, StoreError};
use crate::dispatch::{MessageDispatcher, SendError};
use crate::reply::ReplyGenerator;

/// Routing errors for a single unit.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Reply generation failed: {0}")]
    Reply(#[from] anyhow::Error),
    #[error("Reply dispatch failed: {0}")]
    Dispatch(#[from] SendError),
}

/// Terminal state of one routed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// A reply was generated and dispatched.
    Replied,
    /// Processed, nothing to send back.
    NoReply,
    /// Not addressed to any connected tenant, or an ignored kind.
    Skipped,
}

/// Routes verified webhook events to their side effects.
#[derive(Clone)]
pub struct EventRouter {
    store: Arc<dyn Store>,
    reply: Arc<dyn ReplyGenerator>,
    dispatcher: MessageDispatcher,
}

impl EventRouter {
    /// Assemble the router.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        reply: Arc<dyn ReplyGenerator>,
        dispatcher: MessageDispatcher,
    ) -> Self {
        Self {
            store,
            reply,
            dispatcher,
        }
    }

    /// Route every unit of an event and record the event's final status.
    ///
    /// Units are independent: a failure in one is logged and counted, never
    /// propagated to siblings. The HTTP acknowledgment has already happened
    /// by the time this runs.
    pub async fn process_event(&self, platform_event_id: &str, payload: &serde_json::Value) {
        let units = payload::extract_units(payload);
        let total = units.len();
        let mut failures: Vec<String> = Vec::new();

        for unit in units {
            if let Err(e) = self.process_unit(unit).await {
                warn!(event_id = %platform_event_id, error = %e, "Unit routing failed");
                failures.push(e.to_string());
            }
        }

        let (status, last_error) = if failures.is_empty() {
            (EventStatus::Processed, None)
        } else {
            (EventStatus::Failed, Some(failures.join("; ")))
        };

        if let Err(e) = self
            .store
            .set_event_status(platform_event_id, status, last_error.as_deref())
            .await
        {
            warn!(event_id = %platform_event_id, "Failed to record event status: {}", e);
        }

        info!(
            event_id = %platform_event_id,
            units = total,
            failed = failures.len(),
            "Event routed"
        );
    }

    /// Route one unit.
    async fn process_unit(&self, unit: InboundUnit) -> Result<UnitOutcome, RouteError> {
        match unit {
            InboundUnit::Message(message) => self.route_message(message).await,
            InboundUnit::Status(status) => self.route_status(status).await,
            InboundUnit::Template(template) => {
                debug!(
                    template = %template.template_name,
                    event = %template.event,
                    "Template status update acknowledged"
                );
                Ok(UnitOutcome::Skipped)
            }
            InboundUnit::Unknown { field } => {
                debug!(field = %field, "Ignoring unknown webhook change kind");
                Ok(UnitOutcome::Skipped)
            }
        }
    }

    /// Inbound message: persist it, ask the reply engine, dispatch any reply.
    async fn route_message(&self, message: InboundMessage) -> Result<UnitOutcome, RouteError> {
        let Some(conn) = self
            .store
            .find_connection_by_phone(&message.phone_number_id)
            .await?
        else {
            warn!(
                phone_number_id = %message.phone_number_id,
                "Inbound message for unconnected phone number, skipping"
            );
            return Ok(UnitOutcome::Skipped);
        };

        let tenant_id = conn.tenant_id;

        self.store
            .insert_inbound_message(&InboundMessageRecord {
                id: Uuid::now_v7(),
                tenant_id,
                platform_message_id: message.platform_message_id.clone(),
                sender: message.sender.clone(),
                body: message.body.clone(),
                kind: message.kind.clone(),
                received_at: Utc::now(),
            })
            .await?;

        let (Some(body), "text") = (&message.body, message.kind.as_str()) else {
            debug!(kind = %message.kind, "Non-text message stored, no reply attempted");
            return Ok(UnitOutcome::NoReply);
        };

        // Conversation handle the reply engine uses to fetch history.
        let history_ref = format!("{tenant_id}:{}", message.sender);

        let reply = self
            .reply
            .generate(tenant_id, &message.sender, body, &history_ref)
            .await?;

        match reply {
            Some(text) => {
                self.dispatcher
                    .send(tenant_id, &message.sender, &text)
                    .await?;
                Ok(UnitOutcome::Replied)
            }
            None => Ok(UnitOutcome::NoReply),
        }
    }

    /// Status receipt: land it on the attempt that owns the message id.
    async fn route_status(&self, status: StatusUpdate) -> Result<UnitOutcome, RouteError> {
        let updated = self
            .store
            .record_attempt_receipt(&status.upstream_message_id, &status.status, Utc::now())
            .await?;

        if !updated {
            debug!(
                upstream_message_id = %status.upstream_message_id,
                status = %status.status,
                "Receipt for unknown outbound message"
            );
        }

        Ok(UnitOutcome::NoReply)
    }
}
