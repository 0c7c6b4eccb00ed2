//! Webhook Payload Extraction
//!
//! The upstream platform batches conversation changes into one delivery
//! envelope. Known event kinds are modeled as a tagged union with an
//! explicit unknown variant, so new or malformed change types degrade to a
//! logged skip instead of an error.

use serde_json::Value;

/// A text (or media) message received from an end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub platform_message_id: String,
    /// Phone number id of the receiving business account (tenant lookup key).
    pub phone_number_id: String,
    pub sender: String,
    pub kind: String,
    pub body: Option<String>,
}

/// A delivery/read receipt for a previously sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub upstream_message_id: String,
    pub status: String,
}

/// A message-template review outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateUpdate {
    pub template_name: String,
    pub event: String,
}

/// One independently-processed unit extracted from a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundUnit {
    Message(InboundMessage),
    Status(StatusUpdate),
    Template(TemplateUpdate),
    /// A change kind this service does not understand. Ignored.
    Unknown { field: String },
}

/// Extract all units from a delivery envelope.
///
/// Tolerant by construction: fields are probed, never indexed, and a unit
/// missing its required ids is dropped rather than failing the batch.
pub fn extract_units(payload: &Value) -> Vec<InboundUnit> {
    let mut units = Vec::new();

    let Some(entries) = payload["entry"].as_array() else {
        return units;
    };

    for entry in entries {
        let Some(changes) = entry["changes"].as_array() else {
            continue;
        };

        for change in changes {
            let field = change["field"].as_str().unwrap_or("");
            let value = &change["value"];

            match field {
                "messages" => extract_message_units(value, &mut units),
                "message_template_status_update" => {
                    units.push(InboundUnit::Template(TemplateUpdate {
                        template_name: value["message_template_name"]
                            .as_str()
                            .unwrap_or("")
                            .to_string(),
                        event: value["event"].as_str().unwrap_or("").to_string(),
                    }));
                }
                other => units.push(InboundUnit::Unknown {
                    field: other.to_string(),
                }),
            }
        }
    }

    units
}

/// A `messages` change carries inbound messages and/or status receipts.
fn extract_message_units(value: &Value, units: &mut Vec<InboundUnit>) {
    let phone_number_id = value["metadata"]["phone_number_id"]
        .as_str()
        .unwrap_or("")
        .to_string();

    if let Some(messages) = value["messages"].as_array() {
        for message in messages {
            let (Some(id), Some(from)) = (message["id"].as_str(), message["from"].as_str()) else {
                continue;
            };

            let kind = message["type"].as_str().unwrap_or("text").to_string();
            let body = match kind.as_str() {
                "text" => message["text"]["body"].as_str().map(String::from),
                // Media messages carry an id to fetch the content later.
                "image" => message["image"]["id"].as_str().map(String::from),
                _ => None,
            };

            units.push(InboundUnit::Message(InboundMessage {
                platform_message_id: id.to_string(),
                phone_number_id: phone_number_id.clone(),
                sender: from.to_string(),
                kind,
                body,
            }));
        }
    }

    if let Some(statuses) = value["statuses"].as_array() {
        for status in statuses {
            let (Some(id), Some(kind)) = (status["id"].as_str(), status["status"].as_str()) else {
                continue;
            };

            units.push(InboundUnit::Status(StatusUpdate {
                upstream_message_id: id.to_string(),
                status: kind.to_string(),
            }));
        }
    }
}
