//! Reply Generation Collaborator
//!
//! The gateway does not decide what to answer; an external reply engine
//! does. This seam keeps that collaborator behind a narrow trait so the
//! router can be exercised without it.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

/// External reply-generation capability.
///
/// Returns `Ok(None)` when the engine chooses not to answer. Errors are
/// caught by the event router and mark only the affected unit failed.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(
        &self,
        tenant_id: Uuid,
        sender: &str,
        text: &str,
        history_ref: &str,
    ) -> anyhow::Result<Option<String>>;
}

/// Reply generator that never answers. Used when no engine is configured.
pub struct NoopReplyGenerator;

#[async_trait]
impl ReplyGenerator for NoopReplyGenerator {
    async fn generate(
        &self,
        _tenant_id: Uuid,
        _sender: &str,
        _text: &str,
        _history_ref: &str,
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Reply generator backed by an internal HTTP service.
pub struct HttpReplyGenerator {
    http: reqwest::Client,
    url: String,
}

impl HttpReplyGenerator {
    /// Build a generator posting to `url` with the given request timeout.
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl ReplyGenerator for HttpReplyGenerator {
    async fn generate(
        &self,
        tenant_id: Uuid,
        sender: &str,
        text: &str,
        history_ref: &str,
    ) -> anyhow::Result<Option<String>> {
        let body = serde_json::json!({
            "tenant_id": tenant_id,
            "sender": sender,
            "text": text,
            "history_ref": history_ref,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let payload: serde_json::Value = resp.json().await?;
        Ok(payload["reply"].as_str().map(String::from))
    }
}
