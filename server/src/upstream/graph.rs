//! Graph API Client
//!
//! `reqwest` implementation of [`GraphClient`] against the Meta Graph API.
//! Every request carries the configured timeout; failures are classified so
//! the dispatcher and connector can tell terminal from transient errors.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{BusinessProfile, GraphClient, UpstreamError};
use crate::config::Config;

/// Graph API error code for invalidated access tokens.
const ERROR_CODE_TOKEN_INVALID: i64 = 190;

/// Production Graph API client.
#[derive(Clone)]
pub struct GraphApiClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl GraphApiClient {
    /// Build a client from configuration. The HTTP client carries the
    /// upstream timeout so no call can hang a task indefinitely.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upstream_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.graph_api_base.trim_end_matches('/').to_string(),
            client_id: config.oauth_client_id.clone(),
            client_secret: config.oauth_client_secret.clone(),
            redirect_uri: config.oauth_redirect_uri.clone(),
        })
    }

    fn transport_error(e: &reqwest::Error) -> UpstreamError {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Unavailable {
                message: e.to_string(),
            }
        }
    }

    /// Pull `error.message` / `error.code` out of a Graph error body.
    fn classify_send_failure(status: reqwest::StatusCode, body: &serde_json::Value) -> UpstreamError {
        let code = body["error"]["code"].as_i64();
        let message = body["error"]["message"]
            .as_str()
            .unwrap_or("unknown upstream error")
            .to_string();

        if status == reqwest::StatusCode::UNAUTHORIZED || code == Some(ERROR_CODE_TOKEN_INVALID) {
            UpstreamError::CredentialRevoked
        } else if status.is_server_error() {
            UpstreamError::Unavailable { message }
        } else {
            UpstreamError::Rejected { message }
        }
    }
}

#[async_trait]
impl GraphClient for GraphApiClient {
    async fn exchange_code(&self, code: &str) -> Result<String, UpstreamError> {
        let url = format!("{}/oauth/access_token", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| Self::transport_error(&e))?;

        if status.is_success() {
            body["access_token"]
                .as_str()
                .map(String::from)
                .ok_or_else(|| UpstreamError::Unavailable {
                    message: "token response missing access_token".into(),
                })
        } else if status.is_server_error() {
            Err(UpstreamError::Unavailable {
                message: format!("HTTP {status}"),
            })
        } else {
            // 4xx from the token endpoint means the code is spent or bogus;
            // retrying the same code cannot succeed.
            Err(UpstreamError::CodeExpired)
        }
    }

    async fn lookup_business_profile(
        &self,
        access_token: &str,
    ) -> Result<BusinessProfile, UpstreamError> {
        let me: serde_json::Value = self
            .http
            .get(format!("{}/me", self.base_url))
            .query(&[("access_token", access_token)])
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?
            .json()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        let user_id = me["id"].as_str().unwrap_or("me").to_string();

        let wabas: serde_json::Value = self
            .http
            .get(format!(
                "{}/{user_id}/owned_whatsapp_business_accounts",
                self.base_url
            ))
            .query(&[("access_token", access_token)])
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?
            .json()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        let Some(first_waba) = wabas["data"].get(0) else {
            warn!("No WhatsApp Business account visible to token, profile left pending");
            return Ok(BusinessProfile::pending());
        };

        let waba_id = first_waba["id"].as_str().map(String::from);
        let business_name = first_waba["name"].as_str().map(String::from);

        let mut profile = BusinessProfile {
            waba_id: waba_id.clone(),
            phone_number_id: super::PENDING_CONFIGURATION.to_string(),
            display_number: None,
            business_name,
        };

        if let Some(waba_id) = waba_id {
            let phones: serde_json::Value = self
                .http
                .get(format!("{}/{waba_id}/phone_numbers", self.base_url))
                .query(&[("access_token", access_token)])
                .send()
                .await
                .map_err(|e| Self::transport_error(&e))?
                .json()
                .await
                .map_err(|e| Self::transport_error(&e))?;

            if let Some(first_phone) = phones["data"].get(0) {
                if let Some(id) = first_phone["id"].as_str() {
                    profile.phone_number_id = id.to_string();
                }
                profile.display_number = first_phone["display_phone_number"]
                    .as_str()
                    .or_else(|| first_phone["verified_name"].as_str())
                    .map(String::from);
            }
        }

        Ok(profile)
    }

    async fn send_text(
        &self,
        access_token: &str,
        phone_number_id: &str,
        to: &str,
        body: &str,
    ) -> Result<String, UpstreamError> {
        let url = format!("{}/{phone_number_id}/messages", self.base_url);
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body },
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| Self::transport_error(&e))?;

        if status.is_success() {
            body["messages"][0]["id"]
                .as_str()
                .map(String::from)
                .ok_or_else(|| UpstreamError::Unavailable {
                    message: "send response missing message id".into(),
                })
        } else {
            Err(Self::classify_send_failure(status, &body))
        }
    }
}
