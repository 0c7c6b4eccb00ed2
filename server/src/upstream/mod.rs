//! Upstream Channel API
//!
//! Narrow contract over the WhatsApp Business (Graph) API: code exchange,
//! business-profile discovery, and outbound text sends. The production
//! implementation lives in [`graph`]; tests substitute mocks.

mod graph;

use async_trait::async_trait;
use thiserror::Error;

pub use graph::GraphApiClient;

/// Placeholder recorded when profile discovery cannot resolve a field yet.
pub const PENDING_CONFIGURATION: &str = "pending_configuration";

/// Upstream call failures, classified for the caller's retry policy.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// The request did not complete within the configured deadline.
    #[error("Upstream request timed out")]
    Timeout,

    /// Transient upstream failure (5xx, connection error). Retryable by the
    /// caller.
    #[error("Upstream unavailable: {message}")]
    Unavailable { message: String },

    /// The stored credential was rejected by the upstream API. Terminal for
    /// the connection.
    #[error("Upstream rejected the channel credential")]
    CredentialRevoked,

    /// The authorization code is invalid or expired. Terminal for the OAuth
    /// flow; the user must restart.
    #[error("Authorization code expired or invalid")]
    CodeExpired,

    /// The upstream API rejected the request (invalid recipient, policy).
    #[error("Upstream rejected the request: {message}")]
    Rejected { message: String },
}

/// Business account metadata discovered after a successful code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessProfile {
    pub waba_id: Option<String>,
    pub phone_number_id: String,
    pub display_number: Option<String>,
    pub business_name: Option<String>,
}

impl BusinessProfile {
    /// Profile used when discovery fails; the connection still completes and
    /// the fields are filled in later.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            waba_id: None,
            phone_number_id: PENDING_CONFIGURATION.to_string(),
            display_number: None,
            business_name: None,
        }
    }
}

/// Client for the upstream channel API.
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Exchange an OAuth authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String, UpstreamError>;

    /// Discover the WhatsApp Business account behind an access token.
    async fn lookup_business_profile(
        &self,
        access_token: &str,
    ) -> Result<BusinessProfile, UpstreamError>;

    /// Send a text message. Returns the upstream-assigned message id.
    async fn send_text(
        &self,
        access_token: &str,
        phone_number_id: &str,
        to: &str,
        body: &str,
    ) -> Result<String, UpstreamError>;
}
