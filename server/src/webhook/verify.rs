//! Webhook Verification
//!
//! Handshake challenge validation and HMAC-SHA256 payload authentication.
//! Both comparisons are constant-time; a rejected payload is discarded
//! before any parsing.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the upstream-computed payload signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Verification errors. Deliberately detail-free: the response must not
/// reveal which part of the check failed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Webhook verification failed")]
    TokenMismatch,
    #[error("Invalid payload signature")]
    BadSignature,
}

/// Sign a payload with HMAC-SHA256 and return the hex-encoded signature.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.as_bytes()
            .iter()
            .zip(b.as_bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

/// Validate a handshake request and return the challenge to echo.
pub fn verify_handshake(
    mode: &str,
    verify_token: &str,
    challenge: &str,
    configured_token: &str,
) -> Result<String, VerificationError> {
    if mode == "subscribe" && constant_time_eq(verify_token, configured_token) {
        Ok(challenge.to_string())
    } else {
        Err(VerificationError::TokenMismatch)
    }
}

/// Verify the upstream signature header against the raw payload bytes.
///
/// The header value has the form `sha256=<hex>`. The HMAC is recomputed
/// over the unparsed bytes and compared in constant time.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
) -> Result<(), VerificationError> {
    let provided = header
        .strip_prefix("sha256=")
        .ok_or(VerificationError::BadSignature)?;

    let expected = sign_payload(secret, payload);
    if constant_time_eq(&expected, provided) {
        Ok(())
    } else {
        Err(VerificationError::BadSignature)
    }
}

/// Compute the dedup identity of a verified payload.
///
/// Returns `(platform_event_id, payload_hash)`. The hash is taken over the
/// raw bytes before any parsing, so malformed-but-signed payloads still get
/// an audit record; the id upgrades to the platform-assigned message or
/// status id when a shallow probe finds one, and falls back to the hash
/// otherwise.
pub fn event_identity(raw: &[u8]) -> (String, String) {
    let payload_hash = hex::encode(Sha256::digest(raw));

    let id = serde_json::from_slice::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| probe_platform_id(&v));

    let event_id = id.unwrap_or_else(|| format!("sha256:{payload_hash}"));
    (event_id, payload_hash)
}

/// Non-throwing probe for the platform-assigned id of the first unit in the
/// delivery envelope.
fn probe_platform_id(payload: &serde_json::Value) -> Option<String> {
    let value = &payload["entry"][0]["changes"][0]["value"];

    if let Some(message_id) = value["messages"][0]["id"].as_str() {
        return Some(format!("msg:{message_id}"));
    }

    // Delivery and read receipts share the message id, so the status kind
    // is part of the identity.
    if let Some(status_id) = value["statuses"][0]["id"].as_str() {
        let kind = value["statuses"][0]["status"].as_str().unwrap_or("status");
        return Some(format!("status:{status_id}:{kind}"));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_echoes_challenge() {
        let result = verify_handshake("subscribe", "secret-token", "test123", "secret-token");
        assert_eq!(result, Ok("test123".to_string()));
    }

    #[test]
    fn handshake_rejects_wrong_token() {
        let result = verify_handshake("subscribe", "wrong-token", "test123", "secret-token");
        assert_eq!(result, Err(VerificationError::TokenMismatch));
    }

    #[test]
    fn handshake_rejects_wrong_mode() {
        let result = verify_handshake("unsubscribe", "secret-token", "test123", "secret-token");
        assert_eq!(result, Err(VerificationError::TokenMismatch));
    }

    #[test]
    fn signature_roundtrip() {
        let secret = "app-secret";
        let payload = br#"{"entry":[]}"#;
        let header = format!("sha256={}", sign_payload(secret, payload));

        assert_eq!(verify_signature(secret, payload, &header), Ok(()));
        assert_eq!(
            verify_signature("other-secret", payload, &header),
            Err(VerificationError::BadSignature)
        );
        assert_eq!(
            verify_signature(secret, br#"{"entry":[1]}"#, &header),
            Err(VerificationError::BadSignature)
        );
    }

    #[test]
    fn signature_requires_prefix() {
        let secret = "app-secret";
        let payload = b"{}";
        let bare = sign_payload(secret, payload);
        assert_eq!(
            verify_signature(secret, payload, &bare),
            Err(VerificationError::BadSignature)
        );
    }

    #[test]
    fn identity_prefers_message_id() {
        let raw = br#"{"entry":[{"changes":[{"field":"messages","value":{"messages":[{"id":"wamid.ABC","from":"15550001111"}]}}]}]}"#;
        let (event_id, _) = event_identity(raw);
        assert_eq!(event_id, "msg:wamid.ABC");
    }

    #[test]
    fn identity_distinguishes_status_kinds() {
        let delivered = br#"{"entry":[{"changes":[{"value":{"statuses":[{"id":"wamid.ABC","status":"delivered"}]}}]}]}"#;
        let read = br#"{"entry":[{"changes":[{"value":{"statuses":[{"id":"wamid.ABC","status":"read"}]}}]}]}"#;
        let (id_delivered, _) = event_identity(delivered);
        let (id_read, _) = event_identity(read);
        assert_eq!(id_delivered, "status:wamid.ABC:delivered");
        assert_ne!(id_delivered, id_read);
    }

    #[test]
    fn identity_of_malformed_payload_falls_back_to_hash() {
        let raw = b"not json at all";
        let (event_id, hash) = event_identity(raw);
        assert_eq!(event_id, format!("sha256:{hash}"));
    }

    #[test]
    fn identity_is_stable_across_redelivery() {
        let raw = br#"{"entry":[{"id":"waba-1"}]}"#;
        assert_eq!(event_identity(raw), event_identity(raw));
    }
}
