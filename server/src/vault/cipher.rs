//! Token Sealing
//!
//! AES-256-GCM encryption for channel access tokens stored in the database.
//! Tokens are never stored in plaintext, and tampering with a stored record
//! fails authentication instead of yielding garbage plaintext.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use thiserror::Error;
use zeroize::Zeroizing;

/// Version tag embedded in every sealed record. A future key rotation bumps
/// this without breaking existing records.
const KEY_VERSION: &str = "v1";

/// Cipher errors.
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Invalid encryption key length (expected 32 bytes, got {0})")]
    InvalidKeyLength(usize),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid sealed data format")]
    InvalidFormat,

    #[error("Unsupported key version: {0}")]
    UnsupportedVersion(String),

    #[error("Hex decoding failed: {0}")]
    HexError(#[from] hex::FromHexError),
}

pub type CipherResult<T> = Result<T, CipherError>;

/// Seal a token using AES-256-GCM.
///
/// # Arguments
/// * `token` - The plaintext access token
/// * `key` - 32-byte encryption key
///
/// # Returns
/// String of the form `v1:<hex>` where hex encodes
/// nonce(12 bytes) || ciphertext || tag(16 bytes)
pub fn seal_token(token: &str, key: &[u8]) -> CipherResult<String> {
    if key.len() != 32 {
        return Err(CipherError::InvalidKeyLength(key.len()));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;

    // Random nonce per record (12 bytes for GCM)
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, token.as_bytes())
        .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;

    // nonce || ciphertext (the auth tag rides at the end of the ciphertext)
    let mut combined = nonce.to_vec();
    combined.extend_from_slice(&ciphertext);

    Ok(format!("{KEY_VERSION}:{}", hex::encode(combined)))
}

/// Open a sealed token produced by [`seal_token`].
///
/// Fails with [`CipherError::DecryptionFailed`] when the authentication tag
/// does not verify (tampering or wrong key) — never returns partial
/// plaintext. Unknown version tags are rejected before any decryption.
pub fn open_token(sealed: &str, key: &[u8]) -> CipherResult<Zeroizing<String>> {
    if key.len() != 32 {
        return Err(CipherError::InvalidKeyLength(key.len()));
    }

    let (version, encoded) = sealed.split_once(':').ok_or(CipherError::InvalidFormat)?;
    if version != KEY_VERSION {
        return Err(CipherError::UnsupportedVersion(version.to_string()));
    }

    let combined = hex::decode(encoded)?;

    if combined.len() < 12 {
        return Err(CipherError::InvalidFormat);
    }

    let (nonce_bytes, ciphertext) = combined.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CipherError::DecryptionFailed(e.to_string()))?;

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CipherError::DecryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext)
        .map(Zeroizing::new)
        .map_err(|e| CipherError::DecryptionFailed(format!("Invalid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = [0u8; 32];
        let token = "EAAGm0PX4ZCpsBAKZCZBq";

        let sealed = seal_token(token, &key).expect("sealing failed");
        assert!(sealed.starts_with("v1:"));
        let opened = open_token(&sealed, &key).expect("opening failed");

        assert_eq!(token, opened.as_str());
    }

    #[test]
    fn test_different_keys_fail() {
        let key1 = [0u8; 32];
        let key2 = [1u8; 32];

        let sealed = seal_token("secret-token", &key1).expect("sealing failed");
        let result = open_token(&sealed, &key2);

        assert!(matches!(result, Err(CipherError::DecryptionFailed(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let key = [7u8; 32];
        let sealed = seal_token("secret-token", &key).expect("sealing failed");

        // Flip one byte of the hex payload past the version tag and nonce.
        let mut bytes = sealed.into_bytes();
        let i = bytes.len() - 4;
        bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(bytes).expect("still valid utf-8");

        let result = open_token(&tampered, &key);
        assert!(matches!(result, Err(CipherError::DecryptionFailed(_))));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let key = [0u8; 32];
        let sealed = seal_token("secret-token", &key).expect("sealing failed");
        let v2 = sealed.replacen("v1:", "v2:", 1);

        let result = open_token(&v2, &key);
        assert!(matches!(result, Err(CipherError::UnsupportedVersion(_))));
    }

    #[test]
    fn test_invalid_key_length() {
        let short_key = [0u8; 16];
        let result = seal_token("secret-token", &short_key);
        assert!(matches!(result, Err(CipherError::InvalidKeyLength(16))));
    }

    #[test]
    fn test_nonce_randomness() {
        let key = [0u8; 32];
        let token = "secret-token";

        let sealed1 = seal_token(token, &key).expect("sealing 1 failed");
        let sealed2 = seal_token(token, &key).expect("sealing 2 failed");

        // Same plaintext + key must produce different records (random nonce)
        assert_ne!(sealed1, sealed2);

        assert_eq!(open_token(&sealed1, &key).expect("open 1").as_str(), token);
        assert_eq!(open_token(&sealed2, &key).expect("open 2").as_str(), token);
    }
}
