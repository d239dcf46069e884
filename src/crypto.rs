//! Token encryption module using AES-256-GCM
//!
//! This module provides encryption and decryption utilities for the upstream
//! access and refresh tokens stored on connection rows, using AES-256-GCM with
//! additional authenticated data (AAD) for context binding.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;
const KEY_LEN: usize = 32;
const HEX_KEY_CHARS: usize = KEY_LEN * 2;

/// AAD label every stored token is bound to.
const TOKEN_AAD: &[u8] = b"plansync|upstream-token|v1";

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
    #[error("token encryption key is not configured")]
    MissingKey,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl std::fmt::Debug for ZeroizingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey([REDACTED])")
    }
}

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::EncryptionFailed(
                "Invalid key length: expected 32 bytes".to_string(),
            ));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Derive the 256-bit key from an operator-supplied secret.
    ///
    /// A secret made of at least 64 hex characters is used directly (its first
    /// 64 characters decoded); anything else is treated as a passphrase and
    /// hashed with SHA-256.
    pub fn derive(secret: &str) -> Self {
        let trimmed = secret.trim();
        if trimmed.len() >= HEX_KEY_CHARS
            && let Some(prefix) = trimmed.get(..HEX_KEY_CHARS)
            && let Ok(bytes) = hex::decode(prefix)
        {
            return ZeroizingKey(bytes);
        }

        let digest = Sha256::digest(trimmed.as_bytes());
        ZeroizingKey(digest.to_vec())
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt bytes using AES-256-GCM
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes using AES-256-GCM
///
/// Anything that is not a well-formed version 1 payload is rejected; there is
/// no plaintext fallback.
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }

    if ciphertext[0] != VERSION_ENCRYPTED || ciphertext.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];

    debug_assert!(tag_and_ct.len() >= TAG_LEN);

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Token-level encrypt/decrypt over an optionally configured key.
#[derive(Debug, Clone)]
pub struct TokenCipher {
    key: Option<CryptoKey>,
}

impl TokenCipher {
    pub fn new(key: Option<CryptoKey>) -> Self {
        Self { key }
    }

    /// Build the cipher from the configured secret, if any.
    pub fn from_secret(secret: Option<&str>) -> Self {
        Self::new(
            secret
                .filter(|s| !s.trim().is_empty())
                .map(CryptoKey::derive),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    fn key(&self) -> Result<&CryptoKey, CryptoError> {
        self.key.as_ref().ok_or(CryptoError::MissingKey)
    }

    /// Encrypt a token; identical inputs produce distinct ciphertexts.
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CryptoError> {
        encrypt_bytes(self.key()?, TOKEN_AAD, plaintext.as_bytes())
    }

    /// Decrypt a stored token, failing on any tampering.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<String, CryptoError> {
        let bytes = decrypt_bytes(self.key()?, TOKEN_AAD, ciphertext)?;
        String::from_utf8(bytes)
            .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![0u8; 32]).expect("valid test key")
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"secret message";

        let encrypted = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        let decrypted = decrypt_bytes(&key, aad, &encrypted).expect("decryption succeeds");

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_different_aad_fails() {
        let key = test_key();
        let encrypted = encrypt_bytes(&key, b"aad-1", b"secret").expect("encryption succeeds");
        let result = decrypt_bytes(&key, b"aad-2", &encrypted);

        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_every_tampered_byte_is_detected() {
        let key = test_key();
        let aad = b"test-aad";
        let encrypted = encrypt_bytes(&key, aad, b"secret message").expect("encryption succeeds");

        for index in 0..encrypted.len() {
            let mut tampered = encrypted.clone();
            tampered[index] ^= 0x01;
            assert!(
                decrypt_bytes(&key, aad, &tampered).is_err(),
                "flipping byte {index} must not decrypt"
            );
        }
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"secret message";

        let encrypted1 = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        let encrypted2 = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");

        // Nonces (bytes 1-13) should be different
        assert_ne!(&encrypted1[1..13], &encrypted2[1..13]);
        assert_ne!(encrypted1, encrypted2);
    }

    #[test]
    fn test_plaintext_payload_is_rejected() {
        let key = test_key();
        let result = decrypt_bytes(&key, b"aad", b"legacy-token");
        assert!(matches!(result, Err(CryptoError::InvalidFormat)));
    }

    #[test]
    fn test_empty_and_short_payloads() {
        let key = test_key();
        assert!(matches!(
            decrypt_bytes(&key, b"aad", &[]),
            Err(CryptoError::EmptyCiphertext)
        ));
        assert!(matches!(
            decrypt_bytes(&key, b"aad", &[VERSION_ENCRYPTED, 0x02]),
            Err(CryptoError::InvalidFormat)
        ));
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(CryptoKey::new(vec![0u8; 16]).is_err());
        assert!(CryptoKey::new(vec![0u8; 64]).is_err());
    }

    #[test]
    fn test_derive_uses_hex_secret_directly() {
        let secret = format!("{}{}", "ab".repeat(32), "ffff");
        let key = CryptoKey::derive(&secret);
        assert_eq!(key.as_bytes(), vec![0xabu8; 32].as_slice());
    }

    #[test]
    fn test_derive_hashes_passphrase() {
        let key = CryptoKey::derive("correct horse battery staple");
        let expected = Sha256::digest(b"correct horse battery staple");
        assert_eq!(key.as_bytes(), expected.as_slice());

        // 64 characters that are not all hex fall back to hashing
        let not_hex = "z".repeat(64);
        let key = CryptoKey::derive(&not_hex);
        assert_eq!(key.as_bytes(), Sha256::digest(not_hex.as_bytes()).as_slice());
    }

    #[test]
    fn test_debug_output_hides_key_material() {
        let key = CryptoKey::derive(&"ab".repeat(32));
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains("171"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_token_cipher_roundtrip_and_tamper() {
        let cipher = TokenCipher::from_secret(Some("a passphrase"));
        let encrypted = cipher.encrypt("access-token-123").expect("encrypts");
        assert_eq!(cipher.decrypt(&encrypted).expect("decrypts"), "access-token-123");

        let mut tampered = encrypted.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x80;
        assert!(matches!(
            cipher.decrypt(&tampered),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_token_cipher_without_key_fails() {
        let cipher = TokenCipher::from_secret(None);
        assert!(!cipher.is_configured());
        assert!(matches!(cipher.encrypt("x"), Err(CryptoError::MissingKey)));
        assert!(matches!(cipher.decrypt(&[1, 2, 3]), Err(CryptoError::MissingKey)));
    }

    #[test]
    fn test_different_secrets_cannot_decrypt() {
        let cipher_a = TokenCipher::from_secret(Some("secret-a"));
        let cipher_b = TokenCipher::from_secret(Some("secret-b"));
        let encrypted = cipher_a.encrypt("token").expect("encrypts");
        assert!(cipher_b.decrypt(&encrypted).is_err());
    }
}
