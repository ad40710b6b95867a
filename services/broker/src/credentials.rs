//! Credential generation and the password codec.
//!
//! Generated instance passwords are sealed with AES-256-GCM under a
//! process-wide key before they reach the record store:
//! - Key: operator-managed, loaded from env or file at startup
//! - Nonce: random per encryption, stored beside the ciphertext
//!
//! The key is never derived from request data.

use std::fmt;
use std::fs;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::Engine as _;
use rand::{distr::Alphanumeric, Rng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;
const PASSWORD_AAD: &[u8] = b"stratus-instance-password-v1";

/// Minimum length of generated passwords.
pub const MIN_PASSWORD_LENGTH: usize = 32;

/// Length of generated usernames and database names.
const IDENTIFIER_LENGTH: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("missing encryption key (set STRATUS_ENCRYPTION_KEY or STRATUS_ENCRYPTION_KEY_FILE)")]
    MissingKey,
    #[error("invalid encryption key encoding")]
    InvalidKey,
    #[error("password encryption failed")]
    EncryptFailed,
    #[error("password decryption failed")]
    DecryptionFailed,
}

/// The persisted, encrypted form of an instance password.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedPassword {
    /// Fingerprint of the key that sealed the password.
    pub key_id: String,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl fmt::Debug for EncryptedPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedPassword")
            .field("key_id", &self.key_id)
            .field("ciphertext", &"<redacted>")
            .finish()
    }
}

/// Symmetric codec for instance passwords.
#[derive(Clone)]
pub struct CredentialCodec {
    key_id: String,
    key_bytes: [u8; KEY_BYTES],
}

impl fmt::Debug for CredentialCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCodec")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

fn key_id_for_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)[..8].to_string()
}

impl CredentialCodec {
    pub fn new(key_bytes: [u8; KEY_BYTES]) -> Self {
        Self {
            key_id: key_id_for_bytes(&key_bytes),
            key_bytes,
        }
    }

    /// Build a codec from a base64-encoded 32-byte key.
    pub fn from_base64(raw: &str) -> Result<Self, CodecError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(raw.trim())
            .map_err(|_| CodecError::InvalidKey)?;
        let key_bytes: [u8; KEY_BYTES] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CodecError::InvalidKey)?;
        Ok(Self::new(key_bytes))
    }

    /// Load the key from `STRATUS_ENCRYPTION_KEY`, falling back to the file
    /// named by `STRATUS_ENCRYPTION_KEY_FILE`.
    pub fn from_env() -> Result<Self, CodecError> {
        if let Ok(raw) = std::env::var("STRATUS_ENCRYPTION_KEY") {
            return Self::from_base64(&raw);
        }

        if let Ok(path) = std::env::var("STRATUS_ENCRYPTION_KEY_FILE") {
            let contents = fs::read_to_string(path).map_err(|_| CodecError::InvalidKey)?;
            return Self::from_base64(&contents);
        }

        Err(CodecError::MissingKey)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedPassword, CodecError> {
        let mut nonce_bytes = [0u8; NONCE_BYTES];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher =
            Aes256Gcm::new_from_slice(&self.key_bytes).map_err(|_| CodecError::EncryptFailed)?;
        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: PASSWORD_AAD,
                },
            )
            .map_err(|_| CodecError::EncryptFailed)?;

        Ok(EncryptedPassword {
            key_id: self.key_id.clone(),
            nonce: nonce_bytes.to_vec(),
            ciphertext,
        })
    }

    pub fn decrypt(&self, secret: &EncryptedPassword) -> Result<String, CodecError> {
        if secret.key_id != self.key_id || secret.nonce.len() != NONCE_BYTES {
            return Err(CodecError::DecryptionFailed);
        }

        let nonce = Nonce::from_slice(&secret.nonce);
        let cipher =
            Aes256Gcm::new_from_slice(&self.key_bytes).map_err(|_| CodecError::DecryptionFailed)?;
        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &secret.ciphertext,
                    aad: PASSWORD_AAD,
                },
            )
            .map_err(|_| CodecError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CodecError::DecryptionFailed)
    }
}

/// Generate a password that satisfies provider constraints: alphanumeric
/// only (no `/`, `@`, `"` or spaces), at least one digit, one lowercase and
/// one uppercase letter.
pub fn generate_password(length: usize) -> String {
    let length = length.max(MIN_PASSWORD_LENGTH);
    let mut rng = rand::rng();
    loop {
        let candidate: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect();

        let has_digit = candidate.chars().any(|c| c.is_ascii_digit());
        let has_lower = candidate.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = candidate.chars().any(|c| c.is_ascii_uppercase());
        if has_digit && has_lower && has_upper {
            return candidate;
        }
    }
}

/// Generate an engine identifier (username or database name): a letter
/// followed by lowercase alphanumerics.
pub fn generate_identifier(leading: char) -> String {
    let mut rng = rand::rng();
    let tail: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .map(|b| char::from(b).to_ascii_lowercase())
        .take(IDENTIFIER_LENGTH - 1)
        .collect();
    format!("{leading}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(seed: u8) -> CredentialCodec {
        CredentialCodec::new([seed; KEY_BYTES])
    }

    #[test]
    fn test_roundtrip_with_same_key() {
        let codec = codec(7);
        let password = generate_password(MIN_PASSWORD_LENGTH);

        let sealed = codec.encrypt(&password).unwrap();
        assert_ne!(sealed.ciphertext, password.as_bytes());
        assert_eq!(codec.decrypt(&sealed).unwrap(), password);
    }

    #[test]
    fn test_decrypt_with_different_key_fails() {
        let sealed = codec(1).encrypt("hunter2hunter2").unwrap();
        assert_eq!(
            codec(2).decrypt(&sealed),
            Err(CodecError::DecryptionFailed)
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let codec = codec(3);
        let mut sealed = codec.encrypt("secret-value").unwrap();
        sealed.ciphertext[0] ^= 0xff;
        assert_eq!(codec.decrypt(&sealed), Err(CodecError::DecryptionFailed));

        sealed.nonce.truncate(4);
        assert_eq!(codec.decrypt(&sealed), Err(CodecError::DecryptionFailed));
    }

    #[test]
    fn test_nonce_is_fresh_per_encryption() {
        let codec = codec(4);
        let a = codec.encrypt("same").unwrap();
        let b = codec.encrypt("same").unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_from_base64_rejects_wrong_length() {
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 16]);
        assert_eq!(
            CredentialCodec::from_base64(&short).unwrap_err(),
            CodecError::InvalidKey
        );

        let good = base64::engine::general_purpose::STANDARD.encode([9u8; 32]);
        assert_eq!(
            CredentialCodec::from_base64(&good).unwrap().key_id(),
            codec(9).key_id()
        );
    }

    #[test]
    fn test_generated_password_policy() {
        let password = generate_password(8);
        assert_eq!(password.len(), MIN_PASSWORD_LENGTH);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(password.chars().any(|c| c.is_ascii_digit()));
        assert!(password.chars().any(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn test_generated_identifier_shape() {
        let name = generate_identifier('u');
        assert_eq!(name.len(), IDENTIFIER_LENGTH);
        assert!(name.starts_with('u'));
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_debug_redacts_ciphertext() {
        let sealed = codec(5).encrypt("top-secret").unwrap();
        let rendered = format!("{sealed:?}");
        assert!(rendered.contains("<redacted>"));
    }
}
