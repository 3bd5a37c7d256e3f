use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::warn;

/// A credential that could not be decrypted during a registry load is
/// degraded to this marker instead of aborting the load.
pub const DECRYPTION_ERROR_MARKER: &str = "[DECRYPTION_ERROR]";

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("base64 decode failed: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("encrypted value too short")]
    TooShort,
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("decrypted value is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Encrypts credential values at rest with AES-256-GCM.
/// Stored form is base64url(nonce || ciphertext).
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Build a vault from a base64url-encoded 256-bit key.
    pub fn new(key: &str) -> Result<Self, VaultError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(key)
            .map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        let cipher = Aes256Gcm::new_from_slice(&bytes)
            .map_err(|_| VaultError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self { cipher })
    }

    /// Build a vault from a configured key, or generate a fresh one when no
    /// key is configured. A generated key is not persisted: credentials
    /// encrypted under it become unreadable after a restart unless the
    /// operator pins the logged value in configuration.
    pub fn from_config(key: Option<&str>) -> Result<Self, VaultError> {
        if let Some(key) = key {
            return Self::new(key);
        }
        let generated = Self::generate_key();
        warn!(
            "No encryption key configured. Generated a new one; set SWITCHBOARD_ENCRYPTION_KEY={} \
             to keep stored credentials decryptable across restarts.",
            generated
        );
        Self::new(&generated)
    }

    /// Generate a random 256-bit key, base64url-encoded.
    pub fn generate_key() -> String {
        let bytes: [u8; 32] = rand::random();
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encrypt(e.to_string()))?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(&combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, VaultError> {
        let combined = URL_SAFE_NO_PAD.decode(encoded)?;

        if combined.len() < 13 {
            return Err(VaultError::TooShort);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| VaultError::Decrypt(e.to_string()))?;

        Ok(String::from_utf8(plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> CredentialVault {
        CredentialVault::new(&CredentialVault::generate_key()).unwrap()
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let vault = test_vault();
        let plaintext = "ghp_super-secret-token-12345";
        let encrypted = vault.encrypt(plaintext).unwrap();
        assert_ne!(encrypted, plaintext);
        assert_eq!(vault.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn encrypt_produces_different_ciphertext_each_time() {
        let vault = test_vault();
        let a = vault.encrypt("same-input").unwrap();
        let b = vault.encrypt("same-input").unwrap();
        assert_ne!(a, b, "random nonce should produce different ciphertext");
        assert_eq!(vault.decrypt(&a).unwrap(), "same-input");
        assert_eq!(vault.decrypt(&b).unwrap(), "same-input");
    }

    #[test]
    fn decrypt_rejects_tampered_ciphertext() {
        let vault = test_vault();
        let encrypted = vault.encrypt("payload").unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&encrypted).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = URL_SAFE_NO_PAD.encode(&raw);
        assert!(matches!(
            vault.decrypt(&tampered),
            Err(VaultError::Decrypt(_))
        ));
    }

    #[test]
    fn decrypt_rejects_foreign_key_ciphertext() {
        let a = test_vault();
        let b = test_vault();
        let encrypted = a.encrypt("not yours").unwrap();
        assert!(b.decrypt(&encrypted).is_err());
    }

    #[test]
    fn decrypt_rejects_short_input() {
        let vault = test_vault();
        let short = URL_SAFE_NO_PAD.encode(b"short");
        assert!(matches!(vault.decrypt(&short), Err(VaultError::TooShort)));
    }

    #[test]
    fn decrypt_rejects_invalid_base64() {
        let vault = test_vault();
        assert!(matches!(
            vault.decrypt("not-valid-base64!!!"),
            Err(VaultError::Decode(_))
        ));
    }

    #[test]
    fn handles_empty_and_unicode_values() {
        let vault = test_vault();
        assert_eq!(vault.decrypt(&vault.encrypt("").unwrap()).unwrap(), "");
        let unicode = "日本語テスト 🔑";
        assert_eq!(
            vault.decrypt(&vault.encrypt(unicode).unwrap()).unwrap(),
            unicode
        );
    }

    #[test]
    fn rejects_wrong_size_key() {
        let short_key = URL_SAFE_NO_PAD.encode(b"too-short");
        assert!(matches!(
            CredentialVault::new(&short_key),
            Err(VaultError::InvalidKey(_))
        ));
    }

    #[test]
    fn from_config_generates_key_when_absent() {
        let vault = CredentialVault::from_config(None).unwrap();
        let encrypted = vault.encrypt("x").unwrap();
        assert_eq!(vault.decrypt(&encrypted).unwrap(), "x");
    }
}
