//! Credential vault: AES-256-GCM encryption for broker access tokens at
//! rest. Decrypted tokens are returned in `Zeroizing` buffers so they are
//! wiped from memory on drop.

use crate::domain::errors::ConfigurationError;
use crate::domain::repositories::broker_client::BrokerCredentials;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use zeroize::Zeroizing;

const MIN_KEY_LEN: usize = 16;
const NONCE_LEN: usize = 12;

pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Build a vault from the configured key material. The key is padded or
    /// truncated to 32 bytes; an empty or short key is a configuration
    /// error, surfaced before any per-user work can run.
    pub fn new(key: &str) -> Result<Self, ConfigurationError> {
        if key.is_empty() {
            return Err(ConfigurationError::MissingEncryptionKey);
        }
        if key.len() < MIN_KEY_LEN {
            return Err(ConfigurationError::WeakEncryptionKey {
                min: MIN_KEY_LEN,
                len: key.len(),
            });
        }

        let mut material = Zeroizing::new([0u8; 32]);
        let bytes = key.as_bytes();
        for (i, slot) in material.iter_mut().enumerate() {
            *slot = if i < bytes.len() { bytes[i] } else { b'0' };
        }

        let cipher = Aes256Gcm::new_from_slice(material.as_ref())
            .map_err(|e| ConfigurationError::CredentialEncryption(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt a plaintext token. Output is base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, ConfigurationError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| ConfigurationError::CredentialEncryption(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    /// Decrypt a stored token blob.
    pub fn decrypt(&self, encrypted: &str) -> Result<Zeroizing<String>, ConfigurationError> {
        let blob = URL_SAFE_NO_PAD
            .decode(encrypted)
            .map_err(|e| ConfigurationError::CredentialDecryption(e.to_string()))?;
        if blob.len() <= NONCE_LEN {
            return Err(ConfigurationError::CredentialDecryption(
                "blob too short".to_string(),
            ));
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| ConfigurationError::CredentialDecryption(e.to_string()))?;
        let plaintext = String::from_utf8(plaintext)
            .map_err(|e| ConfigurationError::CredentialDecryption(e.to_string()))?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Decrypt an account's stored token into adapter-ready credentials.
    pub fn credentials_for(
        &self,
        client_id: &str,
        encrypted_token: &str,
    ) -> Result<BrokerCredentials, ConfigurationError> {
        let token = self.decrypt(encrypted_token)?;
        Ok(BrokerCredentials {
            client_id: client_id.to_string(),
            access_token: token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let vault = CredentialVault::new("unit-test-key-with-enough-length").unwrap();
        let encrypted = vault.encrypt("kite-access-token-123").unwrap();
        assert_ne!(encrypted, "kite-access-token-123");

        let decrypted = vault.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted.as_str(), "kite-access-token-123");
    }

    #[test]
    fn test_distinct_nonces() {
        let vault = CredentialVault::new("unit-test-key-with-enough-length").unwrap();
        let a = vault.encrypt("same-token").unwrap();
        let b = vault.encrypt("same-token").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejects_missing_or_weak_key() {
        assert_eq!(
            CredentialVault::new("").unwrap_err(),
            ConfigurationError::MissingEncryptionKey
        );
        assert!(matches!(
            CredentialVault::new("short").unwrap_err(),
            ConfigurationError::WeakEncryptionKey { .. }
        ));
    }

    #[test]
    fn test_rejects_garbage_blob() {
        let vault = CredentialVault::new("unit-test-key-with-enough-length").unwrap();
        assert!(vault.decrypt("not-base64!!!").is_err());
        assert!(vault.decrypt("AAAA").is_err());
    }

    #[test]
    fn test_key_mismatch_fails() {
        let vault_a = CredentialVault::new("unit-test-key-with-enough-length").unwrap();
        let vault_b = CredentialVault::new("another-key-with-enough-length-x").unwrap();
        let encrypted = vault_a.encrypt("token").unwrap();
        assert!(vault_b.decrypt(&encrypted).is_err());
    }
}
