//! Encryption at rest for tenant provider credentials.
//!
//! Stored values look like `ivHex:authTagHex:cipherTextHex` (AES-256-GCM,
//! 16-byte IV, 16-byte tag, lowercase hex).

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use rand::RngCore;
use tracing::warn;

use crate::config::{Config, Environment};
use crate::error::{CoreError, CoreResult};

type Cipher = AesGcm<Aes256, U16>;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Fallback key for development and test environments only.
pub const DEV_ENCRYPTION_KEY: &str = "default-dev-key-32-bytes-long!!";

pub struct KeyVault {
    key: [u8; KEY_LEN],
    environment: Environment,
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault")
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

/// Right-pad the secret's UTF-8 bytes with spaces, or truncate, to 32 bytes.
fn derive_key(secret: &str) -> [u8; KEY_LEN] {
    let mut key = [b' '; KEY_LEN];
    let bytes = secret.as_bytes();
    let n = bytes.len().min(KEY_LEN);
    key[..n].copy_from_slice(&bytes[..n]);
    key
}

impl KeyVault {
    pub fn new(secret: &str, environment: Environment) -> Self {
        Self {
            key: derive_key(secret),
            environment,
        }
    }

    /// Load the key from `API_KEY_ENCRYPTION_KEY`. Staging and production
    /// refuse to fall back to the development key.
    pub fn from_config(config: &Config) -> CoreResult<Self> {
        match config.encryption_key.as_deref() {
            Some(secret) => Ok(Self::new(secret, config.environment)),
            None if config.environment.requires_encryption_key() => {
                Err(CoreError::Configuration(format!(
                    "API_KEY_ENCRYPTION_KEY must be set in {}",
                    config.environment
                )))
            }
            None => {
                warn!(
                    environment = %config.environment,
                    "API_KEY_ENCRYPTION_KEY is not set; using the insecure development key"
                );
                Ok(Self::new(DEV_ENCRYPTION_KEY, config.environment))
            }
        }
    }

    fn cipher(&self) -> Cipher {
        Cipher::new(GenericArray::from_slice(&self.key))
    }

    pub fn encrypt(&self, plaintext: &str) -> CoreResult<String> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        self.encrypt_with_iv(plaintext, &iv)
    }

    fn encrypt_with_iv(&self, plaintext: &str, iv: &[u8; IV_LEN]) -> CoreResult<String> {
        let sealed = self
            .cipher()
            .encrypt(GenericArray::from_slice(iv), plaintext.as_bytes())
            .map_err(|_| CoreError::invalid("credential is too long to encrypt"))?;
        // aes-gcm appends the tag to the ciphertext.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, stored: &str) -> CoreResult<String> {
        let parts: Vec<&str> = stored.split(':').collect();
        let [iv_hex, tag_hex, ciphertext_hex] = parts.as_slice() else {
            return Err(CoreError::Decryption(
                "expected iv:authTag:ciphertext".to_string(),
            ));
        };

        let iv = decode_hex("iv", iv_hex)?;
        let tag = decode_hex("auth tag", tag_hex)?;
        let ciphertext = decode_hex("ciphertext", ciphertext_hex)?;
        if iv.len() != IV_LEN {
            return Err(CoreError::Decryption(format!(
                "iv must be {IV_LEN} bytes, got {}",
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(CoreError::Decryption(format!(
                "auth tag must be {TAG_LEN} bytes, got {}",
                tag.len()
            )));
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);
        let plaintext = self
            .cipher()
            .decrypt(GenericArray::from_slice(&iv), sealed.as_slice())
            .map_err(|_| CoreError::Decryption("authentication tag mismatch".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| CoreError::Decryption("plaintext is not valid UTF-8".to_string()))
    }

    /// Read path for stored credentials. Values without any `:` predate
    /// encryption and are returned as-is outside production.
    pub fn reveal(&self, stored: &str) -> CoreResult<String> {
        if stored.contains(':') {
            return self.decrypt(stored);
        }
        if self.environment.is_production() {
            return Err(CoreError::Decryption(
                "unencrypted legacy credential refused in production".to_string(),
            ));
        }
        warn!("stored credential is not encrypted; rotate it to re-encrypt");
        Ok(stored.to_string())
    }
}

fn decode_hex(what: &str, value: &str) -> CoreResult<Vec<u8>> {
    hex::decode(value).map_err(|e| CoreError::Decryption(format!("invalid {what} hex: {e}")))
}

/// Short, non-reversible hint of a credential for display: prefix and last four characters.
pub fn mask_credential(credential: &str) -> String {
    let chars: Vec<char> = credential.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{prefix}...{suffix}")
}
