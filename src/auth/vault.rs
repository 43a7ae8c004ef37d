//! Credential vault
//!
//! Encrypts long-lived platform tokens at rest with AES-256-GCM and hashes
//! API keys for lookup.
//!
//! The encryption key is derived from the application secret with Argon2id
//! using a fixed salt. Changing the secret, the salt or the cost parameters
//! yields a different key, after which every stored token fails to decrypt
//! and accounts must be reconnected.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE_NO_PAD},
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::config::SecurityConfig;
use crate::error::AppError;

const AES_256_KEY_BYTES: usize = 32;
const AES_GCM_NONCE_BYTES: usize = 12;
const API_KEY_HASH_PREFIX: &str = "sha256:";
const API_KEY_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Derived symmetric key
#[derive(Clone)]
pub struct VaultKey([u8; AES_256_KEY_BYTES]);

impl VaultKey {
    /// Derive a key from a secret with Argon2id
    ///
    /// Deliberately slow; call once at startup.
    pub fn derive(
        secret: &str,
        salt: &str,
        iterations: u32,
        memory_kib: u32,
    ) -> Result<Self, AppError> {
        let params = Params::new(memory_kib, iterations, 1, Some(AES_256_KEY_BYTES))
            .map_err(|e| AppError::Config(format!("invalid key derivation parameters: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0_u8; AES_256_KEY_BYTES];
        argon2
            .hash_password_into(secret.as_bytes(), salt.as_bytes(), &mut key)
            .map_err(|e| AppError::Config(format!("key derivation failed: {}", e)))?;

        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; AES_256_KEY_BYTES]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

/// Encrypt raw bytes; output is IV followed by ciphertext and tag
pub fn seal(data: &[u8], key: &VaultKey) -> Result<Vec<u8>, AppError> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|_| AppError::EncryptionFailed("invalid key length".to_string()))?;

    let mut nonce = [0_u8; AES_GCM_NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), data)
        .map_err(|_| AppError::EncryptionFailed("cipher error".to_string()))?;

    let mut out = Vec::with_capacity(AES_GCM_NONCE_BYTES + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt bytes produced by [`seal`]
pub fn open(data: &[u8], key: &VaultKey) -> Result<Vec<u8>, AppError> {
    if data.len() <= AES_GCM_NONCE_BYTES {
        return Err(AppError::DecryptionFailed);
    }

    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| AppError::DecryptionFailed)?;
    let (nonce, ciphertext) = data.split_at(AES_GCM_NONCE_BYTES);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| AppError::DecryptionFailed)
}

/// Encrypt a token; a fresh random IV is used on every call
///
/// Identical plaintexts produce different ciphertexts, so stored values
/// can only be compared after decryption.
pub fn encrypt(plaintext: &str, key: &VaultKey) -> Result<String, AppError> {
    let sealed = seal(plaintext.as_bytes(), key)?;
    Ok(BASE64_STANDARD.encode(sealed))
}

/// Decrypt a token produced by [`encrypt`]
///
/// # Errors
/// `DecryptionFailed` for malformed base64, a wrong key, or tampered data
pub fn decrypt(ciphertext: &str, key: &VaultKey) -> Result<String, AppError> {
    let sealed = BASE64_STANDARD
        .decode(ciphertext.trim())
        .map_err(|_| AppError::DecryptionFailed)?;
    let plaintext = open(&sealed, key)?;
    String::from_utf8(plaintext).map_err(|_| AppError::DecryptionFailed)
}

/// Token vault bound to the application's derived key
#[derive(Debug, Clone)]
pub struct CredentialVault {
    key: VaultKey,
    hash_key: Vec<u8>,
}

impl CredentialVault {
    /// Build the vault from security configuration
    pub fn from_config(config: &SecurityConfig) -> Result<Self, AppError> {
        let key = VaultKey::derive(
            &config.encryption_secret,
            &config.kdf_salt,
            config.kdf_iterations,
            config.kdf_memory_kib,
        )?;
        Ok(Self::new(key, config.encryption_secret.as_bytes()))
    }

    pub fn new(key: VaultKey, hash_secret: &[u8]) -> Self {
        Self {
            key,
            hash_key: hash_secret.to_vec(),
        }
    }

    pub fn key(&self) -> &VaultKey {
        &self.key
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        encrypt(plaintext, &self.key)
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, AppError> {
        decrypt(ciphertext, &self.key)
    }

    pub fn encrypt_optional(&self, plaintext: Option<&str>) -> Result<Option<String>, AppError> {
        plaintext.map(|value| self.encrypt(value)).transpose()
    }

    /// Fixed-length keyed digest of an API key
    ///
    /// Deterministic, so the digest doubles as the lookup key.
    pub fn hash(&self, api_key: &str) -> Result<String, AppError> {
        let mut mac = <HmacSha256 as KeyInit>::new_from_slice(&self.hash_key)
            .map_err(|e| AppError::EncryptionFailed(e.to_string()))?;
        mac.update(api_key.as_bytes());
        let digest = mac.finalize().into_bytes();
        Ok(format!(
            "{}{}",
            API_KEY_HASH_PREFIX,
            URL_SAFE_NO_PAD.encode(digest)
        ))
    }

    /// Generate a new API key
    ///
    /// # Returns
    /// `(plaintext, hash)`; only the hash may be persisted
    pub fn generate_api_key(&self) -> Result<(String, String), AppError> {
        let mut bytes = [0_u8; API_KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let plaintext = format!("cf_{}", URL_SAFE_NO_PAD.encode(bytes));
        let hash = self.hash(&plaintext)?;
        Ok((plaintext, hash))
    }
}

#[cfg(test)]
pub(crate) fn test_vault() -> CredentialVault {
    CredentialVault::new(VaultKey::from_bytes([7_u8; 32]), b"test-hash-secret")
}
