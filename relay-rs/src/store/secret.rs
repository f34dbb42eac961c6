//! Credential encryption at rest
//!
//! Stored secrets look like `v1:<base64(nonce || ciphertext || tag)>`, sealed
//! with AES-256-GCM under a 32-byte key kept in its own file (mode 600).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::{RelayError, Result};

const SCHEME: &str = "v1";
const KEY_LEN: usize = 32;

/// Seals and opens secrets persisted to disk
pub trait SecretCodec: Send + Sync {
    fn seal(&self, plaintext: &str) -> Result<String>;

    fn open(&self, sealed: &str) -> Result<String>;

    /// Prefix identifying the format of sealed values
    fn scheme(&self) -> &'static str;
}

/// AES-256-GCM codec
pub struct AeadCodec {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl AeadCodec {
    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, bytes)
            .map_err(|_| RelayError::Secret(format!("Key must be {} bytes", KEY_LEN)))?;

        Ok(AeadCodec {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    pub fn generate_key() -> Result<[u8; KEY_LEN]> {
        let mut key = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| RelayError::Secret("Random generator failure".to_string()))?;
        Ok(key)
    }

    /// Read the key file, creating it with a fresh key on first use
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            let encoded = fs::read_to_string(path).await?;
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|e| RelayError::Secret(format!("Corrupt key file {}: {}", path.display(), e)))?;
            return Self::from_key_bytes(&bytes);
        }

        let key = Self::generate_key()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .await?;
        file.write_all(STANDARD.encode(key).as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        info!("Generated credential key at {}", path.display());
        Self::from_key_bytes(&key)
    }
}

impl SecretCodec for AeadCodec {
    fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| RelayError::Secret("Random generator failure".to_string()))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| RelayError::Secret("Encryption failed".to_string()))?;

        let mut payload = nonce_bytes.to_vec();
        payload.extend_from_slice(&in_out);

        Ok(format!("{}:{}", SCHEME, STANDARD.encode(payload)))
    }

    fn open(&self, sealed: &str) -> Result<String> {
        let encoded = sealed
            .strip_prefix(SCHEME)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| RelayError::Secret("Unknown secret format".to_string()))?;

        let payload = STANDARD
            .decode(encoded)
            .map_err(|e| RelayError::Secret(format!("Invalid base64: {}", e)))?;

        if payload.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(RelayError::Secret("Sealed value too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| RelayError::Secret("Invalid nonce".to_string()))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| RelayError::Secret("Decryption failed (wrong key or tampered value)".to_string()))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| RelayError::Secret("Decrypted value is not UTF-8".to_string()))
    }

    fn scheme(&self) -> &'static str {
        SCHEME
    }
}
