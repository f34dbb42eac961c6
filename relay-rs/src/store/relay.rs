//! Persisted relay configuration (`sasl_config.json`)
//!
//! A single global relay is kept under `relay_hosts`; its password is sealed
//! with the [`SecretCodec`] before it touches disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::secret::{AeadCodec, SecretCodec};
use crate::error::{RelayError, Result};
use crate::postfix::{Provider, RelayConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRelay {
    relay_host: String,
    relay_port: u16,
    username: String,
    /// Sealed password, `v1:...`
    password: String,
    #[serde(default)]
    provider: Provider,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RelayFile {
    #[serde(default)]
    relay_hosts: Vec<StoredRelay>,
}

/// Relay details safe to display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySummary {
    pub relay_host: String,
    pub relay_port: u16,
    pub username: String,
    pub provider: Provider,
    pub updated_at: DateTime<Utc>,
}

pub struct RelayStore {
    path: PathBuf,
    key_path: PathBuf,
    codec: OnceCell<Arc<dyn SecretCodec>>,
}

impl RelayStore {
    /// The codec key is read (or generated) on first use
    pub fn new(path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        RelayStore {
            path: path.into(),
            key_path: key_path.into(),
            codec: OnceCell::new(),
        }
    }

    pub fn with_codec(path: impl Into<PathBuf>, codec: Arc<dyn SecretCodec>) -> Self {
        let path = path.into();
        RelayStore {
            key_path: path.with_extension("key"),
            path,
            codec: OnceCell::new_with(Some(codec)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn codec(&self) -> Result<&Arc<dyn SecretCodec>> {
        self.codec
            .get_or_try_init(|| async {
                let codec = AeadCodec::load_or_create(&self.key_path).await?;
                Ok::<_, RelayError>(Arc::new(codec) as Arc<dyn SecretCodec>)
            })
            .await
    }

    async fn read(&self) -> Result<RelayFile> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RelayFile::default()),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(RelayFile::default());
        }

        match serde_json::from_str(&content) {
            Ok(file) => Ok(file),
            Err(e) => {
                warn!("Malformed relay store {}, ignoring: {}", self.path.display(), e);
                Ok(RelayFile::default())
            }
        }
    }

    async fn write(&self, file: &RelayFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_string_pretty(file)?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Replace the stored relay
    pub async fn save(&self, relay: &RelayConfig) -> Result<()> {
        let sealed = self.codec().await?.seal(&relay.password)?;

        let file = RelayFile {
            relay_hosts: vec![StoredRelay {
                relay_host: relay.relay_host.clone(),
                relay_port: relay.relay_port,
                username: relay.username.clone(),
                password: sealed,
                provider: relay.provider,
                updated_at: Utc::now(),
            }],
        };
        self.write(&file).await?;

        info!("Saved relay {} to {}", relay.relayhost(), self.path.display());
        Ok(())
    }

    /// Stored relay with its password opened
    pub async fn load(&self) -> Result<Option<RelayConfig>> {
        let file = self.read().await?;
        let Some(stored) = file.relay_hosts.into_iter().next() else {
            return Ok(None);
        };

        let password = self.codec().await?.open(&stored.password)?;
        Ok(Some(RelayConfig {
            relay_host: stored.relay_host,
            relay_port: stored.relay_port,
            username: stored.username,
            password,
            provider: stored.provider,
        }))
    }

    /// Stored relay without the password; never needs the key
    pub async fn summary(&self) -> Result<Option<RelaySummary>> {
        let file = self.read().await?;
        Ok(file.relay_hosts.into_iter().next().map(|stored| RelaySummary {
            relay_host: stored.relay_host,
            relay_port: stored.relay_port,
            username: stored.username,
            provider: stored.provider,
            updated_at: stored.updated_at,
        }))
    }

    pub async fn clear(&self) -> Result<()> {
        self.write(&RelayFile::default()).await?;
        info!("Cleared stored relay");
        Ok(())
    }
}
