use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{RelayError, Result};
use crate::utils::validate_email;

/// A sender address allowed to use the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub name: String,
    pub email: String,
}

impl Sender {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Sender {
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RelayError::Validation("Sender name cannot be empty".to_string()));
        }
        validate_email(&self.email)
    }
}

/// Persistence for the ordered sender list
#[async_trait::async_trait]
pub trait SenderStore: Send + Sync {
    async fn load(&self) -> Result<Vec<Sender>>;

    async fn save(&self, senders: &[Sender]) -> Result<()>;
}

/// Sender list kept as a JSON array on disk
pub struct JsonSenderStore {
    path: PathBuf,
}

impl JsonSenderStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonSenderStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl SenderStore for JsonSenderStore {
    async fn load(&self) -> Result<Vec<Sender>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            self.save(&[]).await?;
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str(&content) {
            Ok(senders) => Ok(senders),
            Err(e) => {
                warn!(
                    "Malformed sender store {}, treating as empty: {}",
                    self.path.display(),
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, senders: &[Sender]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_string_pretty(senders)?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Index-addressed sender operations.
///
/// Entries are identified by their position, so deleting one shifts every
/// later index down. Edits inside this process are serialised.
pub struct SenderBook {
    store: Arc<dyn SenderStore>,
    lock: Mutex<()>,
}

fn out_of_range(index: usize, len: usize) -> RelayError {
    RelayError::NotFound(format!("Sender {} not found ({} senders)", index, len))
}

impl SenderBook {
    pub fn new(store: Arc<dyn SenderStore>) -> Self {
        SenderBook {
            store,
            lock: Mutex::new(()),
        }
    }

    pub async fn list(&self) -> Result<Vec<Sender>> {
        self.store.load().await
    }

    pub async fn get(&self, index: usize) -> Result<Sender> {
        let senders = self.store.load().await?;
        let len = senders.len();
        senders
            .into_iter()
            .nth(index)
            .ok_or_else(|| out_of_range(index, len))
    }

    /// Append a sender, returning its index
    pub async fn add(&self, sender: Sender) -> Result<usize> {
        sender.validate()?;
        let _guard = self.lock.lock().await;

        let mut senders = self.store.load().await?;
        info!("Adding sender {} <{}>", sender.name, sender.email);
        senders.push(sender);
        self.store.save(&senders).await?;

        Ok(senders.len() - 1)
    }

    pub async fn update(&self, index: usize, sender: Sender) -> Result<Sender> {
        sender.validate()?;
        let _guard = self.lock.lock().await;

        let mut senders = self.store.load().await?;
        let len = senders.len();
        let slot = senders.get_mut(index).ok_or_else(|| out_of_range(index, len))?;
        *slot = sender.clone();
        self.store.save(&senders).await?;

        info!("Updated sender {}", index);
        Ok(sender)
    }

    /// Remove and return the sender at `index`
    pub async fn delete(&self, index: usize) -> Result<Sender> {
        let _guard = self.lock.lock().await;

        let mut senders = self.store.load().await?;
        if index >= senders.len() {
            return Err(out_of_range(index, senders.len()));
        }
        let removed = senders.remove(index);
        self.store.save(&senders).await?;

        info!("Deleted sender {} <{}>", removed.name, removed.email);
        Ok(removed)
    }
}
