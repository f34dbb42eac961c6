use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};

use crate::config::{BackupSettings, PathsConfig};
use crate::error::{RelayError, Result};
use crate::exec::SystemFiles;
use crate::utils::validate_backup_name;

const METADATA_FILE: &str = "metadata.json";
const MIRROR_DIR: &str = "config_files";

/// Backup manifest, stored as `metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Directory name under the backup root
    pub name: String,
    /// When backup was created
    pub created_at: DateTime<Utc>,
    /// Tracked files that existed and were copied
    pub config_files: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_config: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sasl_config: Option<PathBuf>,
}

impl BackupMetadata {
    fn new(name: String) -> Self {
        BackupMetadata {
            name,
            created_at: Utc::now(),
            config_files: Vec::new(),
            sender_config: None,
            sasl_config: None,
        }
    }
}

/// Backup manager
///
/// Each backup is a directory holding the manifest plus a `config_files/`
/// tree that mirrors the absolute path of every copied file.
pub struct BackupManager {
    files: SystemFiles,
    settings: BackupSettings,
    paths: PathsConfig,
}

/// Location of `source` inside a backup's mirror tree
fn mirror_path(backup_path: &Path, source: &Path) -> PathBuf {
    let relative = source.strip_prefix("/").unwrap_or(source);
    backup_path.join(MIRROR_DIR).join(relative)
}

/// Mode a restored file gets; SASL maps hold the relay password
fn restored_mode(path: &Path) -> u32 {
    match path.file_name().and_then(|n| n.to_str()) {
        Some("sasl_passwd") | Some("sasl_passwd.db") => 0o600,
        _ => 0o644,
    }
}

async fn dir_size(root: &Path) -> Result<u64> {
    let mut total = 0;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                pending.push(entry.path());
            } else {
                total += metadata.len();
            }
        }
    }

    Ok(total)
}

impl BackupManager {
    /// Create new backup manager
    pub fn new(files: SystemFiles, settings: BackupSettings, paths: PathsConfig) -> Self {
        BackupManager {
            files,
            settings,
            paths,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.settings.backup_dir
    }

    /// Generate backup name
    fn generate_backup_name(&self) -> String {
        format!(
            "smtp_relay_backup_{}",
            Utc::now().format("%Y%m%d_%H%M%S_%3f")
        )
    }

    fn backup_path(&self, name: &str) -> Result<PathBuf> {
        validate_backup_name(name)?;
        Ok(self.settings.backup_dir.join(name))
    }

    async fn read_metadata(&self, backup_path: &Path) -> Result<BackupMetadata> {
        let content = fs::read_to_string(backup_path.join(METADATA_FILE))
            .await
            .map_err(|e| {
                RelayError::Backup(format!(
                    "Metadata not found for backup {}: {}",
                    backup_path.display(),
                    e
                ))
            })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Snapshot the tracked files and both JSON stores.
    ///
    /// Missing source files are skipped. An existing backup with the same
    /// name is replaced.
    pub async fn create_backup(&self, name: Option<&str>) -> Result<BackupMetadata> {
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                let mut name = self.generate_backup_name();
                let mut suffix = 1;
                while self.files.exists(&self.settings.backup_dir.join(&name)).await {
                    name = format!("{}_{}", self.generate_backup_name(), suffix);
                    suffix += 1;
                }
                name
            }
        };
        let backup_path = self.backup_path(&name)?;

        info!("Creating backup: {}", backup_path.display());
        if self.files.exists(&backup_path).await {
            self.files.remove_dir_all(&backup_path).await?;
        }
        // owned by this process so listing and restore need no sudo
        self.files
            .create_owned_dir(&self.settings.backup_dir, 0o700)
            .await?;
        self.files.create_owned_dir(&backup_path, 0o700).await?;

        let mut metadata = BackupMetadata::new(name);

        for source in self.paths.tracked_files() {
            if !self.files.exists(&source).await {
                continue;
            }
            self.files
                .copy(&source, &mirror_path(&backup_path, &source))
                .await?;
            info!("Backed up: {}", source.display());
            metadata.config_files.push(source);
        }

        let sender_store = self.paths.sender_store.clone();
        if self.files.exists(&sender_store).await {
            self.files
                .copy(&sender_store, &mirror_path(&backup_path, &sender_store))
                .await?;
            info!("Backed up sender configuration");
            metadata.sender_config = Some(sender_store);
        }

        let relay_store = self.paths.relay_store.clone();
        if self.files.exists(&relay_store).await {
            self.files
                .copy(&relay_store, &mirror_path(&backup_path, &relay_store))
                .await?;
            info!("Backed up SASL configuration");
            metadata.sasl_config = Some(relay_store);
        }

        let manifest = serde_json::to_vec_pretty(&metadata)?;
        self.files
            .write(&backup_path.join(METADATA_FILE), &manifest, 0o644)
            .await?;

        info!("Backup completed: {}", backup_path.display());
        Ok(metadata)
    }

    /// List all backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<BackupMetadata>> {
        let mut backups = Vec::new();

        let mut entries = match fs::read_dir(&self.settings.backup_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(backups),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if !fs::try_exists(path.join(METADATA_FILE)).await.unwrap_or(false) {
                continue;
            }

            match self.read_metadata(&path).await {
                Ok(metadata) => backups.push(metadata),
                Err(e) => warn!("Error reading metadata for {}: {}", path.display(), e),
            }
        }

        // Sort by creation time, newest first
        backups.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });

        Ok(backups)
    }

    pub async fn latest_backup(&self) -> Result<Option<BackupMetadata>> {
        Ok(self.list_backups().await?.into_iter().next())
    }

    /// Copy every file in the manifest back to its original path.
    ///
    /// Stops at the first failure; files restored before it stay restored.
    pub async fn restore_backup(&self, name: &str) -> Result<BackupMetadata> {
        let backup_path = self.backup_path(name)?;
        if !self.files.exists(&backup_path).await {
            error!("Backup {} does not exist", name);
            return Err(RelayError::NotFound(format!("Backup {} does not exist", name)));
        }

        let metadata = self.read_metadata(&backup_path).await?;
        info!("Restoring backup: {}", name);

        for target in &metadata.config_files {
            let copy = mirror_path(&backup_path, target);
            if !self.files.exists(&copy).await {
                warn!("Backup copy of {} is missing, skipping", target.display());
                continue;
            }

            let restored = async {
                self.files.copy(&copy, target).await?;
                self.files.chown_root(target).await?;
                self.files.chmod(target, restored_mode(target)).await
            }
            .await;

            if let Err(e) = restored {
                error!("Failed to restore {}: {}", target.display(), e);
                return Err(RelayError::Backup(format!(
                    "Failed to restore {}: {}",
                    target.display(),
                    e
                )));
            }
            info!("Restored: {}", target.display());
        }

        for store in [&metadata.sender_config, &metadata.sasl_config]
            .into_iter()
            .flatten()
        {
            let copy = mirror_path(&backup_path, store);
            if self.files.exists(&copy).await {
                match self.files.copy(&copy, store).await {
                    Ok(()) => info!("Restored {}", store.display()),
                    Err(e) => error!("Failed to restore {}: {}", store.display(), e),
                }
            }
        }

        info!("Backup {} restored successfully", name);
        Ok(metadata)
    }

    /// Delete a backup
    pub async fn delete_backup(&self, name: &str) -> Result<()> {
        let backup_path = self.backup_path(name)?;

        if !self.files.exists(&backup_path).await {
            return Err(RelayError::NotFound(format!("Backup {} does not exist", name)));
        }

        self.files.remove_dir_all(&backup_path).await?;
        info!("Deleted backup: {}", name);
        Ok(())
    }

    /// Keep the `keep_count` newest backups, returning the names deleted
    pub async fn cleanup_old_backups(&self, keep_count: Option<usize>) -> Result<Vec<String>> {
        let keep_count = keep_count.unwrap_or(self.settings.keep_count);
        let backups = self.list_backups().await?;

        let mut removed = Vec::new();
        for backup in backups.into_iter().skip(keep_count) {
            match self.delete_backup(&backup.name).await {
                Ok(()) => removed.push(backup.name),
                Err(e) => warn!("Failed to delete backup {}: {}", backup.name, e),
            }
        }

        Ok(removed)
    }

    /// Get total backup size in bytes
    pub async fn total_size(&self) -> Result<u64> {
        dir_size(&self.settings.backup_dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exec::mock::MockRunner;
    use crate::exec::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manager(root: &TempDir) -> (BackupManager, Config) {
        let config = Config::rooted_at(root.path());
        std::fs::create_dir_all(&config.paths.postfix_dir).unwrap();
        std::fs::write(config.paths.main_cf(), "relayhost = [smtp.example.com]:587\n").unwrap();
        std::fs::write(config.paths.sasl_passwd(), "[smtp.example.com]:587 u:p\n").unwrap();

        let files = SystemFiles::new(Arc::new(MockRunner::new()), false);
        (
            BackupManager::new(files, config.backup.clone(), config.paths.clone()),
            config,
        )
    }

    #[test]
    fn test_mirror_path() {
        assert_eq!(
            mirror_path(Path::new("/b/x"), Path::new("/etc/postfix/main.cf")),
            PathBuf::from("/b/x/config_files/etc/postfix/main.cf")
        );
    }

    #[test]
    fn test_restored_mode() {
        assert_eq!(restored_mode(Path::new("/etc/postfix/sasl_passwd")), 0o600);
        assert_eq!(restored_mode(Path::new("/etc/postfix/sasl_passwd.db")), 0o600);
        assert_eq!(restored_mode(Path::new("/etc/postfix/main.cf")), 0o644);
    }

    #[tokio::test]
    async fn test_create_backup_records_present_files() {
        let root = TempDir::new().unwrap();
        let (manager, config) = manager(&root);

        let metadata = manager.create_backup(None).await.unwrap();

        assert!(metadata.name.starts_with("smtp_relay_backup_"));
        assert_eq!(
            metadata.config_files,
            vec![config.paths.main_cf(), config.paths.sasl_passwd()]
        );
        assert!(metadata.sender_config.is_none());

        let manifest = manager.backup_dir().join(&metadata.name).join("metadata.json");
        assert!(manifest.exists());
    }

    #[tokio::test]
    async fn test_restore_is_byte_identical() {
        let root = TempDir::new().unwrap();
        let (manager, config) = manager(&root);
        let original = std::fs::read(config.paths.main_cf()).unwrap();

        manager.create_backup(Some("snapshot")).await.unwrap();
        std::fs::remove_file(config.paths.main_cf()).unwrap();
        std::fs::write(config.paths.sasl_passwd(), "tampered").unwrap();

        let metadata = manager.restore_backup("snapshot").await.unwrap();
        assert_eq!(metadata.config_files.len(), 2);
        assert_eq!(std::fs::read(config.paths.main_cf()).unwrap(), original);

        let mode = std::fs::metadata(config.paths.sasl_passwd())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn test_stores_are_backed_up() {
        let root = TempDir::new().unwrap();
        let (manager, config) = manager(&root);
        std::fs::create_dir_all(config.paths.sender_store.parent().unwrap()).unwrap();
        std::fs::write(&config.paths.sender_store, "[{\"name\":\"A\",\"email\":\"a@example.com\"}]").unwrap();

        let metadata = manager.create_backup(Some("with_stores")).await.unwrap();
        assert_eq!(metadata.sender_config.as_ref(), Some(&config.paths.sender_store));

        std::fs::write(&config.paths.sender_store, "[]").unwrap();
        manager.restore_backup("with_stores").await.unwrap();
        assert!(std::fs::read_to_string(&config.paths.sender_store)
            .unwrap()
            .contains("a@example.com"));
    }

    #[tokio::test]
    async fn test_list_and_cleanup() {
        let root = TempDir::new().unwrap();
        let (manager, _) = manager(&root);

        for i in 0..4 {
            manager.create_backup(Some(&format!("b{i}"))).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let names: Vec<String> = manager
            .list_backups()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["b3", "b2", "b1", "b0"]);
        assert_eq!(manager.latest_backup().await.unwrap().unwrap().name, "b3");

        let removed = manager.cleanup_old_backups(Some(2)).await.unwrap();
        assert_eq!(removed, vec!["b1", "b0"]);
        assert_eq!(manager.list_backups().await.unwrap().len(), 2);

        assert!(manager.cleanup_old_backups(Some(10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_manifest_is_skipped() {
        let root = TempDir::new().unwrap();
        let (manager, _) = manager(&root);
        manager.create_backup(Some("good")).await.unwrap();

        let broken = manager.backup_dir().join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join("metadata.json"), "{oops").unwrap();

        let backups = manager.list_backups().await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].name, "good");
    }

    #[tokio::test]
    async fn test_missing_and_invalid_names() {
        let root = TempDir::new().unwrap();
        let (manager, _) = manager(&root);

        assert!(matches!(
            manager.restore_backup("nope").await,
            Err(RelayError::NotFound(_))
        ));
        assert!(matches!(
            manager.delete_backup("nope").await,
            Err(RelayError::NotFound(_))
        ));
        assert!(matches!(
            manager.restore_backup("../etc").await,
            Err(RelayError::Validation(_))
        ));
        assert!(matches!(
            manager.create_backup(Some("..")).await,
            Err(RelayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_total_size() {
        let root = TempDir::new().unwrap();
        let (manager, _) = manager(&root);
        assert_eq!(manager.total_size().await.unwrap(), 0);

        manager.create_backup(Some("sized")).await.unwrap();
        assert!(manager.total_size().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_elevated_backup_uses_privileged_commands() {
        let root = TempDir::new().unwrap();
        let config = Config::rooted_at(root.path());
        std::fs::create_dir_all(&config.paths.postfix_dir).unwrap();
        std::fs::write(config.paths.main_cf(), "x").unwrap();
        let runner = Arc::new(MockRunner::new());
        let files = SystemFiles::new(runner.clone(), true);
        let manager = BackupManager::new(files, config.backup.clone(), config.paths.clone());

        runner.on_ok("id -u", "1000\n");
        runner.on_ok("id -g", "1000\n");

        manager.create_backup(Some("elevated")).await.unwrap();

        let backup = manager.backup_dir().join("elevated");
        assert!(runner.was_called("mkdir -p"));
        assert!(runner.was_called(&format!("chown 1000:1000 {}", backup.display())));
        assert!(runner.was_called(&format!("chmod 700 {}", backup.display())));
        assert!(runner.was_called("cp -p"));
        assert!(runner.was_called("install -D -m 644"));
        assert!(runner
            .calls()
            .iter()
            .all(|c| c.privileged || c.program == "id"));
    }

    /// Runs commands for real without sudo; `chown root:root` is reported
    /// as done so an unprivileged test user can drive the elevated paths.
    struct LocalRunner;

    #[async_trait::async_trait]
    impl CommandRunner for LocalRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            let to_root = spec.args.first().map(String::as_str) == Some("root:root");
            if spec.program == "chown" && to_root {
                return Ok(CommandOutput::ok(""));
            }
            SystemRunner::new(false, Duration::from_secs(10)).run(spec).await
        }
    }

    #[tokio::test]
    async fn test_elevated_backups_stay_readable_by_process_user() {
        let root = TempDir::new().unwrap();
        let config = Config::rooted_at(root.path());
        std::fs::create_dir_all(&config.paths.postfix_dir).unwrap();
        std::fs::write(config.paths.main_cf(), "relayhost = [smtp.example.com]:587\n").unwrap();
        let original = std::fs::read(config.paths.main_cf()).unwrap();

        let files = SystemFiles::new(Arc::new(LocalRunner), true);
        let manager = BackupManager::new(files, config.backup.clone(), config.paths.clone());

        manager.create_backup(Some("before_postfix_setup")).await.unwrap();

        let me = std::fs::metadata(root.path()).unwrap().uid();
        let backup = manager.backup_dir().join("before_postfix_setup");
        let meta = std::fs::metadata(&backup).unwrap();
        assert_eq!(meta.uid(), me);
        assert_eq!(meta.permissions().mode() & 0o777, 0o700);
        assert_eq!(std::fs::metadata(manager.backup_dir()).unwrap().uid(), me);

        let latest = manager.latest_backup().await.unwrap().unwrap();
        assert_eq!(latest.name, "before_postfix_setup");
        assert_eq!(latest.config_files, vec![config.paths.main_cf()]);

        std::fs::write(config.paths.main_cf(), "broken").unwrap();
        manager.restore_backup("before_postfix_setup").await.unwrap();
        assert_eq!(std::fs::read(config.paths.main_cf()).unwrap(), original);
    }

    #[tokio::test]
    async fn test_restore_stops_at_first_failed_file() {
        let root = TempDir::new().unwrap();
        let config = Config::rooted_at(root.path());
        let targets = vec![
            config.paths.main_cf(),
            config.paths.master_cf(),
            config.paths.mailname.clone(),
        ];

        let backup = config.backup.backup_dir.join("partial");
        for target in &targets {
            let copy = mirror_path(&backup, target);
            std::fs::create_dir_all(copy.parent().unwrap()).unwrap();
            std::fs::write(&copy, "saved").unwrap();
        }
        let mut metadata = BackupMetadata::new("partial".to_string());
        metadata.config_files = targets.clone();
        std::fs::write(
            backup.join(METADATA_FILE),
            serde_json::to_vec(&metadata).unwrap(),
        )
        .unwrap();

        let runner = Arc::new(MockRunner::new());
        let failing = mirror_path(&backup, &targets[1]);
        runner.on(
            &format!("cp -p {}", failing.display()),
            1,
            "",
            "cp: cannot create regular file: Read-only file system",
        );
        let files = SystemFiles::new(runner.clone(), true);
        let manager = BackupManager::new(files, config.backup.clone(), config.paths.clone());

        let err = manager.restore_backup("partial").await.unwrap_err();
        assert!(matches!(err, RelayError::Backup(_)));

        let first = targets[0].display().to_string();
        assert!(runner.was_called(&format!("cp -p {}", mirror_path(&backup, &targets[0]).display())));
        assert!(runner.was_called(&format!("chown root:root {}", first)));
        assert!(runner.was_called(&format!("chmod 644 {}", first)));
        assert_eq!(runner.count(&format!("cp -p {}", failing.display())), 1);
        assert!(!runner.was_called(&format!(
            "cp -p {}",
            mirror_path(&backup, &targets[2]).display()
        )));
        assert!(!runner.was_called(&format!("chmod 644 {}", targets[1].display())));
    }
}
