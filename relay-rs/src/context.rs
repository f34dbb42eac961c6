//! Wiring of every component from one [`Config`]
//!
//! The API server and `relayctl` both build a [`RelayContext`] and call
//! into the same components.

use std::path::Path;
use std::sync::Arc;

use crate::admin::BackupManager;
use crate::config::Config;
use crate::error::Result;
use crate::exec::{CommandRunner, SystemFiles, SystemRunner};
use crate::install::{InstallationWizard, Installer};
use crate::postfix::{MailLog, MailQueue, PostfixConfigurator};
use crate::store::{JsonSenderStore, RelayStore, SenderBook};
use crate::system::{PackageManager, ServiceManager, SystemDetector};

pub struct RelayContext {
    pub config: Config,
    pub runner: Arc<dyn CommandRunner>,
    pub files: SystemFiles,
    pub detector: Arc<SystemDetector>,
    pub services: Arc<ServiceManager>,
    pub configurator: Arc<PostfixConfigurator>,
    pub backups: Arc<BackupManager>,
    pub queue: Arc<MailQueue>,
    pub mail_log: Arc<MailLog>,
    pub senders: Arc<SenderBook>,
    pub relay_store: Arc<RelayStore>,
    pub installer: Arc<Installer>,
    pub wizard: Arc<InstallationWizard>,
}

impl RelayContext {
    /// Build on the local host, escalating with sudo when configured
    pub fn system(config: Config) -> Self {
        let runner = Arc::new(SystemRunner::new(
            config.system.use_sudo,
            config.system.command_timeout(),
        ));
        Self::from_config(config, runner)
    }

    pub fn from_config(config: Config, runner: Arc<dyn CommandRunner>) -> Self {
        let files = SystemFiles::new(runner.clone(), config.system.use_sudo);
        let paths = config.paths.clone();

        let detector = Arc::new(SystemDetector::new(runner.clone(), &config.system));
        let services = Arc::new(ServiceManager::new(files.clone(), &config));
        let configurator = Arc::new(PostfixConfigurator::new(
            files.clone(),
            paths.clone(),
            config.system.service_name.clone(),
        ));
        let backups = Arc::new(BackupManager::new(
            files.clone(),
            config.backup.clone(),
            paths.clone(),
        ));
        let relay_store = Arc::new(RelayStore::new(&paths.relay_store, &paths.secret_key));
        let senders = Arc::new(SenderBook::new(Arc::new(JsonSenderStore::new(
            &paths.sender_store,
        ))));

        let installer = Arc::new(Installer::new(
            files.clone(),
            paths.clone(),
            detector.clone(),
            services.clone(),
            configurator.clone(),
            backups.clone(),
            relay_store.clone(),
        ));
        let wizard = Arc::new(InstallationWizard::new(installer.clone(), detector.clone()));

        RelayContext {
            queue: Arc::new(MailQueue::new(runner.clone())),
            mail_log: Arc::new(MailLog::new(runner.clone(), paths.mail_logs.clone())),
            config,
            runner,
            files,
            detector,
            services,
            configurator,
            backups,
            senders,
            relay_store,
            installer,
            wizard,
        }
    }

    /// Create the directories the stores live in.
    ///
    /// They belong to this process, so the sender list and the sealed
    /// credentials are read and written without sudo.
    pub async fn prepare(&self) -> Result<()> {
        let paths = &self.config.paths;
        let mut dirs: Vec<&Path> = Vec::new();
        for file in [&paths.sender_store, &paths.relay_store, &paths.secret_key] {
            match file.parent() {
                Some(dir) if !dir.as_os_str().is_empty() && !dirs.contains(&dir) => dirs.push(dir),
                _ => {}
            }
        }

        for dir in dirs {
            self.files.create_owned_dir(dir, 0o700).await?;
        }
        Ok(())
    }

    /// Package manager for whatever manager this host has
    pub async fn package_manager(&self) -> PackageManager {
        let kind = self.detector.detect_package_manager().await;
        PackageManager::new(self.runner.clone(), kind)
    }
}
