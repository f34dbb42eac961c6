use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::exec::{CommandRunner, CommandSpec, SystemFiles};
use crate::postfix::main_cf::DEFAULT_MAIN_CF;

/// Aggregated Postfix health, each field queried independently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostfixStatus {
    pub active: bool,
    pub enabled: bool,
    pub config_valid: bool,
}

/// systemd service lifecycle
pub struct ServiceManager {
    runner: Arc<dyn CommandRunner>,
    files: SystemFiles,
    service_name: String,
    main_cf: PathBuf,
}

impl ServiceManager {
    pub fn new(files: SystemFiles, config: &Config) -> Self {
        ServiceManager {
            runner: files.runner().clone(),
            files,
            service_name: config.system.service_name.clone(),
            main_cf: config.paths.main_cf(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    async fn systemctl(&self, verb: &str, name: &str) -> Result<()> {
        self.runner
            .run_checked(&CommandSpec::root("systemctl").args([verb, name]))
            .await?;
        Ok(())
    }

    pub async fn start_service(&self, name: &str) -> Result<()> {
        self.systemctl("start", name).await
    }

    pub async fn stop_service(&self, name: &str) -> Result<()> {
        self.systemctl("stop", name).await
    }

    pub async fn restart_service(&self, name: &str) -> Result<()> {
        self.systemctl("restart", name).await
    }

    /// Start at boot
    pub async fn enable_service(&self, name: &str) -> Result<()> {
        self.systemctl("enable", name).await
    }

    pub async fn disable_service(&self, name: &str) -> Result<()> {
        self.systemctl("disable", name).await
    }

    pub async fn is_service_active(&self, name: &str) -> bool {
        match self
            .runner
            .run(&CommandSpec::new("systemctl").args(["is-active", name]))
            .await
        {
            Ok(output) => output.success() && output.stdout.trim() == "active",
            Err(e) => {
                warn!("Could not query {} state: {}", name, e);
                false
            }
        }
    }

    pub async fn is_service_enabled(&self, name: &str) -> bool {
        match self
            .runner
            .run(&CommandSpec::new("systemctl").args(["is-enabled", name]))
            .await
        {
            Ok(output) => {
                output.success() && matches!(output.stdout.trim(), "enabled" | "enabled-runtime")
            }
            Err(e) => {
                warn!("Could not query {} boot state: {}", name, e);
                false
            }
        }
    }

    /// Start Postfix unless it is already running
    pub async fn start_postfix(&self) -> Result<()> {
        if self.is_service_active(&self.service_name).await {
            info!("Postfix is already running");
            return Ok(());
        }
        self.start_service(&self.service_name).await.map_err(|e| {
            error!("Failed to start Postfix service: {}", e);
            e
        })?;
        info!("Postfix service started");
        Ok(())
    }

    pub async fn stop_postfix(&self) -> Result<()> {
        if !self.is_service_active(&self.service_name).await {
            info!("Postfix is already stopped");
            return Ok(());
        }
        self.stop_service(&self.service_name).await.map_err(|e| {
            error!("Failed to stop Postfix service: {}", e);
            e
        })?;
        info!("Postfix service stopped");
        Ok(())
    }

    pub async fn restart_postfix(&self) -> Result<()> {
        self.restart_service(&self.service_name).await.map_err(|e| {
            error!("Failed to restart Postfix service: {}", e);
            e
        })?;
        info!("Postfix service restarted");
        Ok(())
    }

    pub async fn enable_postfix(&self) -> Result<()> {
        if self.is_service_enabled(&self.service_name).await {
            info!("Postfix is already enabled at boot");
            return Ok(());
        }
        self.enable_service(&self.service_name).await?;
        info!("Postfix service enabled at boot");
        Ok(())
    }

    pub async fn disable_postfix(&self) -> Result<()> {
        if !self.is_service_enabled(&self.service_name).await {
            info!("Postfix is already disabled at boot");
            return Ok(());
        }
        self.disable_service(&self.service_name).await?;
        info!("Postfix service disabled from boot");
        Ok(())
    }

    /// `postfix check`, exit code 0 means valid
    pub async fn check_postfix_config(&self) -> bool {
        match self
            .runner
            .run(&CommandSpec::root("postfix").arg("check"))
            .await
        {
            Ok(output) if output.success() => true,
            Ok(output) => {
                error!("Postfix configuration error: {}", output.stderr.trim());
                false
            }
            Err(e) => {
                error!("Error checking Postfix config: {}", e);
                false
            }
        }
    }

    pub async fn get_postfix_status(&self) -> PostfixStatus {
        PostfixStatus {
            active: self.is_service_active(&self.service_name).await,
            enabled: self.is_service_enabled(&self.service_name).await,
            config_valid: self.check_postfix_config().await,
        }
    }

    /// Path of the one-time copy of the distribution main.cf
    pub fn original_main_cf_backup(&self) -> PathBuf {
        let mut name = self.main_cf.clone().into_os_string();
        name.push(".autoscript_backup");
        PathBuf::from(name)
    }

    /// Write the minimal relay-only main.cf and restart Postfix.
    ///
    /// The first call keeps a copy of the existing main.cf; later calls
    /// never overwrite that copy.
    pub async fn setup_postfix_basic_config(&self) -> Result<()> {
        let backup = self.original_main_cf_backup();
        if !self.files.exists(&backup).await && self.files.exists(&self.main_cf).await {
            self.files.copy(&self.main_cf, &backup).await?;
            info!(
                "Backed up original {} to {}",
                self.main_cf.display(),
                backup.display()
            );
        }

        self.files
            .write(&self.main_cf, DEFAULT_MAIN_CF.as_bytes(), 0o644)
            .await?;
        info!("Basic Postfix configuration applied");

        self.restart_postfix().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::MockRunner;
    use tempfile::TempDir;

    fn manager(root: &TempDir, runner: Arc<MockRunner>) -> (ServiceManager, Config) {
        let config = Config::rooted_at(root.path());
        let files = SystemFiles::new(runner, false);
        (ServiceManager::new(files, &config), config)
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on_ok("systemctl is-active postfix", "active\n");
        let (services, _) = manager(&root, runner.clone());

        services.start_postfix().await.unwrap();
        assert!(!runner.was_called("systemctl start"));
    }

    #[tokio::test]
    async fn test_start_when_inactive() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on("systemctl is-active postfix", 3, "inactive\n", "");
        let (services, _) = manager(&root, runner.clone());

        services.start_postfix().await.unwrap();
        let start = runner
            .calls()
            .into_iter()
            .find(|c| c.display() == "systemctl start postfix")
            .unwrap();
        assert!(start.privileged);
    }

    #[tokio::test]
    async fn test_stop_and_disable_noop_when_already_down() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on("systemctl is-active", 3, "inactive\n", "");
        runner.on("systemctl is-enabled", 1, "disabled\n", "");
        let (services, _) = manager(&root, runner.clone());

        services.stop_postfix().await.unwrap();
        services.disable_postfix().await.unwrap();
        assert!(!runner.was_called("systemctl stop"));
        assert!(!runner.was_called("systemctl disable"));
    }

    #[tokio::test]
    async fn test_enable_failure_propagates() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on("systemctl is-enabled", 1, "disabled\n", "");
        runner.on("systemctl enable", 1, "", "Failed to enable unit");
        let (services, _) = manager(&root, runner);

        assert!(services.enable_postfix().await.is_err());
    }

    #[tokio::test]
    async fn test_get_postfix_status() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on_ok("systemctl is-active postfix", "active\n");
        runner.on_ok("systemctl is-enabled postfix", "enabled\n");
        runner.on("postfix check", 1, "", "postfix: fatal: bad main.cf");
        let (services, _) = manager(&root, runner);

        let status = services.get_postfix_status().await;
        assert_eq!(
            status,
            PostfixStatus {
                active: true,
                enabled: true,
                config_valid: false
            }
        );
    }

    #[tokio::test]
    async fn test_basic_config_keeps_first_backup() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        let (services, config) = manager(&root, runner.clone());
        let main_cf = config.paths.main_cf();
        std::fs::create_dir_all(main_cf.parent().unwrap()).unwrap();
        std::fs::write(&main_cf, "myhostname = distro.example\n").unwrap();

        services.setup_postfix_basic_config().await.unwrap();
        assert_eq!(std::fs::read_to_string(&main_cf).unwrap(), DEFAULT_MAIN_CF);
        assert!(runner.was_called("systemctl restart postfix"));

        services.setup_postfix_basic_config().await.unwrap();
        let backup = std::fs::read_to_string(services.original_main_cf_backup()).unwrap();
        assert_eq!(backup, "myhostname = distro.example\n");
    }

    #[tokio::test]
    async fn test_basic_config_restart_failure() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on("systemctl restart", 1, "", "Job for postfix.service failed");
        let (services, _) = manager(&root, runner);

        assert!(services.setup_postfix_basic_config().await.is_err());
    }
}
