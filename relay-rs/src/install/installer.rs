//! Installation workflow
//!
//! Six steps run in order, each gated on the previous one:
//!
//! 1. system check (sudo required, distro and network only warned about)
//! 2. dependency installation
//! 3. basic Postfix configuration, after a `before_postfix_setup` backup
//! 4. relay configuration
//! 5. enable and start the service
//! 6. verification (reported, never fatal)
//!
//! Every mutating step records a [`Compensation`]. When a later step fails
//! the recorded compensations run newest first, so the host ends up close
//! to where it started. Installed packages are left in place.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::admin::BackupManager;
use crate::config::PathsConfig;
use crate::error::{RelayError, Result};
use crate::exec::{CommandRunner, SystemFiles};
use crate::postfix::{PostfixConfigurator, RelayConfig};
use crate::store::RelayStore;
use crate::system::{PackageManager, ServiceManager, SystemDetector, SystemProfile};

/// Name of the backup taken before main.cf is first rewritten
pub const PRE_SETUP_BACKUP: &str = "before_postfix_setup";

/// Distributions the relay setup is tested on; others get a warning
const SUPPORTED_DISTROS: [&str; 7] = [
    "ubuntu",
    "debian",
    "centos",
    "rhel",
    "fedora",
    "rocky",
    "almalinux",
];

/// Progress of the current (or last) installation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallationSteps {
    pub system_check: bool,
    pub dependencies_installed: bool,
    pub postfix_configured: bool,
    pub service_configured: bool,
    pub verification_completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStep {
    SystemCheck,
    Dependencies,
    BasicConfig,
    RelayConfig,
    Services,
    Verification,
}

impl std::fmt::Display for InstallStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            InstallStep::SystemCheck => "system check",
            InstallStep::Dependencies => "dependency installation",
            InstallStep::BasicConfig => "basic Postfix configuration",
            InstallStep::RelayConfig => "SMTP relay configuration",
            InstallStep::Services => "service setup",
            InstallStep::Verification => "verification",
        };
        f.write_str(label)
    }
}

/// Undo action for a completed mutating step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "backup", rename_all = "snake_case")]
pub enum Compensation {
    RestoreBackup(String),
    RemoveRelayCredentials,
    StopService,
    DisableService,
}

/// Result of the verification step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub postfix_running: bool,
    pub postfix_enabled: bool,
    pub config_valid: bool,
    /// sasl_passwd exists; its content is not checked
    pub sasl_configured: bool,
    pub all_checks_passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<InstallStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Compensations that ran, in execution order
    pub compensations: Vec<Compensation>,
    pub steps: InstallationSteps,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UninstallReport {
    pub restored_backup: Option<String>,
    pub removed_files: Vec<PathBuf>,
    /// Best-effort steps that failed
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallationStatus {
    pub steps: InstallationSteps,
    pub system_info: SystemProfile,
    pub verification_results: VerificationReport,
}

/// Coordinates detector, packages, services, configurator and backups
pub struct Installer {
    runner: Arc<dyn CommandRunner>,
    files: SystemFiles,
    paths: PathsConfig,
    detector: Arc<SystemDetector>,
    services: Arc<ServiceManager>,
    configurator: Arc<PostfixConfigurator>,
    backups: Arc<BackupManager>,
    relay_store: Arc<RelayStore>,
    steps: Mutex<InstallationSteps>,
    /// Held for a whole install or uninstall run
    run_lock: Mutex<()>,
}

impl Installer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        files: SystemFiles,
        paths: PathsConfig,
        detector: Arc<SystemDetector>,
        services: Arc<ServiceManager>,
        configurator: Arc<PostfixConfigurator>,
        backups: Arc<BackupManager>,
        relay_store: Arc<RelayStore>,
    ) -> Self {
        Installer {
            runner: files.runner().clone(),
            files,
            paths,
            detector,
            services,
            configurator,
            backups,
            relay_store,
            steps: Mutex::new(InstallationSteps::default()),
            run_lock: Mutex::new(()),
        }
    }

    pub async fn steps(&self) -> InstallationSteps {
        self.steps.lock().await.clone()
    }

    async fn mark(&self, update: impl FnOnce(&mut InstallationSteps)) {
        update(&mut *self.steps.lock().await);
    }

    /// Step 1. Read-only: fails with `PermissionDenied` without sudo.
    pub async fn run_system_check(&self) -> Result<SystemProfile> {
        info!("Running system checks...");
        let profile = self.detector.get_system_info().await;

        if !SUPPORTED_DISTROS.contains(&profile.os.distro.as_str()) {
            warn!("System {} may not be fully supported", profile.os.distro);
        }

        if !profile.has_sudo {
            error!("This installation requires sudo privileges");
            return Err(RelayError::PermissionDenied(
                "This installation requires sudo privileges".to_string(),
            ));
        }

        if !profile.network_connected {
            warn!("No network connectivity detected. Installation may fail without internet access.");
        }

        if profile.postfix_status.installed {
            info!("Postfix is already installed");
        } else {
            info!("Postfix is not installed, will install during setup");
        }

        self.mark(|s| s.system_check = true).await;
        Ok(profile)
    }

    /// Step 2
    pub async fn install_dependencies(&self) -> Result<()> {
        info!("Installing dependencies...");
        let kind = self.detector.detect_package_manager().await;
        PackageManager::new(self.runner.clone(), kind)
            .install_smtp_relay_dependencies()
            .await?;

        self.mark(|s| s.dependencies_installed = true).await;
        info!("Dependencies installed successfully");
        Ok(())
    }

    /// Step 3
    async fn setup_postfix_basic_config(&self, undo: &mut Vec<Compensation>) -> Result<()> {
        info!("Setting up basic Postfix configuration...");

        self.backups.create_backup(Some(PRE_SETUP_BACKUP)).await?;
        undo.push(Compensation::RestoreBackup(PRE_SETUP_BACKUP.to_string()));

        self.services.setup_postfix_basic_config().await?;

        self.mark(|s| s.postfix_configured = true).await;
        info!("Postfix basic configuration completed");
        Ok(())
    }

    /// Step 4. A partially written SASL map is removed on rollback too.
    async fn configure_smtp_relay(
        &self,
        relay: &RelayConfig,
        undo: &mut Vec<Compensation>,
    ) -> Result<()> {
        info!(
            "Configuring SMTP relay for {}:{}",
            relay.relay_host, relay.relay_port
        );

        undo.push(Compensation::RemoveRelayCredentials);
        self.configurator.configure_relay(relay).await?;

        if let Err(e) = self.relay_store.save(relay).await {
            warn!("Relay configured but not recorded: {}", e);
        }

        self.mark(|s| s.service_configured = true).await;
        info!("SMTP relay configured successfully");
        Ok(())
    }

    /// Step 5. Only state changed here is undone on rollback.
    async fn start_and_enable_services(&self, undo: &mut Vec<Compensation>) -> Result<()> {
        info!("Starting and enabling services...");
        let name = self.services.service_name().to_string();

        if !self.services.is_service_enabled(&name).await {
            self.services.enable_postfix().await?;
            undo.push(Compensation::DisableService);
        }

        if !self.services.is_service_active(&name).await {
            self.services.start_postfix().await?;
            undo.push(Compensation::StopService);
        }

        let status = self.services.get_postfix_status().await;
        if !(status.active && status.enabled) {
            error!("Postfix service is not running or enabled properly");
            return Err(RelayError::ServiceDown(
                "Postfix service is not running or enabled properly".to_string(),
            ));
        }

        self.mark(|s| s.verification_completed = true).await;
        info!("Services started and enabled successfully");
        Ok(())
    }

    /// Step 6
    pub async fn verify_installation(&self) -> VerificationReport {
        info!("Verifying installation...");
        let name = self.services.service_name();

        let mut report = VerificationReport {
            postfix_running: self.services.is_service_active(name).await,
            postfix_enabled: self.services.is_service_enabled(name).await,
            config_valid: self.configurator.check_config_validity().await,
            sasl_configured: self.configurator.sasl_configured().await,
            all_checks_passed: false,
        };
        report.all_checks_passed = report.postfix_running
            && report.postfix_enabled
            && report.config_valid
            && report.sasl_configured;

        report
    }

    async fn compensate(&self, action: &Compensation) -> Result<()> {
        match action {
            Compensation::RestoreBackup(name) => {
                self.backups.restore_backup(name).await?;
            }
            Compensation::RemoveRelayCredentials => {
                self.configurator.remove_sasl_files().await?;
                self.relay_store.clear().await?;
            }
            Compensation::StopService => self.services.stop_postfix().await?,
            Compensation::DisableService => self.services.disable_postfix().await?,
        }
        Ok(())
    }

    /// Run recorded compensations newest first; failures are logged only
    async fn unwind(&self, mut undo: Vec<Compensation>) -> Vec<Compensation> {
        let mut ran = Vec::with_capacity(undo.len());
        while let Some(action) = undo.pop() {
            info!("Rolling back: {:?}", action);
            if let Err(e) = self.compensate(&action).await {
                warn!("Rollback action {:?} failed: {}", action, e);
            }
            ran.push(action);
        }
        ran
    }

    async fn run_steps(
        &self,
        relay: &RelayConfig,
        undo: &mut Vec<Compensation>,
    ) -> std::result::Result<(), (InstallStep, RelayError)> {
        self.run_system_check()
            .await
            .map_err(|e| (InstallStep::SystemCheck, e))?;
        self.install_dependencies()
            .await
            .map_err(|e| (InstallStep::Dependencies, e))?;
        self.setup_postfix_basic_config(undo)
            .await
            .map_err(|e| (InstallStep::BasicConfig, e))?;
        self.configure_smtp_relay(relay, undo)
            .await
            .map_err(|e| (InstallStep::RelayConfig, e))?;
        self.start_and_enable_services(undo)
            .await
            .map_err(|e| (InstallStep::Services, e))?;
        Ok(())
    }

    /// Run the complete installation.
    ///
    /// Invalid relay settings are rejected before anything runs. A failing
    /// step is reported in the outcome, after rollback, not as an `Err`.
    pub async fn run_installation(&self, relay: &RelayConfig) -> Result<InstallOutcome> {
        relay.validate()?;

        let _running = self.run_lock.lock().await;
        *self.steps.lock().await = InstallationSteps::default();
        info!("Starting SMTP relay installation...");

        let mut undo = Vec::new();
        if let Err((step, e)) = self.run_steps(relay, &mut undo).await {
            error!("{} failed, aborting installation: {}", step, e);
            let compensations = self.unwind(undo).await;
            return Ok(InstallOutcome {
                success: false,
                failed_step: Some(step),
                error: Some(e.to_string()),
                compensations,
                steps: self.steps().await,
                verification: None,
            });
        }

        let verification = self.verify_installation().await;
        if !verification.all_checks_passed {
            warn!("Some verification checks failed, but installation may still work");
        }

        info!("Installation completed successfully!");
        Ok(InstallOutcome {
            success: true,
            failed_step: None,
            error: None,
            compensations: Vec::new(),
            steps: self.steps().await,
            verification: Some(verification),
        })
    }

    /// Stop Postfix, put back the newest backup, remove relay files and reset
    /// main.cf. Every step is attempted; failures become warnings.
    pub async fn run_uninstallation(&self) -> Result<UninstallReport> {
        let _running = self.run_lock.lock().await;
        info!("Starting uninstallation...");
        let mut report = UninstallReport::default();

        if let Err(e) = self.services.stop_postfix().await {
            report.warnings.push(format!("Could not stop Postfix: {}", e));
        }
        if let Err(e) = self.services.disable_postfix().await {
            report.warnings.push(format!("Could not disable Postfix: {}", e));
        }

        match self.backups.latest_backup().await {
            Ok(Some(latest)) => {
                info!("Restoring from backup: {}", latest.name);
                match self.backups.restore_backup(&latest.name).await {
                    Ok(_) => {
                        info!("System configuration restored from backup");
                        report.restored_backup = Some(latest.name);
                    }
                    Err(e) => report
                        .warnings
                        .push(format!("Could not restore from backup {}: {}", latest.name, e)),
                }
            }
            Ok(None) => info!("No backups found to restore from"),
            Err(e) => report.warnings.push(format!("Could not list backups: {}", e)),
        }

        for path in self.paths.residual_files() {
            if !self.files.exists(&path).await {
                continue;
            }
            match self.files.remove(&path).await {
                Ok(()) => report.removed_files.push(path),
                Err(e) => report
                    .warnings
                    .push(format!("Could not remove {}: {}", path.display(), e)),
            }
        }

        if let Err(e) = self.configurator.reset_to_defaults().await {
            report.warnings.push(format!("Could not reset main.cf: {}", e));
        }
        if let Err(e) = self.relay_store.clear().await {
            report.warnings.push(format!("Could not clear relay store: {}", e));
        }
        if let Err(e) = self.services.restart_postfix().await {
            report.warnings.push(format!("Could not restart Postfix: {}", e));
        }

        for warning in &report.warnings {
            warn!("{}", warning);
        }

        *self.steps.lock().await = InstallationSteps::default();
        info!("Uninstallation completed");
        Ok(report)
    }

    pub async fn get_installation_status(&self) -> InstallationStatus {
        InstallationStatus {
            steps: self.steps().await,
            system_info: self.detector.get_system_info().await,
            verification_results: self.verify_installation().await,
        }
    }
}
