use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{RelayError, Result};
use crate::exec::{CommandRunner, CommandSpec};

/// Supported package managers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    Apt,
    Yum,
    Dnf,
    Zypper,
    Pacman,
}

impl std::fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageManagerKind::Apt => write!(f, "apt"),
            PackageManagerKind::Yum => write!(f, "yum"),
            PackageManagerKind::Dnf => write!(f, "dnf"),
            PackageManagerKind::Zypper => write!(f, "zypper"),
            PackageManagerKind::Pacman => write!(f, "pacman"),
        }
    }
}

impl std::str::FromStr for PackageManagerKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "apt" | "apt-get" => Ok(PackageManagerKind::Apt),
            "yum" => Ok(PackageManagerKind::Yum),
            "dnf" => Ok(PackageManagerKind::Dnf),
            "zypper" => Ok(PackageManagerKind::Zypper),
            "pacman" => Ok(PackageManagerKind::Pacman),
            other => Err(RelayError::UnsupportedPackageManager(other.to_string())),
        }
    }
}

impl PackageManagerKind {
    /// Packages needed for an authenticated Postfix relay
    pub fn relay_dependencies(&self) -> &'static [&'static str] {
        match self {
            PackageManagerKind::Apt => &[
                "postfix",
                "mailutils",
                "libsasl2-modules",
                "sasl2-bin",
                "ca-certificates",
                "curl",
                "wget",
            ],
            PackageManagerKind::Yum | PackageManagerKind::Dnf => &[
                "postfix",
                "mailx",
                "cyrus-sasl",
                "cyrus-sasl-plain",
                "cyrus-sasl-md5",
                "ca-certificates",
                "curl",
                "wget",
            ],
            PackageManagerKind::Zypper => &[
                "postfix",
                "mailx",
                "cyrus-sasl",
                "cyrus-sasl-plain",
                "ca-certificates",
                "curl",
                "wget",
            ],
            PackageManagerKind::Pacman => &[
                "postfix",
                "s-nail",
                "cyrus-sasl",
                "ca-certificates",
                "curl",
                "wget",
            ],
        }
    }

    fn base(&self) -> CommandSpec {
        match self {
            PackageManagerKind::Apt => {
                CommandSpec::root("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
            }
            PackageManagerKind::Yum => CommandSpec::root("yum"),
            PackageManagerKind::Dnf => CommandSpec::root("dnf"),
            PackageManagerKind::Zypper => CommandSpec::root("zypper").arg("--non-interactive"),
            PackageManagerKind::Pacman => CommandSpec::root("pacman"),
        }
    }

    /// Non-interactive install
    pub fn install_command(&self, packages: &[&str]) -> CommandSpec {
        let spec = match self {
            PackageManagerKind::Apt | PackageManagerKind::Yum | PackageManagerKind::Dnf => {
                self.base().args(["install", "-y"])
            }
            PackageManagerKind::Zypper => self.base().arg("install"),
            PackageManagerKind::Pacman => self.base().args(["-S", "--noconfirm"]),
        };
        spec.args(packages.iter().copied())
    }

    pub fn remove_command(&self, packages: &[&str]) -> CommandSpec {
        let spec = match self {
            PackageManagerKind::Apt | PackageManagerKind::Yum | PackageManagerKind::Dnf => {
                self.base().args(["remove", "-y"])
            }
            PackageManagerKind::Zypper => self.base().arg("remove"),
            PackageManagerKind::Pacman => self.base().args(["-R", "--noconfirm"]),
        };
        spec.args(packages.iter().copied())
    }

    /// Refresh the package index
    pub fn update_command(&self) -> CommandSpec {
        match self {
            PackageManagerKind::Apt => self.base().arg("update"),
            PackageManagerKind::Yum | PackageManagerKind::Dnf => self.base().arg("check-update"),
            PackageManagerKind::Zypper => self.base().arg("refresh"),
            PackageManagerKind::Pacman => self.base().args(["-Sy", "--noconfirm"]),
        }
    }

    /// Unprivileged "is it installed" query
    pub fn query_command(&self, package: &str) -> CommandSpec {
        match self {
            PackageManagerKind::Apt => CommandSpec::new("dpkg").args(["-s", package]),
            PackageManagerKind::Yum | PackageManagerKind::Dnf | PackageManagerKind::Zypper => {
                CommandSpec::new("rpm").args(["-q", package])
            }
            PackageManagerKind::Pacman => CommandSpec::new("pacman").args(["-Q", package]),
        }
    }
}

/// Installs and removes packages with the detected package manager
pub struct PackageManager {
    runner: Arc<dyn CommandRunner>,
    kind: Option<PackageManagerKind>,
}

impl PackageManager {
    pub fn new(runner: Arc<dyn CommandRunner>, kind: Option<PackageManagerKind>) -> Self {
        PackageManager { runner, kind }
    }

    pub fn kind(&self) -> Option<PackageManagerKind> {
        self.kind
    }

    fn require_kind(&self) -> Result<PackageManagerKind> {
        self.kind.ok_or_else(|| {
            error!("No supported package manager found!");
            RelayError::UnsupportedPackageManager("none detected".to_string())
        })
    }

    /// Refresh the package cache
    pub async fn update_package_cache(&self) -> Result<()> {
        let kind = self.require_kind()?;
        let output = self.runner.run(&kind.update_command()).await?;

        // check-update exits 100 when updates are pending
        let refreshed = output.success()
            || (matches!(kind, PackageManagerKind::Yum | PackageManagerKind::Dnf)
                && output.code == Some(100));

        if refreshed {
            Ok(())
        } else {
            Err(RelayError::CommandFailed {
                command: kind.update_command().display(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Install packages; a failed cache refresh is logged and ignored
    pub async fn install_packages(&self, packages: &[&str], update_cache: bool) -> Result<()> {
        let kind = self.require_kind()?;

        if update_cache {
            if let Err(e) = self.update_package_cache().await {
                warn!("Failed to update package cache, continuing... ({})", e);
            }
        }

        info!("Installing packages with {}: {:?}", kind, packages);
        self.runner.run_checked(&kind.install_command(packages)).await?;
        Ok(())
    }

    pub async fn remove_packages(&self, packages: &[&str]) -> Result<()> {
        let kind = self.require_kind()?;
        info!("Removing packages with {}: {:?}", kind, packages);
        self.runner.run_checked(&kind.remove_command(packages)).await?;
        Ok(())
    }

    pub async fn check_package_installed(&self, package: &str) -> bool {
        let Some(kind) = self.kind else {
            return false;
        };
        self.runner
            .run(&kind.query_command(package))
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }

    /// Install the fixed dependency list for the detected manager
    pub async fn install_smtp_relay_dependencies(&self) -> Result<()> {
        let kind = self.require_kind()?;
        let packages = kind.relay_dependencies();
        info!("Installing SMTP relay dependencies: {:?}", packages);
        self.install_packages(packages, true).await
    }
}
