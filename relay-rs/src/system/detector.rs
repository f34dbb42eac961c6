use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

use super::packages::PackageManagerKind;
use crate::config::SystemConfig;
use crate::exec::{CommandRunner, CommandSpec};

/// Distribution family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Debian,
    Redhat,
    Arch,
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsFamily::Debian => write!(f, "debian"),
            OsFamily::Redhat => write!(f, "redhat"),
            OsFamily::Arch => write!(f, "arch"),
        }
    }
}

/// Map a distribution id to its family. Unknown ids count as debian.
pub fn family_for(distro: &str) -> OsFamily {
    match distro {
        "centos" | "rhel" | "fedora" | "rocky" | "almalinux" | "amazon" | "redhat" => {
            OsFamily::Redhat
        }
        "arch" | "manjaro" => OsFamily::Arch,
        _ => OsFamily::Debian,
    }
}

/// Operating system identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsInfo {
    pub platform: String,
    pub distro: String,
    pub version: String,
    /// Pretty name from os-release, when present
    pub name: Option<String>,
    pub family: OsFamily,
}

/// State of a systemd unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub installed: bool,
    pub running: bool,
    pub enabled: bool,
}

impl ServiceStatus {
    fn absent(name: &str) -> Self {
        ServiceStatus {
            name: name.to_string(),
            installed: false,
            running: false,
            enabled: false,
        }
    }
}

/// Snapshot of the host, recomputed on every query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemProfile {
    #[serde(flatten)]
    pub os: OsInfo,
    pub package_manager: Option<PackageManagerKind>,
    /// Privileged commands can run, as root or through sudo
    pub has_sudo: bool,
    pub network_connected: bool,
    pub postfix_status: ServiceStatus,
}

/// Fields of interest from /etc/os-release
#[derive(Debug, Default, PartialEq)]
pub struct OsRelease {
    pub id: Option<String>,
    pub version_id: Option<String>,
    pub name: Option<String>,
}

pub fn parse_os_release(content: &str) -> OsRelease {
    let mut release = OsRelease::default();

    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        match key.trim() {
            "ID" => release.id = Some(value),
            "VERSION_ID" => release.version_id = Some(value),
            "NAME" => release.name = Some(value),
            _ => {}
        }
    }

    release
}

/// Last token of a `*-release` banner when it looks like a version number
fn release_banner_version(content: &str) -> Option<String> {
    content
        .split_whitespace()
        .last()
        .filter(|token| !token.is_empty() && token.chars().all(|c| c.is_ascii_digit() || c == '.'))
        .map(str::to_string)
}

/// Package managers tried in order, with the binaries that reveal them
const PACKAGE_MANAGER_CANDIDATES: &[(PackageManagerKind, &[&str])] = &[
    (PackageManagerKind::Apt, &["apt", "apt-get"]),
    (PackageManagerKind::Yum, &["yum"]),
    (PackageManagerKind::Dnf, &["dnf"]),
    (PackageManagerKind::Zypper, &["zypper"]),
    (PackageManagerKind::Pacman, &["pacman"]),
];

/// Read-only host queries
pub struct SystemDetector {
    runner: Arc<dyn CommandRunner>,
    etc_dir: PathBuf,
    service_name: String,
    connectivity_host: String,
    use_sudo: bool,
}

impl SystemDetector {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &SystemConfig) -> Self {
        SystemDetector {
            runner,
            etc_dir: config.etc_dir.clone(),
            service_name: config.service_name.clone(),
            connectivity_host: config.connectivity_host.clone(),
            use_sudo: config.use_sudo,
        }
    }

    async fn read_etc(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.etc_dir.join(name)).await.ok()
    }

    /// Identify the distribution: os-release first, then legacy release files
    pub async fn detect_os(&self) -> OsInfo {
        let mut distro = "unknown".to_string();
        let mut version = "unknown".to_string();
        let mut name = None;

        if let Some(content) = self.read_etc("os-release").await {
            let release = parse_os_release(&content);
            if let Some(id) = release.id {
                distro = id;
            }
            if let Some(version_id) = release.version_id {
                version = version_id;
            }
            name = release.name;
        }

        if distro == "unknown" {
            if let Some(content) = self.read_etc("debian_version").await {
                distro = "debian".to_string();
                version = content.trim().to_string();
            } else {
                for file in ["redhat-release", "centos-release", "fedora-release"] {
                    if let Some(content) = self.read_etc(file).await {
                        distro = "redhat".to_string();
                        version = release_banner_version(&content)
                            .unwrap_or_else(|| "unknown".to_string());
                        break;
                    }
                }
            }
        }

        OsInfo {
            platform: std::env::consts::OS.to_string(),
            family: family_for(&distro),
            distro,
            version,
            name,
        }
    }

    async fn command_exists(&self, cmd: &str) -> bool {
        match self.runner.run(&CommandSpec::new("which").arg(cmd)).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("which {} failed: {}", cmd, e);
                false
            }
        }
    }

    pub async fn detect_package_manager(&self) -> Option<PackageManagerKind> {
        for (kind, binaries) in PACKAGE_MANAGER_CANDIDATES {
            for binary in binaries.iter() {
                if self.command_exists(binary).await {
                    return Some(*kind);
                }
            }
        }
        None
    }

    /// Installed / running / enabled, from three independent systemctl queries
    pub async fn check_service_status(&self, name: &str) -> ServiceStatus {
        let unit = format!("{}.service", name);
        let mut status = ServiceStatus::absent(name);

        match self
            .runner
            .run(&CommandSpec::new("systemctl").args([
                "list-units",
                "--type=service",
                "--all",
                unit.as_str(),
            ]))
            .await
        {
            Ok(output) => status.installed = output.stdout.contains(&unit),
            Err(e) => {
                warn!("Error checking service {}: {}", name, e);
                return status;
            }
        }

        if !status.installed {
            return status;
        }

        if let Ok(output) = self
            .runner
            .run(&CommandSpec::new("systemctl").args(["is-active", name]))
            .await
        {
            status.running = output.stdout.trim() == "active";
        }

        if let Ok(output) = self
            .runner
            .run(&CommandSpec::new("systemctl").args(["is-enabled", name]))
            .await
        {
            status.enabled = matches!(output.stdout.trim(), "enabled" | "enabled-runtime");
        }

        status
    }

    pub async fn check_postfix_status(&self) -> ServiceStatus {
        self.check_service_status(&self.service_name).await
    }

    pub async fn check_network_connectivity(&self) -> bool {
        self.runner
            .run(
                &CommandSpec::new("ping")
                    .args(["-c", "1", self.connectivity_host.as_str()])
                    .timeout(Duration::from_secs(5)),
            )
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }

    /// Whether privileged commands can run here.
    ///
    /// Root always can. Anyone else needs `use_sudo` and a working
    /// non-interactive sudo (`sudo -n whoami`).
    pub async fn check_sudo_privileges(&self) -> bool {
        let is_root = self
            .runner
            .run(&CommandSpec::new("id").arg("-u"))
            .await
            .map(|output| output.success() && output.stdout.trim() == "0")
            .unwrap_or(false);
        if is_root {
            debug!("Running as root");
            return true;
        }
        if !self.use_sudo {
            debug!("Not root and sudo is disabled");
            return false;
        }

        self.runner
            .run(&CommandSpec::new("sudo").args(["-n", "whoami"]))
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }

    /// Run every check; nothing is cached
    pub async fn get_system_info(&self) -> SystemProfile {
        let (os, package_manager, postfix_status, has_sudo, network_connected) = tokio::join!(
            self.detect_os(),
            self.detect_package_manager(),
            self.check_postfix_status(),
            self.check_sudo_privileges(),
            self.check_network_connectivity(),
        );

        SystemProfile {
            os,
            package_manager,
            has_sudo,
            network_connected,
            postfix_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exec::mock::MockRunner;
    use tempfile::TempDir;

    fn detector(root: &TempDir, runner: Arc<MockRunner>) -> SystemDetector {
        let config = Config::rooted_at(root.path());
        std::fs::create_dir_all(&config.system.etc_dir).unwrap();
        SystemDetector::new(runner, &config.system)
    }

    #[test]
    fn test_parse_os_release() {
        let release = parse_os_release(
            "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\nID=ubuntu\nID_LIKE=debian\n# comment\n",
        );
        assert_eq!(release.id.as_deref(), Some("ubuntu"));
        assert_eq!(release.version_id.as_deref(), Some("22.04"));
        assert_eq!(release.name.as_deref(), Some("Ubuntu"));
    }

    #[test]
    fn test_family_for() {
        assert_eq!(family_for("ubuntu"), OsFamily::Debian);
        assert_eq!(family_for("rocky"), OsFamily::Redhat);
        assert_eq!(family_for("manjaro"), OsFamily::Arch);
        assert_eq!(family_for("gentoo"), OsFamily::Debian);
        assert_eq!(family_for("unknown"), OsFamily::Debian);
    }

    #[test]
    fn test_release_banner_version() {
        assert_eq!(
            release_banner_version("Fedora release 39").as_deref(),
            Some("39")
        );
        assert_eq!(release_banner_version("CentOS Linux release (Core)"), None);
    }

    #[tokio::test]
    async fn test_detect_os_from_os_release() {
        let root = TempDir::new().unwrap();
        let detector = detector(&root, Arc::new(MockRunner::new()));
        std::fs::write(
            root.path().join("etc/os-release"),
            "ID=rocky\nVERSION_ID=\"9.3\"\nNAME=\"Rocky Linux\"\n",
        )
        .unwrap();

        let os = detector.detect_os().await;
        assert_eq!(os.distro, "rocky");
        assert_eq!(os.version, "9.3");
        assert_eq!(os.family, OsFamily::Redhat);
    }

    #[tokio::test]
    async fn test_detect_os_fallbacks() {
        let root = TempDir::new().unwrap();
        let detector = detector(&root, Arc::new(MockRunner::new()));

        let os = detector.detect_os().await;
        assert_eq!(os.distro, "unknown");
        assert_eq!(os.family, OsFamily::Debian);

        std::fs::write(root.path().join("etc/redhat-release"), "Fedora release 39\n").unwrap();
        let os = detector.detect_os().await;
        assert_eq!(os.distro, "redhat");
        assert_eq!(os.version, "39");
        assert_eq!(os.family, OsFamily::Redhat);

        std::fs::write(root.path().join("etc/debian_version"), "12.4\n").unwrap();
        let os = detector.detect_os().await;
        assert_eq!(os.distro, "debian");
        assert_eq!(os.version, "12.4");
    }

    #[tokio::test]
    async fn test_detect_package_manager_order() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on("which", 1, "", "");
        runner.on_ok("which dnf", "/usr/bin/dnf\n");
        runner.on_ok("which zypper", "/usr/bin/zypper\n");
        let detector = detector(&root, runner.clone());

        assert_eq!(
            detector.detect_package_manager().await,
            Some(PackageManagerKind::Dnf)
        );
        // apt, apt-get, yum, dnf
        assert_eq!(runner.count("which"), 4);
    }

    #[tokio::test]
    async fn test_no_package_manager() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on_missing("which");
        let detector = detector(&root, runner);

        assert_eq!(detector.detect_package_manager().await, None);
    }

    #[tokio::test]
    async fn test_service_status() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on_ok(
            "systemctl list-units",
            "  postfix.service loaded active exited Postfix Mail Transport Agent\n",
        );
        runner.on("systemctl is-active postfix", 0, "active\n", "");
        runner.on("systemctl is-enabled postfix", 1, "disabled\n", "");
        let detector = detector(&root, runner);

        let status = detector.check_postfix_status().await;
        assert!(status.installed);
        assert!(status.running);
        assert!(!status.enabled);
    }

    #[tokio::test]
    async fn test_service_not_installed_skips_unit_queries() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on_ok("systemctl list-units", "0 loaded units listed.\n");
        let detector = detector(&root, runner.clone());

        let status = detector.check_postfix_status().await;
        assert!(!status.installed);
        assert!(!runner.was_called("systemctl is-active"));
    }

    #[tokio::test]
    async fn test_failed_checks_default_to_negative() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on_missing("sudo");
        runner.on_timeout("ping");
        runner.on_missing("systemctl");
        runner.on("which", 1, "", "");
        let detector = detector(&root, runner);

        let profile = detector.get_system_info().await;
        assert!(!profile.has_sudo);
        assert!(!profile.network_connected);
        assert!(!profile.postfix_status.installed);
        assert_eq!(profile.package_manager, None);
        assert_eq!(profile.os.family, OsFamily::Debian);
    }

    #[tokio::test]
    async fn test_profile_serializes_flat() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on_ok("id -u", "0\n");
        let detector = detector(&root, runner);
        let profile = detector.get_system_info().await;

        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["family"], "debian");
        assert!(json.get("distro").is_some());
        assert_eq!(json["package_manager"], "apt");
        assert_eq!(json["has_sudo"], true);
    }

    #[tokio::test]
    async fn test_root_is_privileged_without_sudo() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on_ok("id -u", "0\n");
        runner.on_missing("sudo");
        let detector = detector(&root, runner.clone());

        assert!(detector.check_sudo_privileges().await);
        assert!(!runner.was_called("sudo"));
    }

    #[tokio::test]
    async fn test_non_root_without_sudo_enabled_is_unprivileged() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on_ok("id -u", "1000\n");
        let detector = detector(&root, runner.clone());

        assert!(!detector.check_sudo_privileges().await);
        assert!(!runner.was_called("sudo"));
    }

    #[tokio::test]
    async fn test_non_root_asks_sudo_when_enabled() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on_ok("id -u", "1000\n");
        let mut config = Config::rooted_at(root.path());
        config.system.use_sudo = true;
        let detector = SystemDetector::new(runner.clone(), &config.system);

        assert!(detector.check_sudo_privileges().await);
        assert_eq!(runner.count("sudo -n whoami"), 1);

        runner.on("sudo -n whoami", 1, "", "sudo: a password is required");
        assert!(!detector.check_sudo_privileges().await);
    }
}
