//! Configuration for relay-rs
//!
//! Every absolute path the tool touches lives here so components never
//! hard-code `/etc/postfix`. Values are layered: built-in defaults, then an
//! optional TOML file, then `RELAY__SECTION__KEY` environment variables, and
//! finally `API_PORT`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RelayError, Result};

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub system: SystemConfig,
    pub backup: BackupSettings,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

/// Files and directories managed by the tool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Postfix configuration directory (main.cf, sasl_passwd, ...)
    pub postfix_dir: PathBuf,
    pub aliases: PathBuf,
    pub mailname: PathBuf,
    /// Sender list (JSON array)
    pub sender_store: PathBuf,
    /// Relay credentials store (`{"relay_hosts": [...]}`)
    pub relay_store: PathBuf,
    /// AES-256-GCM key used to seal stored relay passwords
    pub secret_key: PathBuf,
    /// Candidate mail logs, first existing one wins
    pub mail_logs: Vec<PathBuf>,
}

/// Host interaction settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    /// Prefix privileged commands with sudo. Disable when running as root.
    pub use_sudo: bool,
    pub command_timeout_secs: u64,
    pub service_name: String,
    /// Root of the os-release and *-release files
    pub etc_dir: PathBuf,
    /// Host pinged for the connectivity check
    pub connectivity_host: String,
}

/// Backup settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackupSettings {
    pub backup_dir: PathBuf,
    /// Backups kept by `cleanup_old_backups` when no count is given
    pub keep_count: usize,
}

/// HTTP API settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    pub listen_addr: String,
    pub port: u16,
    /// Range scanned when `port` is already taken
    pub fallback_port_start: u16,
    pub fallback_port_end: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

impl PathsConfig {
    pub fn main_cf(&self) -> PathBuf {
        self.postfix_dir.join("main.cf")
    }

    pub fn master_cf(&self) -> PathBuf {
        self.postfix_dir.join("master.cf")
    }

    pub fn sasl_passwd(&self) -> PathBuf {
        self.postfix_dir.join("sasl_passwd")
    }

    pub fn sasl_passwd_db(&self) -> PathBuf {
        self.postfix_dir.join("sasl_passwd.db")
    }

    pub fn canonical(&self) -> PathBuf {
        self.postfix_dir.join("canonical")
    }

    pub fn generic(&self) -> PathBuf {
        self.postfix_dir.join("generic")
    }

    pub fn header_checks(&self) -> PathBuf {
        self.postfix_dir.join("header_checks")
    }

    /// Files snapshotted by every backup
    pub fn tracked_files(&self) -> Vec<PathBuf> {
        vec![
            self.main_cf(),
            self.master_cf(),
            self.sasl_passwd(),
            self.sasl_passwd_db(),
            self.canonical(),
            self.generic(),
            self.aliases.clone(),
            self.mailname.clone(),
        ]
    }

    /// Files removed by uninstallation
    pub fn residual_files(&self) -> Vec<PathBuf> {
        vec![
            self.sasl_passwd(),
            self.sasl_passwd_db(),
            self.canonical(),
            self.generic(),
            self.header_checks(),
        ]
    }
}

impl SystemConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RelayError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Ok(toml::from_str(&content)?)
    }

    /// Layer defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let mut config: Config = builder
            .add_source(::config::Environment::with_prefix("RELAY").separator("__"))
            .build()?
            .try_deserialize()?;

        if let Ok(port) = std::env::var("API_PORT") {
            config.api.port = port
                .parse()
                .map_err(|_| RelayError::Config(format!("Invalid API_PORT: {}", port)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Re-root every managed path under `root` and run without sudo.
    ///
    /// Used for sandboxes and tests; `root/etc/postfix/main.cf` stands in
    /// for `/etc/postfix/main.cf`.
    pub fn rooted_at(root: &Path) -> Self {
        let mut config = Config::default();
        config.paths = PathsConfig {
            postfix_dir: root.join("etc/postfix"),
            aliases: root.join("etc/aliases"),
            mailname: root.join("etc/mailname"),
            sender_store: root.join("var/lib/relay-rs/sender.json"),
            relay_store: root.join("var/lib/relay-rs/sasl_config.json"),
            secret_key: root.join("var/lib/relay-rs/secret.key"),
            mail_logs: vec![root.join("var/log/mail.log"), root.join("var/log/maillog")],
        };
        config.system.use_sudo = false;
        config.system.etc_dir = root.join("etc");
        config.backup.backup_dir = root.join("var/backups/relay-rs");
        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.system.service_name.trim().is_empty() {
            return Err(RelayError::Config("system.service_name is empty".to_string()));
        }
        if self.system.command_timeout_secs == 0 {
            return Err(RelayError::Config(
                "system.command_timeout_secs must be positive".to_string(),
            ));
        }
        if self.api.fallback_port_start > self.api.fallback_port_end {
            return Err(RelayError::Config(format!(
                "Invalid fallback port range {}-{}",
                self.api.fallback_port_start, self.api.fallback_port_end
            )));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(RelayError::Config(format!(
                "Unknown logging format: {}",
                self.logging.format
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                postfix_dir: PathBuf::from("/etc/postfix"),
                aliases: PathBuf::from("/etc/aliases"),
                mailname: PathBuf::from("/etc/mailname"),
                sender_store: PathBuf::from("/var/lib/relay-rs/sender.json"),
                relay_store: PathBuf::from("/var/lib/relay-rs/sasl_config.json"),
                secret_key: PathBuf::from("/var/lib/relay-rs/secret.key"),
                mail_logs: vec![
                    PathBuf::from("/var/log/mail.log"),
                    PathBuf::from("/var/log/maillog"),
                ],
            },
            system: SystemConfig {
                use_sudo: true,
                command_timeout_secs: 15,
                service_name: "postfix".to_string(),
                etc_dir: PathBuf::from("/etc"),
                connectivity_host: "8.8.8.8".to_string(),
            },
            backup: BackupSettings {
                backup_dir: PathBuf::from("/var/backups/relay-rs"),
                keep_count: 5,
            },
            api: ApiConfig {
                listen_addr: "0.0.0.0".to_string(),
                port: 5001,
                fallback_port_start: 8001,
                fallback_port_end: 8999,
            },
            logging: LoggingConfig {
                level: "relay_rs=info,tower_http=info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
