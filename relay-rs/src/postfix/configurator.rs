use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{error, info, warn};

use super::main_cf::{self, DEFAULT_MAIN_CF, RELAY_KEYS};
use super::provider::Provider;
use crate::config::PathsConfig;
use crate::error::{RelayError, Result};
use crate::exec::{CommandRunner, CommandSpec, SystemFiles};
use crate::utils::{validate_email, validate_hostname, validate_map_token, validate_password};

/// Upstream relay and the credentials used to authenticate to it
#[derive(Clone, Deserialize)]
pub struct RelayConfig {
    pub relay_host: String,
    pub relay_port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub provider: Provider,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("relay_host", &self.relay_host)
            .field("relay_port", &self.relay_port)
            .field("username", &self.username)
            .field("password", &"********")
            .field("provider", &self.provider)
            .finish()
    }
}

impl RelayConfig {
    /// Preset host and port for a known provider
    pub fn for_provider(provider: Provider, username: &str, password: &str) -> Self {
        let preset = provider.preset();
        RelayConfig {
            relay_host: preset.relay_host.to_string(),
            relay_port: preset.relay_port,
            username: username.to_string(),
            password: password.to_string(),
            provider,
        }
    }

    /// `[host]:port`, the form used by both relayhost and the SASL map
    pub fn relayhost(&self) -> String {
        format!("[{}]:{}", self.relay_host, self.relay_port)
    }

    /// The single sasl_passwd entry
    pub fn sasl_entry(&self) -> String {
        format!("{} {}:{}", self.relayhost(), self.username, self.password)
    }

    /// Reject values that would corrupt main.cf or the SASL map
    pub fn validate(&self) -> Result<()> {
        validate_hostname(&self.relay_host)?;
        if self.relay_port == 0 {
            return Err(RelayError::Validation(
                "Port must be between 1 and 65535".to_string(),
            ));
        }
        validate_map_token("Username", &self.username)?;
        if self.provider.username_is_email() {
            validate_email(&self.username)?;
        }
        validate_password(&self.password)
    }
}

/// How Postfix picked up a new configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayOutcome {
    /// `postfix reload` succeeded
    Reloaded,
    /// Reload failed, a full service restart succeeded
    Restarted,
}

/// Writes relay settings into Postfix
pub struct PostfixConfigurator {
    runner: Arc<dyn CommandRunner>,
    files: SystemFiles,
    paths: PathsConfig,
    service_name: String,
}

impl PostfixConfigurator {
    pub fn new(files: SystemFiles, paths: PathsConfig, service_name: impl Into<String>) -> Self {
        PostfixConfigurator {
            runner: files.runner().clone(),
            files,
            paths,
            service_name: service_name.into(),
        }
    }

    /// Copy of main.cf taken before each rewrite
    pub fn previous_main_cf(&self) -> PathBuf {
        let mut name = self.paths.main_cf().into_os_string();
        name.push(".bak");
        PathBuf::from(name)
    }

    fn sasl_map(&self) -> String {
        format!("hash:{}", self.paths.sasl_passwd().display())
    }

    async fn read_main_cf(&self) -> Result<String> {
        match fs::read_to_string(self.paths.main_cf()).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn backup_main_cf(&self) -> Result<()> {
        let main_cf = self.paths.main_cf();
        if self.files.exists(&main_cf).await {
            self.files.copy(&main_cf, &self.previous_main_cf()).await?;
            info!(
                "Backed up {} to {}",
                main_cf.display(),
                self.previous_main_cf().display()
            );
        }
        Ok(())
    }

    async fn write_sasl_passwd(&self, relay: &RelayConfig) -> Result<()> {
        let sasl_passwd = self.paths.sasl_passwd();
        let entry = format!("{}\n", relay.sasl_entry());
        self.files.write(&sasl_passwd, entry.as_bytes(), 0o600).await?;

        self.runner
            .run_checked(&CommandSpec::root("postmap").arg(sasl_passwd.to_string_lossy()))
            .await?;

        let db = self.paths.sasl_passwd_db();
        if self.files.exists(&db).await {
            self.files.chmod(&db, 0o600).await?;
        }

        info!("SASL authentication configured");
        Ok(())
    }

    /// Delete sasl_passwd and its hashed map
    pub async fn remove_sasl_files(&self) -> Result<()> {
        self.files.remove(&self.paths.sasl_passwd()).await?;
        self.files.remove(&self.paths.sasl_passwd_db()).await?;
        Ok(())
    }

    /// Reload Postfix, falling back to a service restart
    pub async fn reload(&self) -> Result<RelayOutcome> {
        let reload = self
            .runner
            .run(&CommandSpec::root("postfix").arg("reload"))
            .await;

        match reload {
            Ok(output) if output.success() => {
                info!("Postfix reloaded successfully");
                return Ok(RelayOutcome::Reloaded);
            }
            Ok(output) => error!("Postfix reload failed: {}", output.stderr.trim()),
            Err(e) => error!("Postfix reload failed: {}", e),
        }

        self.runner
            .run_checked(&CommandSpec::root("systemctl").args(["restart", self.service_name.as_str()]))
            .await?;
        warn!("Postfix restarted after failed reload");
        Ok(RelayOutcome::Restarted)
    }

    /// Point Postfix at an authenticated relay.
    ///
    /// Backs up main.cf, writes and hashes the SASL map, replaces every
    /// relay key in main.cf with one fresh line, then reloads.
    pub async fn configure_relay(&self, relay: &RelayConfig) -> Result<RelayOutcome> {
        relay.validate()?;
        info!(
            "Configuring Postfix relay for {}:{} ({})",
            relay.relay_host, relay.relay_port, relay.provider
        );

        self.backup_main_cf().await?;
        self.write_sasl_passwd(relay).await?;

        let current = self.read_main_cf().await?;
        let settings = relay
            .provider
            .relay_settings(&relay.relayhost(), &self.sasl_map());
        let updated = main_cf::apply_settings(&current, &settings);
        self.files
            .write(&self.paths.main_cf(), updated.as_bytes(), 0o644)
            .await?;
        info!("Main configuration updated");

        self.reload().await
    }

    /// Configure a preset provider; `custom` needs an explicit host
    pub async fn configure_for_provider(
        &self,
        provider: Provider,
        username: &str,
        password: &str,
        custom: Option<(String, u16)>,
    ) -> Result<RelayOutcome> {
        info!("Configuring Postfix for provider: {}", provider);

        let mut relay = RelayConfig::for_provider(provider, username, password);
        if provider == Provider::Custom {
            let (host, port) = custom.ok_or_else(|| {
                RelayError::Validation("Custom provider requires relay_host and relay_port".to_string())
            })?;
            relay.relay_host = host;
            relay.relay_port = port;
        }

        self.configure_relay(&relay).await
    }

    /// Replace main.cf with the minimal template and drop the SASL map
    pub async fn reset_to_defaults(&self) -> Result<RelayOutcome> {
        info!("Resetting Postfix to default configuration");

        self.backup_main_cf().await?;
        self.files
            .write(&self.paths.main_cf(), DEFAULT_MAIN_CF.as_bytes(), 0o644)
            .await?;
        self.remove_sasl_files().await?;

        self.reload().await
    }

    /// Remove relay credentials and relay keys, keep the rest of main.cf
    pub async fn clear_relay(&self) -> Result<()> {
        info!("Clearing relay configuration");

        self.backup_main_cf().await?;
        self.remove_sasl_files().await?;

        let relay_only: Vec<&str> = RELAY_KEYS
            .iter()
            .copied()
            .filter(|key| *key != "inet_protocols")
            .collect();
        let current = self.read_main_cf().await?;
        let stripped = main_cf::strip_keys(&current, &relay_only);
        self.files
            .write(&self.paths.main_cf(), stripped.as_bytes(), 0o644)
            .await?;

        self.runner
            .run_checked(&CommandSpec::root("systemctl").args(["restart", self.service_name.as_str()]))
            .await?;
        Ok(())
    }

    /// `postfix check`; diagnostics are logged, not returned
    pub async fn check_config_validity(&self) -> bool {
        match self
            .runner
            .run(&CommandSpec::root("postfix").arg("check"))
            .await
        {
            Ok(output) => {
                if !output.success() {
                    warn!("postfix check: {}", output.stderr.trim());
                }
                output.success()
            }
            Err(e) => {
                error!("Error checking Postfix config: {}", e);
                false
            }
        }
    }

    /// relayhost currently set in main.cf, if any
    pub async fn current_relayhost(&self) -> Result<Option<String>> {
        let content = self.read_main_cf().await?;
        Ok(main_cf::get(&content, "relayhost").filter(|value| !value.is_empty()))
    }

    pub async fn sasl_configured(&self) -> bool {
        self.files.exists(&self.paths.sasl_passwd()).await
    }
}
