use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::installer::{InstallOutcome, InstallationStatus, Installer, UninstallReport};
use crate::error::{RelayError, Result};
use crate::postfix::{Provider, ProviderPreset, RelayConfig};
use crate::system::{SystemDetector, SystemProfile};
use crate::utils::{
    parse_port, validate_email, validate_hostname, validate_map_token, validate_password,
};

pub const TOTAL_STEPS: u32 = 5;

/// Kind of value a wizard form field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Email,
    Hostname,
    Port,
    Password,
    Username,
}

impl std::str::FromStr for InputKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "email" => Ok(InputKind::Email),
            "hostname" => Ok(InputKind::Hostname),
            "port" => Ok(InputKind::Port),
            "password" => Ok(InputKind::Password),
            "username" => Ok(InputKind::Username),
            other => Err(RelayError::Validation(format!("Unknown input type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputValidation {
    pub valid: bool,
    pub message: String,
}

/// Host and port a provider resolves to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub relay_host: String,
    pub relay_port: u16,
    pub provider_name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct WizardStep {
    pub step: u32,
    pub total_steps: u32,
    pub title: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_text: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_info: Option<SystemProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<&'static [ProviderPreset]>,
}

/// Form data submitted at the end of the wizard
#[derive(Clone, Deserialize)]
pub struct WizardRequest {
    #[serde(default)]
    pub provider: Provider,
    /// Overrides the preset host; required for `custom`
    #[serde(default)]
    pub relay_host: Option<String>,
    #[serde(default)]
    pub relay_port: Option<u16>,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for WizardRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WizardRequest")
            .field("provider", &self.provider)
            .field("relay_host", &self.relay_host)
            .field("relay_port", &self.relay_port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub success: bool,
    pub message: String,
    pub outcome: InstallOutcome,
    pub installation_status: InstallationStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct UninstallResponse {
    pub success: bool,
    pub message: String,
    pub report: UninstallReport,
}

/// Guided installation on top of [`Installer`]
pub struct InstallationWizard {
    installer: Arc<Installer>,
    detector: Arc<SystemDetector>,
}

impl InstallationWizard {
    pub fn new(installer: Arc<Installer>, detector: Arc<SystemDetector>) -> Self {
        InstallationWizard {
            installer,
            detector,
        }
    }

    pub async fn system_info(&self) -> SystemProfile {
        self.detector.get_system_info().await
    }

    pub fn provider_presets(&self) -> &'static [ProviderPreset] {
        Provider::presets()
    }

    /// Preset host and port; for `custom` the given values replace them
    pub fn provider_config(
        &self,
        provider: Provider,
        custom_host: Option<&str>,
        custom_port: Option<u16>,
    ) -> ProviderConfig {
        let preset = provider.preset();
        let mut config = ProviderConfig {
            provider,
            relay_host: preset.relay_host.to_string(),
            relay_port: preset.relay_port,
            provider_name: preset.name,
            description: preset.description,
        };

        if provider == Provider::Custom {
            if let Some(host) = custom_host.filter(|h| !h.is_empty()) {
                config.relay_host = host.to_string();
            }
            if let Some(port) = custom_port {
                config.relay_port = port;
            }
        }

        config
    }

    pub fn validate_input(&self, kind: InputKind, value: &str) -> InputValidation {
        let checked = match kind {
            InputKind::Email => validate_email(value),
            InputKind::Hostname => validate_hostname(value),
            InputKind::Port => parse_port(value).map(|_| ()),
            InputKind::Password => validate_password(value),
            InputKind::Username => validate_map_token("Username", value),
        };

        match checked {
            Ok(()) => InputValidation {
                valid: true,
                message: String::new(),
            },
            Err(RelayError::Validation(message)) => InputValidation {
                valid: false,
                message,
            },
            Err(e) => InputValidation {
                valid: false,
                message: e.to_string(),
            },
        }
    }

    pub async fn wizard_step(&self, step: u32) -> Result<WizardStep> {
        let mut page = WizardStep {
            step,
            total_steps: TOTAL_STEPS,
            title: "",
            help_text: None,
            system_info: None,
            providers: None,
        };

        match step {
            1 => {
                page.title = "System Check";
                page.system_info = Some(self.system_info().await);
            }
            2 => {
                page.title = "Choose Email Provider";
                page.providers = Some(self.provider_presets());
            }
            3 => {
                page.title = "Enter SMTP Settings";
                page.help_text = Some("Enter your custom SMTP server settings");
            }
            4 => {
                page.title = "Enter Credentials";
                page.help_text = Some("Enter your email account credentials");
            }
            5 => {
                page.title = "Confirmation";
                page.help_text = Some("Review your settings before installation");
            }
            _ => {
                return Err(RelayError::Validation(format!(
                    "Invalid step number {} (expected 1-{})",
                    step, TOTAL_STEPS
                )))
            }
        }

        Ok(page)
    }

    /// Resolve the submitted form into relay settings
    pub fn relay_config(&self, request: &WizardRequest) -> Result<RelayConfig> {
        let preset = request.provider.preset();
        let relay = RelayConfig {
            relay_host: request
                .relay_host
                .clone()
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| preset.relay_host.to_string()),
            relay_port: request.relay_port.unwrap_or(preset.relay_port),
            username: request.username.trim().to_string(),
            password: request.password.clone(),
            provider: request.provider,
        };

        relay.validate()?;
        Ok(relay)
    }

    pub async fn install_with_data(&self, request: &WizardRequest) -> Result<InstallReport> {
        let relay = self.relay_config(request)?;
        info!("Wizard installation for {} via {}", relay.relayhost(), relay.provider);

        let outcome = self.installer.run_installation(&relay).await?;
        let message = if outcome.success {
            "Installation completed successfully!".to_string()
        } else {
            format!(
                "Installation failed{}. Check logs for details.",
                outcome
                    .failed_step
                    .map(|step| format!(" during {}", step))
                    .unwrap_or_default()
            )
        };

        Ok(InstallReport {
            success: outcome.success,
            message,
            outcome,
            installation_status: self.installer.get_installation_status().await,
        })
    }

    pub async fn uninstall(&self) -> Result<UninstallResponse> {
        let report = self.installer.run_uninstallation().await?;
        let message = if report.warnings.is_empty() {
            "Uninstallation completed successfully!".to_string()
        } else {
            format!(
                "Uninstallation completed with {} warning(s)",
                report.warnings.len()
            )
        };

        Ok(UninstallResponse {
            success: true,
            message,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::RelayContext;
    use crate::exec::mock::MockRunner;
    use tempfile::TempDir;

    fn wizard(root: &TempDir) -> Arc<InstallationWizard> {
        let ctx = RelayContext::from_config(Config::rooted_at(root.path()), Arc::new(MockRunner::new()));
        ctx.wizard.clone()
    }

    fn request(provider: Provider, username: &str) -> WizardRequest {
        WizardRequest {
            provider,
            relay_host: None,
            relay_port: None,
            username: username.to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn test_input_kind_from_str() {
        assert_eq!("Email".parse::<InputKind>().unwrap(), InputKind::Email);
        assert!("phone".parse::<InputKind>().is_err());
    }

    #[tokio::test]
    async fn test_validate_input() {
        let root = TempDir::new().unwrap();
        let wizard = wizard(&root);

        assert!(wizard.validate_input(InputKind::Email, "a@example.com").valid);
        assert!(!wizard.validate_input(InputKind::Email, "example.com").valid);
        assert!(wizard.validate_input(InputKind::Hostname, "smtp.example.com").valid);
        assert!(wizard.validate_input(InputKind::Port, "587").valid);

        let port = wizard.validate_input(InputKind::Port, "70000");
        assert!(!port.valid);
        assert!(!port.message.is_empty());

        assert!(!wizard.validate_input(InputKind::Password, "").valid);
        assert!(!wizard.validate_input(InputKind::Username, "with space").valid);
    }

    #[tokio::test]
    async fn test_provider_config() {
        let root = TempDir::new().unwrap();
        let wizard = wizard(&root);

        let gmail = wizard.provider_config(Provider::Gmail, Some("ignored.example.com"), Some(25));
        assert_eq!(gmail.relay_host, "smtp.gmail.com");
        assert_eq!(gmail.relay_port, 587);

        let custom = wizard.provider_config(Provider::Custom, Some("mx.example.com"), Some(2525));
        assert_eq!(custom.relay_host, "mx.example.com");
        assert_eq!(custom.relay_port, 2525);

        assert_eq!(wizard.provider_presets().len(), 5);
    }

    #[tokio::test]
    async fn test_wizard_steps() {
        let root = TempDir::new().unwrap();
        let wizard = wizard(&root);

        let titles = [
            "System Check",
            "Choose Email Provider",
            "Enter SMTP Settings",
            "Enter Credentials",
            "Confirmation",
        ];
        for (i, title) in titles.iter().enumerate() {
            let step = wizard.wizard_step(i as u32 + 1).await.unwrap();
            assert_eq!(step.title, *title);
        }

        assert!(wizard.wizard_step(1).await.unwrap().system_info.is_some());
        assert!(wizard.wizard_step(2).await.unwrap().providers.is_some());
        assert!(matches!(
            wizard.wizard_step(0).await,
            Err(RelayError::Validation(_))
        ));
        assert!(wizard.wizard_step(6).await.is_err());
    }

    #[tokio::test]
    async fn test_username_must_be_email_only_for_mailbox_providers() {
        let root = TempDir::new().unwrap();
        let wizard = wizard(&root);

        assert!(wizard.relay_config(&request(Provider::Gmail, "bob")).is_err());
        assert!(wizard.relay_config(&request(Provider::Outlook, "bob")).is_err());

        let sendgrid = wizard.relay_config(&request(Provider::Sendgrid, "apikey")).unwrap();
        assert_eq!(sendgrid.relay_host, "smtp.sendgrid.net");
        assert_eq!(sendgrid.username, "apikey");
    }

    #[tokio::test]
    async fn test_custom_requires_host() {
        let root = TempDir::new().unwrap();
        let wizard = wizard(&root);

        assert!(wizard.relay_config(&request(Provider::Custom, "relay-user")).is_err());

        let mut custom = request(Provider::Custom, "relay-user");
        custom.relay_host = Some("mx.example.com".to_string());
        custom.relay_port = Some(2525);
        let relay = wizard.relay_config(&custom).unwrap();
        assert_eq!(relay.relayhost(), "[mx.example.com]:2525");
    }

    #[tokio::test]
    async fn test_request_debug_hides_password() {
        let request = request(Provider::Gmail, "a@gmail.com");
        assert!(!format!("{:?}", request).contains("secret"));
    }
}
