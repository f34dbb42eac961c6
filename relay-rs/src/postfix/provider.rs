use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Relay provider presets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gmail,
    Outlook,
    Sendgrid,
    AwsSes,
    #[default]
    Custom,
}

/// Static settings for a provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderPreset {
    pub key: Provider,
    pub name: &'static str,
    /// Empty for [`Provider::Custom`]
    pub relay_host: &'static str,
    pub relay_port: u16,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_url: Option<&'static str>,
}

static PRESETS: [ProviderPreset; 5] = [
    ProviderPreset {
        key: Provider::Gmail,
        name: "Gmail",
        relay_host: "smtp.gmail.com",
        relay_port: 587,
        description: "Using Gmail SMTP requires an App Password (not regular password)",
        help_url: Some("https://support.google.com/accounts/answer/185833"),
    },
    ProviderPreset {
        key: Provider::Outlook,
        name: "Outlook/Hotmail",
        relay_host: "smtp-mail.outlook.com",
        relay_port: 587,
        description: "Microsoft account with SMTP access enabled",
        help_url: None,
    },
    ProviderPreset {
        key: Provider::Sendgrid,
        name: "SendGrid",
        relay_host: "smtp.sendgrid.net",
        relay_port: 587,
        description: "Requires SendGrid API credentials",
        help_url: None,
    },
    ProviderPreset {
        key: Provider::AwsSes,
        name: "AWS SES",
        relay_host: "email-smtp.us-east-1.amazonaws.com",
        relay_port: 587,
        description: "AWS SES SMTP credentials (region-specific endpoint)",
        help_url: None,
    },
    ProviderPreset {
        key: Provider::Custom,
        name: "Custom SMTP",
        relay_host: "",
        relay_port: 587,
        description: "Use custom SMTP server settings",
        help_url: None,
    },
];

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Gmail,
        Provider::Outlook,
        Provider::Sendgrid,
        Provider::AwsSes,
        Provider::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gmail => "gmail",
            Provider::Outlook => "outlook",
            Provider::Sendgrid => "sendgrid",
            Provider::AwsSes => "aws_ses",
            Provider::Custom => "custom",
        }
    }

    pub fn preset(&self) -> &'static ProviderPreset {
        match self {
            Provider::Gmail => &PRESETS[0],
            Provider::Outlook => &PRESETS[1],
            Provider::Sendgrid => &PRESETS[2],
            Provider::AwsSes => &PRESETS[3],
            Provider::Custom => &PRESETS[4],
        }
    }

    pub fn presets() -> &'static [ProviderPreset] {
        &PRESETS
    }

    /// Providers whose login is the mailbox address
    pub fn username_is_email(&self) -> bool {
        matches!(self, Provider::Gmail | Provider::Outlook)
    }

    /// main.cf settings for this provider, `relayhost` first.
    ///
    /// Known providers require TLS; custom relays use opportunistic TLS.
    pub fn relay_settings(&self, relayhost: &str, sasl_map: &str) -> Vec<(&'static str, String)> {
        let tls_level = match self {
            Provider::Custom => "may",
            _ => "encrypt",
        };

        vec![
            ("relayhost", relayhost.to_string()),
            ("smtp_sasl_auth_enable", "yes".to_string()),
            ("smtp_sasl_password_maps", sasl_map.to_string()),
            ("smtp_sasl_security_options", "noanonymous".to_string()),
            ("smtp_tls_security_level", tls_level.to_string()),
            ("smtp_sasl_tls_security_options", "noanonymous".to_string()),
            ("inet_protocols", "ipv4".to_string()),
        ]
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| RelayError::Validation(format!("Unknown provider: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postfix::main_cf::RELAY_KEYS;

    #[test]
    fn test_parse_provider() {
        assert_eq!("gmail".parse::<Provider>().unwrap(), Provider::Gmail);
        assert_eq!("AWS_SES".parse::<Provider>().unwrap(), Provider::AwsSes);
        assert!("yahoo".parse::<Provider>().is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Provider::AwsSes).unwrap(), "\"aws_ses\"");
        let p: Provider = serde_json::from_str("\"sendgrid\"").unwrap();
        assert_eq!(p, Provider::Sendgrid);
    }

    #[test]
    fn test_presets() {
        for provider in Provider::ALL {
            let preset = provider.preset();
            assert_eq!(preset.key, provider);
            assert_eq!(preset.relay_port, 587);
        }
        assert_eq!(Provider::Gmail.preset().relay_host, "smtp.gmail.com");
        assert!(Provider::Gmail.preset().help_url.is_some());
        assert!(Provider::Custom.preset().relay_host.is_empty());
    }

    #[test]
    fn test_relay_settings_cover_managed_keys() {
        let settings = Provider::Gmail.relay_settings("[smtp.gmail.com]:587", "hash:/etc/postfix/sasl_passwd");
        let keys: Vec<&str> = settings.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, RELAY_KEYS.to_vec());
        assert!(settings.contains(&("smtp_tls_security_level", "encrypt".to_string())));

        let custom = Provider::Custom.relay_settings("[mx.example.org]:2525", "hash:/x");
        assert!(custom.contains(&("smtp_tls_security_level", "may".to_string())));
        assert!(custom.contains(&("smtp_sasl_auth_enable", "yes".to_string())));
    }
}
