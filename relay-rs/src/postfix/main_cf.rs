//! main.cf text manipulation
//!
//! Postfix reads `key = value` lines; a line starting with whitespace
//! continues the previous parameter. Editing is replace-or-append: every
//! existing occurrence of a managed key (with its continuation lines) is
//! dropped and exactly one fresh line is appended.

/// Minimal relay-only configuration, used by basic setup and reset
pub const DEFAULT_MAIN_CF: &str = "# Basic SMTP Relay Configuration
smtpd_banner = $myhostname ESMTP
biff = no
append_dot_mydomain = no
readme_directory = no
compatibility_level = 2
myhostname = localhost
mydomain = localhost
myorigin = $mydomain
inet_interfaces = loopback-only
mydestination = $myhostname, localhost.$mydomain, $mydomain
local_transport = error:local delivery is disabled
mynetworks = 127.0.0.0/8, [::1]/128
mailbox_size_limit = 0
recipient_delimiter = +
inet_protocols = ipv4
";

/// Keys owned by the relay configuration
pub const RELAY_KEYS: [&str; 7] = [
    "relayhost",
    "smtp_sasl_auth_enable",
    "smtp_sasl_password_maps",
    "smtp_sasl_security_options",
    "smtp_tls_security_level",
    "smtp_sasl_tls_security_options",
    "inet_protocols",
];

/// Parameter name of a `key = value` line
fn line_key(line: &str) -> Option<&str> {
    if line.starts_with(char::is_whitespace) || line.trim_start().starts_with('#') {
        return None;
    }
    let (key, _) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some(key)
}

fn is_continuation(line: &str) -> bool {
    line.starts_with(char::is_whitespace) && !line.trim().is_empty()
}

/// Remove every parameter in `keys`, continuation lines included
pub fn strip_keys(content: &str, keys: &[&str]) -> String {
    let mut kept = Vec::new();
    let mut skipping = false;

    for line in content.lines() {
        if is_continuation(line) {
            if !skipping {
                kept.push(line);
            }
            continue;
        }

        skipping = line_key(line).is_some_and(|key| keys.contains(&key));
        if !skipping {
            kept.push(line);
        }
    }

    let mut out = kept.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Drop every managed key and append one line per setting.
///
/// The managed set is [`RELAY_KEYS`] plus the keys of `settings`.
pub fn apply_settings(content: &str, settings: &[(&str, String)]) -> String {
    let mut keys: Vec<&str> = RELAY_KEYS.to_vec();
    keys.extend(settings.iter().map(|(key, _)| *key));

    let mut out = strip_keys(content, &keys);
    for (key, value) in settings {
        out.push_str(&format!("{} = {}\n", key, value));
    }
    out
}

/// Value of `key`; the last occurrence wins, as in Postfix
pub fn get(content: &str, key: &str) -> Option<String> {
    let mut value: Option<String> = None;
    let mut current = false;

    for line in content.lines() {
        if is_continuation(line) {
            if let (true, Some(v)) = (current, value.as_mut()) {
                if !v.is_empty() {
                    v.push(' ');
                }
                v.push_str(line.trim());
            }
            continue;
        }

        current = line_key(line) == Some(key);
        if current {
            if let Some((_, v)) = line.split_once('=') {
                value = Some(v.trim().to_string());
            }
        }
    }

    value
}

/// Number of lines defining `key`
pub fn count(content: &str, key: &str) -> usize {
    content
        .lines()
        .filter(|line| line_key(line) == Some(key))
        .count()
}
