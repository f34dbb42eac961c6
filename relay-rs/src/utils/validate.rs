use crate::error::{RelayError, Result};

/// Basic email validation
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(RelayError::Validation("Email is empty".to_string()));
    }

    if !email.contains('@') {
        return Err(RelayError::Validation("Email must contain @".to_string()));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(RelayError::Validation("Invalid email format".to_string()));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(RelayError::Validation(
            "Email parts cannot be empty".to_string(),
        ));
    }

    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(RelayError::Validation(
            "Domain must contain a dot".to_string(),
        ));
    }

    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RelayError::Validation(
            "Email cannot contain whitespace".to_string(),
        ));
    }

    Ok(())
}

/// Relay hostname: at least one dot, DNS characters only
pub fn validate_hostname(host: &str) -> Result<()> {
    if host.len() < 3 || !host.contains('.') {
        return Err(RelayError::Validation(
            "Please enter a valid hostname".to_string(),
        ));
    }

    let valid_label = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };

    if host.len() > 253 || !host.split('.').all(valid_label) {
        return Err(RelayError::Validation(format!("Invalid hostname: {}", host)));
    }

    Ok(())
}

pub fn parse_port(value: &str) -> Result<u16> {
    let port: u32 = value
        .trim()
        .parse()
        .map_err(|_| RelayError::Validation("Port must be a number".to_string()))?;

    if !(1..=65535).contains(&port) {
        return Err(RelayError::Validation(
            "Port must be between 1 and 65535".to_string(),
        ));
    }

    Ok(port as u16)
}

/// A value written into a Postfix lookup table line.
///
/// Whitespace would split the entry and a newline would add a second one.
pub fn validate_map_token(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(RelayError::Validation(format!("{} cannot be empty", field)));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RelayError::Validation(format!(
            "{} cannot contain whitespace or control characters",
            field
        )));
    }
    Ok(())
}

/// Password may hold spaces but must stay on one line
pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(RelayError::Validation("Password cannot be empty".to_string()));
    }
    if password.chars().any(|c| c == '\n' || c == '\r' || c == '\0') {
        return Err(RelayError::Validation(
            "Password cannot contain line breaks".to_string(),
        ));
    }
    Ok(())
}

/// Backup directory name: a single path component
pub fn validate_backup_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(RelayError::Validation(format!("Invalid backup name: {:?}", name)));
    }
    if name.contains('/') || name.contains('\\') || name.chars().any(|c| c.is_control()) {
        return Err(RelayError::Validation(format!(
            "Backup name cannot contain path separators: {}",
            name
        )));
    }
    Ok(())
}
