//! Error types for relay-rs

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The program could not be spawned at all
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    /// The program ran and exited non-zero
    #[error("Command `{command}` failed (exit {}): {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command `{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Unsupported package manager: {0}")]
    UnsupportedPackageManager(String),

    /// Postfix is installed but its daemons are not answering
    #[error("Mail system is down: {0}")]
    ServiceDown(String),

    #[error("Secret codec error: {0}")]
    Secret(String),

    #[error("Backup error: {0}")]
    Backup(String),
}

impl From<::config::ConfigError> for RelayError {
    fn from(e: ::config::ConfigError) -> Self {
        RelayError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display() {
        let err = RelayError::CommandFailed {
            command: "postfix check".to_string(),
            code: Some(1),
            stderr: "fatal: bad config".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command `postfix check` failed (exit 1): fatal: bad config"
        );

        let killed = RelayError::CommandFailed {
            command: "postqueue -p".to_string(),
            code: None,
            stderr: String::new(),
        };
        assert!(killed.to_string().contains("exit signal"));
    }
}
