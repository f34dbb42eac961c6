use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;

use crate::error::{RelayError, Result};
use crate::exec::{CommandRunner, CommandSpec};

pub const DEFAULT_TAIL_LINES: usize = 30;
pub const MAX_TAIL_LINES: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct LogTail {
    pub path: PathBuf,
    pub lines: usize,
    pub log: String,
}

/// Read access to the Postfix mail log
pub struct MailLog {
    runner: Arc<dyn CommandRunner>,
    candidates: Vec<PathBuf>,
}

impl MailLog {
    pub fn new(runner: Arc<dyn CommandRunner>, candidates: Vec<PathBuf>) -> Self {
        MailLog { runner, candidates }
    }

    /// First candidate log file that exists
    pub async fn locate(&self) -> Option<PathBuf> {
        for path in &self.candidates {
            if fs::try_exists(path).await.unwrap_or(false) {
                return Some(path.clone());
            }
        }
        None
    }

    /// Last `lines` lines of the log; `None` means the default of 30
    pub async fn tail(&self, lines: Option<usize>) -> Result<LogTail> {
        let lines = lines.unwrap_or(DEFAULT_TAIL_LINES).clamp(1, MAX_TAIL_LINES);
        let path = self
            .locate()
            .await
            .ok_or_else(|| RelayError::NotFound("Mail log not found on this system".to_string()))?;

        // mail logs are usually readable only by root/adm
        let output = self
            .runner
            .run_checked(
                &CommandSpec::root("tail")
                    .arg("-n")
                    .arg(lines.to_string())
                    .arg(path.to_string_lossy()),
            )
            .await?;

        Ok(LogTail {
            path,
            lines,
            log: output.stdout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::MockRunner;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_locate_prefers_first_existing() {
        let temp_dir = TempDir::new().unwrap();
        let mail_log = temp_dir.path().join("mail.log");
        let maillog = temp_dir.path().join("maillog");
        std::fs::write(&maillog, "").unwrap();

        let log = MailLog::new(
            Arc::new(MockRunner::new()),
            vec![mail_log.clone(), maillog.clone()],
        );
        assert_eq!(log.locate().await, Some(maillog));

        std::fs::write(&mail_log, "").unwrap();
        assert_eq!(log.locate().await, Some(mail_log));
    }

    #[tokio::test]
    async fn test_tail_defaults_and_cap() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mail.log");
        std::fs::write(&path, "").unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.on_ok("tail", "postfix/smtp[123]: status=sent\n");
        let log = MailLog::new(runner.clone(), vec![path.clone()]);

        let tail = log.tail(None).await.unwrap();
        assert_eq!(tail.lines, 30);
        assert!(tail.log.contains("status=sent"));

        let tail = log.tail(Some(50_000)).await.unwrap();
        assert_eq!(tail.lines, 1000);

        let lines = runner.command_lines();
        assert_eq!(lines[0], format!("tail -n 30 {}", path.display()));
        assert_eq!(lines[1], format!("tail -n 1000 {}", path.display()));
    }

    #[tokio::test]
    async fn test_missing_log() {
        let temp_dir = TempDir::new().unwrap();
        let log = MailLog::new(
            Arc::new(MockRunner::new()),
            vec![temp_dir.path().join("mail.log")],
        );
        assert!(matches!(log.tail(None).await, Err(RelayError::NotFound(_))));
    }
}
