//! Mail queue inspection and test messages

use mail_builder::MessageBuilder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{RelayError, Result};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::utils::validate_email;

const QUEUE_TIMEOUT: Duration = Duration::from_secs(10);

/// Queue file state, from the marker after the queue id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    /// `*`
    Active,
    /// `!`
    Hold,
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue_id: String,
    pub state: QueueState,
    pub size: u64,
    pub arrival: String,
    pub sender: String,
    pub recipients: Vec<String>,
    /// Last delivery error for deferred mail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn entry_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^([0-9A-Za-z]+)([*!]?)\s+(\d+)\s+(\w{3}\s+\w{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(\S*)\s*$",
        )
        .ok()
    })
    .as_ref()
}

/// Parse `postqueue -p` output
pub fn parse_queue(output: &str) -> Vec<QueueEntry> {
    let mut entries: Vec<QueueEntry> = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() || line.starts_with('-') {
            continue;
        }

        if let Some(caps) = entry_line().and_then(|re| re.captures(line)) {
            let state = match &caps[2] {
                "*" => QueueState::Active,
                "!" => QueueState::Hold,
                _ => QueueState::Deferred,
            };
            entries.push(QueueEntry {
                queue_id: caps[1].to_string(),
                state,
                size: caps[3].parse().unwrap_or(0),
                arrival: caps[4].split_whitespace().collect::<Vec<_>>().join(" "),
                sender: caps[5].to_string(),
                recipients: Vec::new(),
                reason: None,
            });
            continue;
        }

        let Some(entry) = entries.last_mut() else {
            continue;
        };
        let detail = line.trim();
        if detail.starts_with('(') && detail.ends_with(')') {
            entry.reason = Some(detail.trim_matches(|c| c == '(' || c == ')').to_string());
        } else {
            entry.recipients.push(detail.to_string());
        }
    }

    entries
}

/// Postfix reports a stopped mail system on stdout or stderr
fn mail_system_down(output: &CommandOutput) -> bool {
    [&output.stdout, &output.stderr].iter().any(|text| {
        text.contains("Mail system is down")
            || text.contains("Connect to the Postfix showq service")
    })
}

/// A test message request
#[derive(Debug, Clone, Deserialize)]
pub struct TestEmail {
    pub from_email: String,
    #[serde(default)]
    pub from_name: Option<String>,
    pub to_email: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl TestEmail {
    pub fn new(from_email: impl Into<String>, to_email: impl Into<String>) -> Self {
        TestEmail {
            from_email: from_email.into(),
            from_name: None,
            to_email: to_email.into(),
            subject: None,
            body: None,
        }
    }

    pub fn build_message(&self) -> Result<Vec<u8>> {
        validate_email(&self.from_email)?;
        validate_email(&self.to_email)?;

        let from_name = self.from_name.as_deref().unwrap_or("SMTP Relay");
        let subject = self.subject.as_deref().unwrap_or("SMTP relay test");
        let body = self
            .body
            .as_deref()
            .unwrap_or("This is a test message sent through the Postfix relay.");

        let message = MessageBuilder::new()
            .from((from_name, self.from_email.as_str()))
            .to(self.to_email.as_str())
            .subject(subject)
            .text_body(body)
            .write_to_vec()?;
        Ok(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    QueuedForDelivery,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestEmailReport {
    pub delivery_status: DeliveryStatus,
    pub queue_id: Option<String>,
    pub message: String,
}

/// postqueue / sendmail front-end
pub struct MailQueue {
    runner: Arc<dyn CommandRunner>,
}

impl MailQueue {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        MailQueue { runner }
    }

    async fn postqueue(&self, flag: &str) -> Result<CommandOutput> {
        let spec = CommandSpec::root("postqueue")
            .arg(flag)
            .timeout(QUEUE_TIMEOUT);
        let output = self.runner.run(&spec).await?;

        if mail_system_down(&output) {
            return Err(RelayError::ServiceDown(
                "Mail system is not running properly. Postfix may need to be configured."
                    .to_string(),
            ));
        }
        if !output.success() {
            return Err(RelayError::CommandFailed {
                command: spec.display(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    pub async fn list(&self) -> Result<Vec<QueueEntry>> {
        let output = self.postqueue("-p").await?;
        Ok(parse_queue(&output.stdout))
    }

    /// Attempt delivery of everything queued
    pub async fn flush(&self) -> Result<()> {
        self.postqueue("-f").await?;
        info!("Mail queue has been flushed");
        Ok(())
    }

    /// Hand a test message to sendmail and look for it in the queue
    pub async fn send_test_email(&self, email: &TestEmail) -> Result<TestEmailReport> {
        let message = email.build_message()?;

        self.runner
            .run_checked(
                &CommandSpec::new("sendmail")
                    .args(["-i", "-f", email.from_email.as_str(), email.to_email.as_str()])
                    .stdin(message),
            )
            .await?;
        info!("Test email sent from {} to {}", email.from_email, email.to_email);

        let report = match self.list().await {
            Ok(entries) => {
                let queue_id = entries
                    .iter()
                    .find(|entry| entry.recipients.iter().any(|r| r == &email.to_email))
                    .map(|entry| entry.queue_id.clone());
                let message = match &queue_id {
                    Some(id) => format!("Email sent successfully and queued for delivery (queue id {})", id),
                    None => "Email sent successfully and queued for delivery!".to_string(),
                };
                TestEmailReport {
                    delivery_status: DeliveryStatus::QueuedForDelivery,
                    queue_id,
                    message,
                }
            }
            Err(e) => {
                warn!("Queue check after test email failed: {}", e);
                TestEmailReport {
                    delivery_status: DeliveryStatus::Unknown,
                    queue_id: None,
                    message: format!("Email sent successfully but status check failed: {}", e),
                }
            }
        };

        Ok(report)
    }
}
