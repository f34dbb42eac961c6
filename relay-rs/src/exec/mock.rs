//! Scripted command runner for testing
//!
//! Responses are matched by command-line prefix (`"systemctl is-active"`),
//! the most recently registered rule wins, and anything unmatched succeeds
//! with empty output. Every command is recorded.

use std::sync::Mutex;

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::{RelayError, Result};

#[derive(Debug, Clone)]
enum MockResponse {
    Output(CommandOutput),
    Missing,
    Timeout,
}

/// Mock runner implementation for testing
#[derive(Default)]
pub struct MockRunner {
    rules: Mutex<Vec<(String, MockResponse)>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, prefix: &str, response: MockResponse) {
        self.rules
            .lock()
            .expect("mock rules poisoned")
            .push((prefix.to_string(), response));
    }

    /// Reply to commands starting with `prefix`
    pub fn on(&self, prefix: &str, code: i32, stdout: &str, stderr: &str) {
        self.push(
            prefix,
            MockResponse::Output(CommandOutput {
                code: Some(code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }),
        );
    }

    /// Successful reply with `stdout`
    pub fn on_ok(&self, prefix: &str, stdout: &str) {
        self.on(prefix, 0, stdout, "");
    }

    /// Pretend the program is not installed
    pub fn on_missing(&self, prefix: &str) {
        self.push(prefix, MockResponse::Missing);
    }

    pub fn on_timeout(&self, prefix: &str) {
        self.push(prefix, MockResponse::Timeout);
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().expect("mock calls poisoned").clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }

    /// Number of recorded commands starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    pub fn was_called(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }

    pub fn clear_calls(&self) {
        self.calls.lock().expect("mock calls poisoned").clear();
    }
}

#[async_trait::async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls
            .lock()
            .expect("mock calls poisoned")
            .push(spec.clone());

        let line = spec.display();
        let response = self
            .rules
            .lock()
            .expect("mock rules poisoned")
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, response)| response.clone());

        match response {
            Some(MockResponse::Output(output)) => Ok(output),
            Some(MockResponse::Missing) => Err(RelayError::CommandNotFound(spec.program.clone())),
            Some(MockResponse::Timeout) => Err(RelayError::Timeout {
                command: line,
                seconds: spec.timeout.map(|t| t.as_secs()).unwrap_or(15),
            }),
            None => Ok(CommandOutput::ok("")),
        }
    }
}
