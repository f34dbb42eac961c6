//! Subprocess execution
//!
//! Every interaction with the host (systemctl, postfix, postmap, package
//! managers) goes through [`CommandRunner`] so components can be driven by
//! [`mock::MockRunner`] in tests.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::{RelayError, Result};

pub mod files;
pub mod mock;

pub use files::SystemFiles;

/// A command to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    /// Needs root; prefixed with `sudo -n` when the runner escalates
    pub privileged: bool,
    /// Overrides the runner's default timeout
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            privileged: false,
            timeout: None,
        }
    }

    /// Shorthand for a privileged command
    pub fn root(program: impl Into<String>) -> Self {
        Self::new(program).privileged()
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Program and arguments joined with spaces
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        CommandOutput {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Command runner trait
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// A non-zero exit is returned as output, not as an error. Errors are
    /// reserved for commands that could not be spawned or timed out.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run a command and turn a non-zero exit into [`RelayError::CommandFailed`]
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(spec).await?;
        if !output.success() {
            error!("Command failed: {} - {}", spec.display(), output.stderr.trim());
            return Err(RelayError::CommandFailed {
                command: spec.display(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Runs commands on the local host with `tokio::process`
pub struct SystemRunner {
    use_sudo: bool,
    default_timeout: Duration,
}

impl SystemRunner {
    pub fn new(use_sudo: bool, default_timeout: Duration) -> Self {
        SystemRunner {
            use_sudo,
            default_timeout,
        }
    }

    /// Final argv after privilege escalation
    fn argv(&self, spec: &CommandSpec) -> Vec<String> {
        let mut argv = Vec::with_capacity(spec.args.len() + 4);
        if spec.privileged && self.use_sudo {
            argv.push("sudo".to_string());
            argv.push("-n".to_string());
            if !spec.env.is_empty() {
                // sudo resets the environment, pass it through env(1)
                argv.push("env".to_string());
                argv.extend(spec.env.iter().map(|(k, v)| format!("{}={}", k, v)));
            }
        }
        argv.push(spec.program.clone());
        argv.extend(spec.args.iter().cloned());
        argv
    }
}

#[async_trait::async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let argv = self.argv(spec);
        let line = argv.join(" ");
        info!("Running command: {}", line);

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        if !(spec.privileged && self.use_sudo) {
            for (key, value) in &spec.env {
                cmd.env(key, value);
            }
        }

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RelayError::CommandNotFound(argv[0].clone()),
            std::io::ErrorKind::PermissionDenied => RelayError::PermissionDenied(line.clone()),
            _ => RelayError::Io(e),
        })?;

        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin.write_all(input).await?;
            // close the pipe so the child sees EOF
            drop(stdin);
        }

        let timeout = spec.timeout.unwrap_or(self.default_timeout);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                error!("Command timed out after {:?}: {}", timeout, line);
                return Err(RelayError::Timeout {
                    command: spec.display(),
                    seconds: timeout.as_secs(),
                });
            }
        };

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!("Command output ({:?}): {}", result.code, result.stdout.trim());

        Ok(result)
    }
}
