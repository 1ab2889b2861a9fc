//! External command execution
//!
//! The only place roleguard spawns programs. Arguments are passed straight to
//! the program without shell interpretation, and every call is bounded by a
//! timeout so a wedged `nft` or xtables lock cannot hang the action past what
//! the cluster manager expects.

use crate::core::error::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, error};

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Converts a non-zero exit into [`Error::RuleMutation`].
    pub fn check(self, program: &str, args: &[String]) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::RuleMutation {
                command: render(program, args),
                exit_code: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Renders a command line for logs and error messages
pub fn render(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Seam between the adapters and the operating system.
///
/// Adapters only ever see this trait, which is what lets tests script the
/// responses of `nft`/`iptables` without touching the host firewall.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Runs `program` with `args` and captures its output.
    ///
    /// A non-zero exit is not an error here; callers decide what it means.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Whether `program` can be found on the execution path
    fn has_program(&self, program: &str) -> bool;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        (**self).run(program, args).await
    }

    fn has_program(&self, program: &str) -> bool {
        (**self).has_program(program)
    }
}

/// Runs real processes via `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let command = render(program, args);
        debug!("Running: {command}");

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("Failed to spawn {program}: {e}");
                return Err(Error::RuleMutation {
                    command,
                    exit_code: None,
                    stderr: format!("failed to spawn: {e}"),
                });
            }
            Err(_) => {
                error!("Command timed out after {:?}: {command}", self.timeout);
                return Err(Error::Timeout {
                    command,
                    secs: self.timeout.as_secs(),
                });
            }
        };

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn has_program(&self, program: &str) -> bool {
        crate::utils::binary_exists(program)
    }
}
