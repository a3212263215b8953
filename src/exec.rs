//! External command execution
//!
//! Both side-effect adapters drive the host through external programs
//! (`ip`, `arping`, `systemctl`). They go through [`CommandRunner`] so the
//! adapters can be exercised against a scripted runner in tests.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors from running an external command
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started at all
    #[error("{command:?} could not be started: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// The program ran and exited unsuccessfully
    #[error("{command:?} failed: {status}, {output}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Capability to run a program and collect its combined output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, returning stdout followed by stderr.
    ///
    /// A non-zero exit status is an error carrying the command line and output.
    async fn run(&self, program: &str, args: &[&str]) -> CommandResult<String>;
}

/// Runs commands on the host with `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> CommandResult<String> {
        let command = command_line(program, args);
        debug!(%command, "running command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(CommandError::Failed {
                command,
                status: output.status.to_string(),
                output: combined.trim().to_string(),
            })
        }
    }
}

/// Render a program and its arguments as a single line for logs and errors
pub fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
