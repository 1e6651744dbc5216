//! Remote command execution.
//!
//! The agent opens one `RemoteSession` per job through a `RemoteShell` and runs
//! every command over it with [`run_remote`]. The SSH transport (with optional
//! bastion gateway) lives in [`ssh`].

pub mod ssh;

pub use ssh::SshShell;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::error::RemoteError;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the server closed the channel without an exit status.
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    /// Trimmed stdout followed directly by trimmed stderr.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout.trim(), self.stderr.trim())
    }
}

/// An open, authenticated command channel to the target host.
#[async_trait]
pub trait RemoteSession: Send {
    /// Run `command` without a pseudo-terminal, optionally feeding `stdin`.
    async fn exec(&mut self, command: &str, stdin: Option<&str>)
    -> Result<CommandOutput, RemoteError>;

    /// Release the session (and its gateway, if any). Safe to call twice.
    async fn close(&mut self);
}

/// Factory for sessions to one job's target host.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// Run a model-chosen command on the target.
///
/// The non-interactive environment is exported first. With a sudo password the
/// whole line runs under `sudo -S` with the password on stdin and an empty
/// prompt, so nothing but the command's own output is captured. The elevated
/// shell detaches from stdin before running the command: sudo leaves the
/// password unread when it does not need it.
pub async fn run_remote(
    session: &mut dyn RemoteSession,
    command: &str,
    shell_environment: &str,
    sudo_password: Option<&SecretString>,
) -> Result<String, RemoteError> {
    let line = if shell_environment.is_empty() {
        command.to_string()
    } else {
        format!("export {shell_environment}; {command}")
    };

    let output = match sudo_password {
        Some(password) => {
            let elevated = format!(
                "sudo -S -p '' sh -c {}",
                shell_quote(&format!("exec </dev/null; {line}"))
            );
            let stdin = format!("{}\n", password.expose_secret());
            session.exec(&elevated, Some(&stdin)).await?
        }
        None => session.exec(&line, None).await?,
    };

    debug!(
        command = %command,
        exit_status = ?output.exit_status,
        "Remote command finished"
    );
    Ok(output.combined())
}

/// Quote `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
