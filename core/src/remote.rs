//! Remote execution seam
//!
//! The session manager, executor and relocator only talk to the remote host
//! through these traits. The SSH transport lives in [`crate::ssh`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::Result;

/// A chunk of streamed command output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

/// A connected remote session able to run commands
///
/// Implementations must allow concurrent `exec` calls; each call runs in its
/// own channel on the shared session.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command`, streaming output into `output`, and return the exit code
    async fn exec(&self, command: &str, output: mpsc::Sender<OutputChunk>) -> Result<i32>;

    /// Whether the underlying transport is still usable
    fn is_connected(&self) -> bool;
}

/// Establishes remote sessions
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open and authenticate a new session
    ///
    /// Failures are `Error::Connection` (classified) or `Error::Config`.
    async fn connect(&self) -> Result<Arc<dyn RemoteShell>>;

    /// Host name used in log lines and error messages
    fn host(&self) -> &str;
}

/// Fully collected result of a short command
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Non-empty stdout lines
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Run a short command and collect all of its output
///
/// Only for commands with small output (find, cp, mkdir); downloads stream.
pub async fn capture(shell: &dyn RemoteShell, command: &str) -> Result<CommandResult> {
    let (tx, mut rx) = mpsc::channel(64);

    let collect = async {
        let mut result = CommandResult::default();
        while let Some(chunk) = rx.recv().await {
            match chunk {
                OutputChunk::Stdout(s) => result.stdout.push_str(&s),
                OutputChunk::Stderr(s) => result.stderr.push_str(&s),
            }
        }
        result
    };

    let (exit_code, mut result) = tokio::join!(shell.exec(command, tx), collect);
    result.exit_code = exit_code?;
    Ok(result)
}

/// Quote a string for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '='))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Prefix `command` with a change into `dir`
pub fn in_dir(dir: &str, command: &str) -> String {
    format!("cd {} && {}", shell_quote(dir), command)
}
