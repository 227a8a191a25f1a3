//! Moves produced files into their final directory on the remote host

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::remote::{capture, shell_quote, CommandResult, RemoteShell};
use crate::{Error, Result};

/// Stderr fragments meaning sudo cannot run non-interactively
const ESCALATION_UNAVAILABLE: &[&str] = &[
    "sudo: command not found",
    "sudo: not found",
    "a password is required",
    "a terminal is required",
    "no tty present",
];

/// Copy-then-delete relocation with a privileged first attempt
#[derive(Debug, Clone)]
pub struct FileRelocator {
    /// Wait before touching the file so the tool can finish writing it
    pub grace_period: Duration,
}

impl Default for FileRelocator {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(3),
        }
    }
}

impl FileRelocator {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Move `source` into `destination_dir`, returning the new path
    #[instrument(skip(self, shell))]
    pub async fn relocate(
        &self,
        shell: &dyn RemoteShell,
        source: &str,
        destination_dir: &str,
    ) -> Result<String> {
        let file_name = source
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::Relocation(format!("'{}' does not name a file", source)))?;

        let destination_dir = destination_dir.trim_end_matches('/');
        let destination = format!("{}/{}", destination_dir, file_name);
        if destination == source {
            debug!("File already in destination directory");
            return Ok(destination);
        }

        self.run_with_fallback(&[format!("mkdir -p {}", shell_quote(destination_dir))], shell)
            .await?;

        sleep(self.grace_period).await;

        self.run_with_fallback(
            &[
                format!("cp {} {}", shell_quote(source), shell_quote(&destination)),
                format!("rm {}", shell_quote(source)),
            ],
            shell,
        )
        .await?;

        info!(destination = %destination, "File relocated");
        Ok(destination)
    }

    /// Run `steps` chained with `&&`, under `sudo -n` first
    async fn run_with_fallback(&self, steps: &[String], shell: &dyn RemoteShell) -> Result<()> {
        let privileged = steps
            .iter()
            .map(|step| format!("sudo -n {}", step))
            .collect::<Vec<_>>()
            .join(" && ");

        let result = capture(shell, &privileged).await?;
        if result.success() {
            return Ok(());
        }

        if !escalation_unavailable(&result) {
            return Err(Error::Relocation(describe(&privileged, &result)));
        }

        warn!(
            exit_code = result.exit_code,
            "Privilege escalation unavailable, retrying without sudo"
        );
        let plain = steps.join(" && ");
        let result = capture(shell, &plain).await?;
        if result.success() {
            Ok(())
        } else {
            Err(Error::Relocation(describe(&plain, &result)))
        }
    }
}

fn escalation_unavailable(result: &CommandResult) -> bool {
    result.exit_code == 127
        || ESCALATION_UNAVAILABLE
            .iter()
            .any(|fragment| result.stderr.contains(fragment))
}

fn describe(command: &str, result: &CommandResult) -> String {
    let stderr = result.stderr.trim();
    if stderr.is_empty() {
        format!("'{}' failed with exit code {}", command, result.exit_code)
    } else {
        format!("'{}' failed: {}", command, stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::OutputChunk;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Fails every sudo command with the given exit code and stderr
    struct SudoShell {
        sudo_exit: i32,
        sudo_stderr: &'static str,
        plain_exit: i32,
        commands: Mutex<Vec<String>>,
    }

    impl SudoShell {
        fn new(sudo_exit: i32, sudo_stderr: &'static str, plain_exit: i32) -> Self {
            Self {
                sudo_exit,
                sudo_stderr,
                plain_exit,
                commands: Mutex::new(Vec::new()),
            }
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteShell for SudoShell {
        async fn exec(&self, command: &str, output: mpsc::Sender<OutputChunk>) -> Result<i32> {
            self.commands.lock().unwrap().push(command.to_string());
            if command.starts_with("sudo") {
                if !self.sudo_stderr.is_empty() {
                    let _ = output
                        .send(OutputChunk::Stderr(self.sudo_stderr.to_string()))
                        .await;
                }
                Ok(self.sudo_exit)
            } else {
                Ok(self.plain_exit)
            }
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn relocator() -> FileRelocator {
        FileRelocator::new(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_privileged_copy_then_delete() {
        let shell = SudoShell::new(0, "", 0);
        let moved = relocator()
            .relocate(&shell, "/home/raspberry/My Song.mp3", "/music/yt-dlp/")
            .await
            .unwrap();

        assert_eq!(moved, "/music/yt-dlp/My Song.mp3");
        assert_eq!(
            shell.commands(),
            vec![
                "sudo -n mkdir -p /music/yt-dlp".to_string(),
                "sudo -n cp '/home/raspberry/My Song.mp3' '/music/yt-dlp/My Song.mp3' \
                 && sudo -n rm '/home/raspberry/My Song.mp3'"
                    .to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_falls_back_when_sudo_missing() {
        let shell = SudoShell::new(127, "bash: sudo: command not found\n", 0);
        let moved = relocator()
            .relocate(&shell, "/tmp/a.mp3", "/music")
            .await
            .unwrap();

        assert_eq!(moved, "/music/a.mp3");
        let commands = shell.commands();
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[1], "mkdir -p /music");
        assert_eq!(commands[3], "cp /tmp/a.mp3 /music/a.mp3 && rm /tmp/a.mp3");
    }

    #[tokio::test]
    async fn test_falls_back_when_password_required() {
        let shell = SudoShell::new(1, "sudo: a password is required\n", 0);
        assert!(relocator()
            .relocate(&shell, "/tmp/a.mp3", "/music")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_privileged_failure_without_escalation_problem() {
        let shell = SudoShell::new(1, "cp: cannot stat '/tmp/a.mp3': No such file\n", 0);
        let err = relocator()
            .relocate(&shell, "/tmp/a.mp3", "/music")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Relocation(ref msg) if msg.contains("cannot stat")));
        assert_eq!(shell.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_unprivileged_failure_is_reported() {
        let shell = SudoShell::new(127, "", 1);
        let err = relocator()
            .relocate(&shell, "/tmp/a.mp3", "/music")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Relocation(ref msg) if msg.contains("exit code 1")));
    }

    #[tokio::test]
    async fn test_already_in_place() {
        let shell = SudoShell::new(0, "", 0);
        let moved = relocator()
            .relocate(&shell, "/music/a.mp3", "/music")
            .await
            .unwrap();
        assert_eq!(moved, "/music/a.mp3");
        assert!(shell.commands().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_directory_source() {
        let shell = SudoShell::new(0, "", 0);
        let err = relocator().relocate(&shell, "/tmp/", "/music").await;
        assert!(matches!(err, Err(Error::Relocation(_))));
    }
}
