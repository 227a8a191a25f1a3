//! Download execution
//!
//! Runs one job's download command on the shared remote session, streams its
//! output through an [`OutcomeInterpreter`], and relocates the produced file
//! for profiles that need it. Every failure after this point is folded into
//! the returned [`JobOutcome`].

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::outcome::{ArtifactScan, OutcomeInterpreter};
use crate::profile::{CommandProfile, ProfileSet};
use crate::relocate::FileRelocator;
use crate::remote::{capture, shell_quote, OutputChunk, RemoteShell};
use crate::session::SessionManager;
use crate::types::{Job, JobOutcome};
use crate::Result;

/// Capacity of the per-execution output channel
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Executes download jobs on the remote host
pub struct DownloadExecutor {
    sessions: Arc<SessionManager>,
    profiles: ProfileSet,
    relocator: FileRelocator,
}

impl DownloadExecutor {
    pub fn new(sessions: Arc<SessionManager>, profiles: ProfileSet, relocator: FileRelocator) -> Self {
        Self {
            sessions,
            profiles,
            relocator,
        }
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Run `job` to a terminal outcome
    #[instrument(skip(self, job), fields(job_id = %job.id, service = %job.service_type))]
    pub async fn run(&self, job: &Job) -> JobOutcome {
        match self.execute(job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Download failed before completion");
                JobOutcome::failed(e.to_string())
            }
        }
    }

    async fn execute(&self, job: &Job) -> Result<JobOutcome> {
        let profile = self.profiles.get(job.service_type);
        let shell = self.sessions.acquire().await?;

        let run_dir = profile.run_dir(&job.id);
        let command = profile.command_for(&job.url, &job.id);
        info!(command = %command, "Running download command");

        let interpreter = OutcomeInterpreter::for_service(job.service_type, profile, run_dir.clone());
        let (tx, mut rx) = mpsc::channel::<OutputChunk>(OUTPUT_CHANNEL_CAPACITY);

        let consume = async move {
            let mut interpreter = interpreter;
            while let Some(chunk) = rx.recv().await {
                match &chunk {
                    OutputChunk::Stdout(text) => debug!(stream = "stdout", "{}", text.trim_end()),
                    OutputChunk::Stderr(text) => debug!(stream = "stderr", "{}", text.trim_end()),
                }
                interpreter.feed(&chunk);
            }
            interpreter
        };

        let (exit_code, interpreter) = tokio::join!(shell.exec(&command, tx), consume);
        let exit_code = exit_code?;
        let verdict = interpreter.finish(exit_code);

        if !verdict.success {
            let message = verdict
                .error
                .unwrap_or_else(|| format!("exit code {}", exit_code));
            warn!(exit_code, error = %message, "Download command failed");
            return Ok(JobOutcome::failed(message));
        }

        info!(exit_code, artifact = ?verdict.artifact, "Download command succeeded");

        if !profile.relocate {
            return Ok(JobOutcome::Completed {
                produced_file: verdict.artifact,
            });
        }

        let produced_file = self
            .relocate_artifact(shell.as_ref(), profile, &run_dir, verdict.artifact)
            .await;
        Ok(JobOutcome::Completed { produced_file })
    }

    /// Locate and move the artifact; problems here never fail the job
    async fn relocate_artifact(
        &self,
        shell: &dyn RemoteShell,
        profile: &CommandProfile,
        run_dir: &str,
        named: Option<String>,
    ) -> Option<String> {
        let source = match named {
            Some(path) => path,
            None => match ArtifactScan::in_run_dir(profile, run_dir).locate(shell).await {
                Ok(Some(path)) => path,
                Ok(None) => {
                    warn!(dir = %run_dir, "No artifact found to relocate");
                    return None;
                }
                Err(e) => {
                    warn!(error = %e, "Artifact scan failed");
                    return None;
                }
            },
        };

        match self
            .relocator
            .relocate(shell, &source, &profile.working_dir)
            .await
        {
            Ok(moved) => {
                remove_run_dir(shell, run_dir).await;
                Some(moved)
            }
            Err(e) => {
                warn!(source = %source, error = %e, "Relocation failed, job outcome unchanged");
                Some(source)
            }
        }
    }
}

/// Drop the emptied per-job directory; leftovers keep it in place
async fn remove_run_dir(shell: &dyn RemoteShell, run_dir: &str) {
    match capture(shell, &format!("rmdir {}", shell_quote(run_dir))).await {
        Ok(result) if result.success() => debug!(dir = %run_dir, "Removed job directory"),
        Ok(result) => debug!(
            dir = %run_dir,
            stderr = %result.stderr.trim(),
            "Job directory not removed"
        ),
        Err(e) => debug!(dir = %run_dir, error = %e, "Job directory not removed"),
    }
}
