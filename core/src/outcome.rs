//! Interpretation of download command output
//!
//! The download tools report progress as free-form text. An
//! [`OutcomeInterpreter`] consumes that text incrementally and, once the
//! command exits, produces a [`Verdict`]: success or failure, the artifact
//! path when the output names one, and an error message otherwise.
//!
//! Memory use is bounded: partial lines are carried up to [`MAX_CARRY`]
//! bytes and only the last [`STDERR_TAIL_LINES`] stderr lines are kept.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::profile::CommandProfile;
use crate::remote::{capture, shell_quote, OutputChunk, RemoteShell};
use crate::types::ServiceType;
use crate::Result;

/// Longest partial line kept between chunks
pub const MAX_CARRY: usize = 8 * 1024;
/// Stderr lines retained for the failure message
pub const STDERR_TAIL_LINES: usize = 5;
const MAX_TAIL_LINE: usize = 500;

/// Default recency window for artifact scans, in minutes
pub const SCAN_WINDOW_MINUTES: u32 = 5;

static EXTRACT_DESTINATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[ExtractAudio\] Destination:\s*(.+?)\s*$").expect("valid regex"));
static ALREADY_DOWNLOADED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[download\]\s+(.+?)\s+has already been downloaded").expect("valid regex")
});
static DOWNLOAD_DESTINATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[download\] Destination:\s*(.+?)\s*$").expect("valid regex"));

/// Completion markers recognised in tool output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Audio extraction finished
    Extracted,
    /// Intermediate file cleaned up
    OriginalDeleted,
    /// Nothing to do, the file exists
    AlreadyDownloaded,
}

impl Marker {
    fn detect(line: &str) -> Option<Self> {
        if line.contains("[ExtractAudio] Destination:") {
            Some(Marker::Extracted)
        } else if line.contains("Deleting original file") {
            Some(Marker::OriginalDeleted)
        } else if line.contains("has already been downloaded") {
            Some(Marker::AlreadyDownloaded)
        } else {
            None
        }
    }
}

/// How strongly a line identifies the produced file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Evidence {
    DownloadDestination,
    AlreadyDownloaded,
    Extracted,
}

/// Policy state, one variant per service type
#[derive(Debug, Clone)]
pub enum OutcomePolicy {
    /// Success iff the exit code is zero
    ExitCode,
    /// Success if a completion marker appeared, else iff the exit code is zero
    Markers {
        extension: String,
        markers: Vec<Marker>,
        artifact: Option<(Evidence, String)>,
    },
}

/// Final reading of one command run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub success: bool,
    pub exit_code: i32,
    /// Absolute artifact path named in the output
    pub artifact: Option<String>,
    /// Failure message, set when `success` is false
    pub error: Option<String>,
}

/// Splits a chunk stream into lines, carrying partial lines across chunks
#[derive(Debug, Default)]
struct LineBuffer {
    carry: String,
}

impl LineBuffer {
    fn push(&mut self, text: &str) -> Vec<String> {
        let mut lines = Vec::new();
        for ch in text.chars() {
            if ch == '\n' || ch == '\r' {
                if !self.carry.is_empty() {
                    lines.push(std::mem::take(&mut self.carry));
                }
            } else {
                self.carry.push(ch);
                if self.carry.len() >= MAX_CARRY {
                    lines.push(std::mem::take(&mut self.carry));
                }
            }
        }
        lines
    }

    fn flush(&mut self) -> Option<String> {
        (!self.carry.is_empty()).then(|| std::mem::take(&mut self.carry))
    }
}

/// Incremental output interpreter for one execution
#[derive(Debug)]
pub struct OutcomeInterpreter {
    policy: OutcomePolicy,
    working_dir: String,
    stdout: LineBuffer,
    stderr: LineBuffer,
    stderr_tail: VecDeque<String>,
}

impl OutcomeInterpreter {
    pub fn new(policy: OutcomePolicy, working_dir: impl Into<String>) -> Self {
        Self {
            policy,
            working_dir: working_dir.into(),
            stdout: LineBuffer::default(),
            stderr: LineBuffer::default(),
            stderr_tail: VecDeque::with_capacity(STDERR_TAIL_LINES),
        }
    }

    /// Interpreter matching how `service_type` reports completion
    ///
    /// Relative paths in the output resolve against `run_dir`.
    pub fn for_service(
        service_type: ServiceType,
        profile: &CommandProfile,
        run_dir: impl Into<String>,
    ) -> Self {
        let policy = match service_type {
            ServiceType::Qobuz => OutcomePolicy::ExitCode,
            ServiceType::Youtube => OutcomePolicy::Markers {
                extension: profile.extension.clone(),
                markers: Vec::new(),
                artifact: None,
            },
        };
        Self::new(policy, run_dir)
    }

    pub fn feed(&mut self, chunk: &OutputChunk) {
        match chunk {
            OutputChunk::Stdout(text) => {
                for line in self.stdout.push(text) {
                    self.observe(&line, false);
                }
            }
            OutputChunk::Stderr(text) => {
                for line in self.stderr.push(text) {
                    self.observe(&line, true);
                }
            }
        }
    }

    /// Completion markers seen so far
    pub fn markers(&self) -> &[Marker] {
        match &self.policy {
            OutcomePolicy::Markers { markers, .. } => markers,
            OutcomePolicy::ExitCode => &[],
        }
    }

    pub fn finish(mut self, exit_code: i32) -> Verdict {
        if let Some(line) = self.stdout.flush() {
            self.observe(&line, false);
        }
        if let Some(line) = self.stderr.flush() {
            self.observe(&line, true);
        }

        let (success, artifact) = match &self.policy {
            OutcomePolicy::ExitCode => (exit_code == 0, None),
            OutcomePolicy::Markers {
                markers, artifact, ..
            } => (
                !markers.is_empty() || exit_code == 0,
                artifact.as_ref().map(|(_, path)| self.resolve(path)),
            ),
        };

        let error = (!success).then(|| self.failure_message(exit_code));
        Verdict {
            success,
            exit_code,
            artifact,
            error,
        }
    }

    fn observe(&mut self, line: &str, is_stderr: bool) {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return;
        }

        if is_stderr {
            if self.stderr_tail.len() == STDERR_TAIL_LINES {
                self.stderr_tail.pop_front();
            }
            self.stderr_tail.push_back(truncate(line.trim(), MAX_TAIL_LINE));
        }

        if let OutcomePolicy::Markers {
            extension,
            markers,
            artifact,
        } = &mut self.policy
        {
            if let Some(marker) = Marker::detect(line) {
                debug!(?marker, "Completion marker seen");
                if !markers.contains(&marker) {
                    markers.push(marker);
                }
            }

            if let Some((evidence, path)) = artifact_evidence(line, extension) {
                let stronger = artifact.as_ref().map_or(true, |(seen, _)| evidence >= *seen);
                if stronger {
                    *artifact = Some((evidence, path));
                }
            }
        }
    }

    fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.working_dir.trim_end_matches('/'),
                path.trim_start_matches("./")
            )
        }
    }

    fn failure_message(&self, exit_code: i32) -> String {
        if self.stderr_tail.is_empty() {
            format!("exit code {}", exit_code)
        } else {
            self.stderr_tail
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

fn artifact_evidence(line: &str, extension: &str) -> Option<(Evidence, String)> {
    if let Some(caps) = EXTRACT_DESTINATION.captures(line) {
        return Some((Evidence::Extracted, caps[1].to_string()));
    }
    if let Some(caps) = ALREADY_DOWNLOADED.captures(line) {
        return Some((Evidence::AlreadyDownloaded, caps[1].to_string()));
    }
    if let Some(caps) = DOWNLOAD_DESTINATION.captures(line) {
        let path = &caps[1];
        if path
            .rsplit_once('.')
            .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(extension))
        {
            return Some((Evidence::DownloadDestination, path.to_string()));
        }
    }
    None
}

fn truncate(line: &str, max: usize) -> String {
    if line.len() <= max {
        return line.to_string();
    }
    let mut end = max;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &line[..end])
}

/// Finds an artifact on the remote host when the output named none
///
/// Only files directly inside `dir` are considered; subdirectories are not
/// searched.
#[derive(Debug, Clone)]
pub struct ArtifactScan {
    pub dir: String,
    pub extension: String,
    pub window_minutes: u32,
}

impl ArtifactScan {
    /// Scan of the directory a job ran in
    pub fn in_run_dir(profile: &CommandProfile, run_dir: impl Into<String>) -> Self {
        Self {
            dir: run_dir.into(),
            extension: profile.extension.clone(),
            window_minutes: SCAN_WINDOW_MINUTES,
        }
    }

    /// Scan recently modified files first, everything only if that is empty
    ///
    /// When several files match, the most recently modified one wins.
    pub async fn locate(&self, shell: &dyn RemoteShell) -> Result<Option<String>> {
        let windowed = self.command(Some(self.window_minutes));
        if let Some(path) = self.newest(shell, &windowed).await? {
            info!(path = %path, "Artifact found by recent-file scan");
            return Ok(Some(path));
        }

        debug!(dir = %self.dir, "Recent-file scan empty, scanning without time window");
        let unrestricted = self.command(None);
        let found = self.newest(shell, &unrestricted).await?;
        if let Some(path) = &found {
            info!(path = %path, "Artifact found by unrestricted scan");
        }
        Ok(found)
    }

    fn command(&self, window: Option<u32>) -> String {
        let mut cmd = format!(
            "find {} -maxdepth 1 -name {} -type f",
            shell_quote(&self.dir),
            shell_quote(&format!("*.{}", self.extension))
        );
        if let Some(minutes) = window {
            cmd.push_str(&format!(" -mmin -{}", minutes));
        }
        cmd.push_str(" -printf '%T@ %p\\n'");
        cmd
    }

    async fn newest(&self, shell: &dyn RemoteShell, command: &str) -> Result<Option<String>> {
        let result = capture(shell, command).await?;
        if !result.success() {
            debug!(
                exit_code = result.exit_code,
                stderr = %result.stderr.trim(),
                "Artifact scan reported errors"
            );
        }
        Ok(newest_entry(&result.lines()))
    }
}

/// Pick the path with the largest `%T@` timestamp from `find -printf` lines
fn newest_entry(lines: &[String]) -> Option<String> {
    lines
        .iter()
        .filter_map(|line| {
            let (stamp, path) = line.split_once(' ')?;
            let stamp = stamp.parse::<f64>().ok()?;
            Some((stamp, path))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, path)| path.to_string())
}
