//! Shared types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// External service a download targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// qobuz-dl; exit code decides success, files land in place
    #[serde(alias = "A", alias = "a")]
    Qobuz,
    /// yt-dlp audio extraction; output markers decide success, file is relocated
    #[serde(alias = "B", alias = "b")]
    Youtube,
}

impl ServiceType {
    pub const ALL: [ServiceType; 2] = [ServiceType::Qobuz, ServiceType::Youtube];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Qobuz => "qobuz",
            ServiceType::Youtube => "youtube",
        }
    }

    /// Human-readable name for notifications
    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceType::Qobuz => "Qobuz",
            ServiceType::Youtube => "YouTube",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "qobuz" | "a" => Ok(ServiceType::Qobuz),
            "youtube" | "b" => Ok(ServiceType::Youtube),
            other => Err(Error::UnsupportedService(format!(
                "'{}' (supported: qobuz, youtube)",
                other
            ))),
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { produced_file: Option<String> },
    Failed { error: String },
}

impl JobOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        JobOutcome::Failed {
            error: error.into(),
        }
    }
}

/// One user-requested download
///
/// Serialized identically for listing, point lookup, and fanout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub url: String,
    pub service_type: ServiceType,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced_file_path: Option<String>,
}

impl Job {
    /// Create a pending job
    pub fn new(id: impl Into<String>, url: impl Into<String>, service_type: ServiceType) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            service_type,
            status: JobStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            error: None,
            produced_file_path: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a terminal outcome; only valid once, from pending
    pub fn finish(&mut self, outcome: JobOutcome) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "job {} is already {}",
                self.id, self.status
            )));
        }

        match outcome {
            JobOutcome::Completed { produced_file } => {
                self.status = JobStatus::Completed;
                self.produced_file_path = produced_file;
            }
            JobOutcome::Failed { error } => {
                self.status = JobStatus::Failed;
                self.error = Some(error);
            }
        }
        self.end_time = Some(Utc::now());
        Ok(())
    }
}
