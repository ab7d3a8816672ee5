use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

/// Opaque job identifier, unique for the lifetime of a registry.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Initializing,
    Running,
    GeneratingReport,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::GeneratingReport => "generating_report",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether a worker may still be operating on the job.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initializing | Self::Running | Self::GeneratingReport)
    }

    pub fn is_terminal(&self) -> bool { !self.is_active() }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initializing => "Initializing",
            Self::Running => "Running",
            Self::GeneratingReport => "Generating report",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Html,
    Csv,
}

impl OutputFormat {
    pub const fn variants() -> &'static [Self] { &[Self::Html, Self::Csv] }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Csv => "csv",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "csv" => Ok(Self::Csv),
            _ => Err(()),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Html => "HTML",
            Self::Csv => "CSV",
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    /// Pull request authored by the user.
    PullRequestEvent,
    /// Pull request reviewed by the user.
    PullRequestReviewEvent,
    /// Pull request the user commented on.
    IssueCommentEvent,
}

impl ActivityKind {
    pub const fn variants() -> &'static [Self] {
        &[Self::PullRequestEvent, Self::PullRequestReviewEvent, Self::IssueCommentEvent]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PullRequestEvent => "PullRequestEvent",
            Self::PullRequestReviewEvent => "PullRequestReviewEvent",
            Self::IssueCommentEvent => "IssueCommentEvent",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::PullRequestEvent => "Pull request",
            Self::PullRequestReviewEvent => "Review",
            Self::IssueCommentEvent => "Comment",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A single GitHub event attributed to one user.
///
/// Field order is the CSV column order.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub user: String,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub state: String,
    pub comments: u32,
    pub url: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    pub users: Vec<String>,
    pub organization: Option<String>,
    pub date_from: Date,
    pub date_to: Date,
    pub output_format: OutputFormat,
    /// Requested concurrency, 0 for automatic.
    pub max_workers: usize,
    /// Masked token suffix, e.g. `***abcd`.
    pub token_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub owner: String,
    pub parameters: JobParameters,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub processed_users: usize,
    pub total_users: usize,
    pub current_user: Option<String>,
    pub activities: Vec<Activity>,
    pub errors: Vec<String>,
    /// Main report file, relative to the job's report directory.
    pub report_file: Option<String>,
    pub report_path: Option<PathBuf>,
}

impl JobRecord {
    pub fn new(id: JobId, owner: String, parameters: JobParameters) -> Self {
        let total_users = parameters.users.len();
        Self {
            id,
            owner,
            parameters,
            status: JobStatus::Initializing,
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
            processed_users: 0,
            total_users,
            current_user: None,
            activities: Vec::new(),
            errors: Vec::new(),
            report_file: None,
            report_path: None,
        }
    }

    pub fn progress_percent(&self) -> f32 {
        if self.total_users == 0 {
            return 100.0;
        }
        self.processed_users as f32 / self.total_users as f32 * 100.0
    }

    pub fn elapsed(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(OffsetDateTime::now_utc);
        Duration::try_from(end - self.started_at).unwrap_or_default()
    }
}
