//! Core job types: identifiers, status machine, snapshots and per-record outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use certdrop_core::RecordError;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Job lifecycle status.
///
/// Transitions only move forward: `Parsing → Processing → {Completed | Error}`.
/// `Parsing → Error` is allowed for jobs that fail before processing starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted; records are being read
    Parsing,
    /// Records are being rendered and dispatched
    Processing,
    /// Archive written and available
    Completed,
    /// A fatal error stopped the job
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Parsing, Processing) | (Parsing, Error) | (Processing, Completed) | (Processing, Error)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Parsing => "parsing",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a job, as returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub total: u64,
    pub processed: u64,
    pub success: u64,
    pub failed: u64,
    pub status: JobStatus,
    /// Where the finished archive can be fetched; only set once `completed`.
    pub archive_location: Option<String>,
    /// Reason for a fatal error, when `status` is `error`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// A freshly accepted job.
    pub fn accepted(id: JobId) -> Self {
        let now = Utc::now();
        Self {
            id,
            total: 0,
            processed: 0,
            success: 0,
            failed: 0,
            status: JobStatus::Parsing,
            archive_location: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.processed)
    }
}

/// Why a single record did not get delivered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordFailure {
    #[error("invalid record: {0}")]
    Invalid(#[from] RecordError),
    #[error("render failed: {0}")]
    Render(String),
    #[error("storing artifact failed: {0}")]
    Storage(String),
    #[error("dispatch failed: {0}")]
    Dispatch(String),
    /// The record's task ended without reporting (panic or cancellation).
    #[error("record task aborted: {0}")]
    Aborted(String),
}

/// Terminal result for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Delivered { file_name: String },
    Failed(RecordFailure),
}

impl RecordOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RecordOutcome::Delivered { .. })
    }
}

/// Shape of a finished run, for callers that await it directly.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Number of groups that were started.
    pub groups: usize,
    /// Number of cooldown pauses taken between groups.
    pub cooldowns: usize,
    /// One entry per record, in completion order within each group.
    pub outcomes: Vec<RecordOutcome>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}
