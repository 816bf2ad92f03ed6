//! Job entity: one queued request to scrape one Site.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of run a Job represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Full,
    Incremental,
    Test,
}

/// A Job's lifecycle is a strict state machine: transitions are monotone
/// except `pending -> cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether `self -> next` is a legal transition under I1.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use JobStatus::{Cancelled, Completed, Failed, Pending, Running};
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Pending) // requeue after a retryable failure
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One queued request to scrape one Site, with a lifecycle and terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub site_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    /// `1..=10`, higher runs first.
    pub priority: i16,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub stats: serde_json::Value,
    pub retry_count: i32,
    pub max_retries: i32,
    pub worker_id: Option<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Observed at safe checkpoints by a running worker (§5 cancellation).
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::JobStatus::{Cancelled, Completed, Failed, Pending, Running};

    #[test]
    fn cancel_only_from_pending_or_running() {
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Failed.can_transition_to(Cancelled));
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Running.is_terminal());
    }
}
