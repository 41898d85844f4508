use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::Payload;

/// Lifecycle state of a [`Task`].
///
/// ```text
///  ______________________________
/// | Status code  | Desc         |
/// |______________|______________|
/// |     0        | Completed    |
/// |   100        | Pending      |
/// |   200        | In progress  |
/// |  -100        | Failed       |
/// |______________|______________|
/// ```
///
/// Convention follows the teacher lineage's status-code tables: zero for
/// the terminal success state, positive for non-terminal, negative for
/// terminal failure. The wire format uses the lower-case name, not the
/// code; the code is only used internally for ordering in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn code(self) -> i32 {
        match self {
            TaskStatus::Completed => 0,
            TaskStatus::Pending => 100,
            TaskStatus::InProgress => 200,
            TaskStatus::Failed => -100,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The outcome a worker reports when submitting a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
}

impl From<Outcome> for TaskStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => TaskStatus::Completed,
            Outcome::Failed => TaskStatus::Failed,
        }
    }
}

/// A unit of work, as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub task_id: i64,
    pub task_type: String,
    pub payload: Payload,
    pub status: TaskStatus,
    pub assigned_worker: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The final record of a task's execution. At most one exists per task,
/// written atomically with the `Task`'s transition to a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskResult {
    pub task_id: i64,
    pub outcome: Outcome,
    pub result: Payload,
    pub worker_id: String,
    pub created_at: DateTime<Utc>,
}

/// Executor-supplied intermediate progress for a long-running task. Only
/// the highest `seq` per task is semantically meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Checkpoint {
    pub task_id: i64,
    pub seq: u32,
    pub state: Payload,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Liveness of a worker, as tracked by the coordinator's dead-worker sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Alive,
    Dead,
}

/// A worker registration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Worker {
    pub worker_id: String,
    pub last_heartbeat_at: DateTime<Utc>,
    pub status: WorkerStatus,
}
