use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskqueue_core::{Checkpoint, Outcome, Payload, Task, TaskResult, TaskStatus};

use crate::error::StoreResult;

/// Why a `SubmitResult`/`SaveCheckpoint` call was rejected. §4.3/§4.4 of
/// the spec: the caller's precondition failed, never a transient error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TaskNotFound,
    NotInProgress,
    NotOwner,
    LeaseExpired,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::TaskNotFound => "task not found",
            RejectReason::NotInProgress => "task is not in progress",
            RejectReason::NotOwner => "caller does not own the task's lease",
            RejectReason::LeaseExpired => "lease has expired",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a lease-guarded write (`SubmitResult`, `SaveCheckpoint`).
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseWrite<T> {
    Ack(T),
    Reject(RejectReason),
}

/// What `ClaimTask` returns: a task plus its most recent checkpoint, or
/// nothing if the queue had no pending work.
pub type ClaimOutcome = Option<(Task, Option<Checkpoint>)>;

/// Aggregate counts backing the `Stats` operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub tasks_by_status: HashMap<TaskStatus, u64>,
    pub workers_alive: u64,
    pub workers_dead: u64,
}

/// What one monitor tick did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorReport {
    pub newly_dead_workers: Vec<String>,
    pub reclaimed_tasks: Vec<i64>,
}

/// The durable store's contract (§2, §3, §4 of the spec).
///
/// Every mutation here corresponds to exactly one store transaction; the
/// store, not an in-process lock, is the synchronization point across
/// workers. Implementations must honor I1-I5 across a crash at any point
/// between calls.
#[async_trait]
pub trait Store: Send + Sync {
    async fn submit_task(&self, task_type: &str, payload: Payload, now: DateTime<Utc>) -> StoreResult<i64>;

    async fn claim_task(
        &self,
        worker_id: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome>;

    async fn submit_result(
        &self,
        worker_id: &str,
        task_id: i64,
        outcome: Outcome,
        result: Payload,
        now: DateTime<Utc>,
    ) -> StoreResult<LeaseWrite<()>>;

    async fn save_checkpoint(
        &self,
        worker_id: &str,
        task_id: i64,
        state: Payload,
        elapsed_ms: u64,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<LeaseWrite<DateTime<Utc>>>;

    async fn heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> StoreResult<()>;

    async fn get_task(&self, task_id: i64) -> StoreResult<Option<Task>>;

    /// Reads back the terminal record written by `submit_result` (I3: a
    /// result exists iff the task's status is `completed` or `failed`).
    async fn get_result(&self, task_id: i64) -> StoreResult<Option<TaskResult>>;

    async fn stats(&self) -> StoreResult<StoreStats>;

    /// Runs one dead-worker sweep + lease reclaim pass (§4.6). Sweep must
    /// happen before reclaim within the same call.
    async fn run_monitor_tick(
        &self,
        worker_dead_after: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<MonitorReport>;
}
