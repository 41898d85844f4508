//! In-memory [`Store`] for tests that don't need a real file on disk.
//!
//! Mirrors the SQLite backend's transactional semantics (every operation
//! takes the one lock, reads and writes under it, releases it) without the
//! engine underneath. Useful for coordinator/worker unit tests that want to
//! assert on specific claim orderings without the overhead of a DB file.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskqueue_core::{Checkpoint, Outcome, Payload, Task, TaskResult, TaskStatus};
use tracing::debug;

use crate::error::StoreResult;
use crate::store::{ClaimOutcome, LeaseWrite, MonitorReport, RejectReason, Store, StoreStats};

#[derive(Debug, Clone, PartialEq, Eq)]
enum WorkerState {
    Alive,
    Dead,
}

#[derive(Debug)]
struct WorkerRow {
    last_heartbeat_at: DateTime<Utc>,
    state: WorkerState,
}

#[derive(Debug, Default)]
struct InMemoryTaskDb {
    next_task_id: i64,
    tasks: HashMap<i64, Task>,
    results: HashMap<i64, TaskResult>,
    checkpoints: HashMap<i64, Vec<Checkpoint>>,
    workers: HashMap<String, WorkerRow>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    db: Mutex<InMemoryTaskDb>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn submit_task(&self, task_type: &str, payload: Payload, now: DateTime<Utc>) -> StoreResult<i64> {
        let mut db = self.db.lock().unwrap();
        db.next_task_id += 1;
        let task_id = db.next_task_id;
        debug!(task_id, task_type, "submitting task");
        db.tasks.insert(
            task_id,
            Task {
                task_id,
                task_type: task_type.to_string(),
                payload,
                status: TaskStatus::Pending,
                assigned_worker: None,
                lease_expires_at: None,
                attempts: 0,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(task_id)
    }

    async fn claim_task(
        &self,
        worker_id: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome> {
        let mut db = self.db.lock().unwrap();
        db.workers
            .entry(worker_id.to_string())
            .and_modify(|w| {
                w.last_heartbeat_at = now;
                w.state = WorkerState::Alive;
            })
            .or_insert(WorkerRow { last_heartbeat_at: now, state: WorkerState::Alive });

        let task_id = db
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.task_id)
            .min();

        let Some(task_id) = task_id else {
            return Ok(None);
        };

        let lease_expires_at = now
            + chrono::Duration::from_std(lease_duration)
                .map_err(|e| crate::error::StoreError::Invariant(e.to_string()))?;

        let task = {
            let task = db.tasks.get_mut(&task_id).unwrap();
            task.status = TaskStatus::InProgress;
            task.assigned_worker = Some(worker_id.to_string());
            task.lease_expires_at = Some(lease_expires_at);
            task.attempts += 1;
            task.updated_at = now;
            task.clone()
        };

        let checkpoint = db.checkpoints.get(&task_id).and_then(|cps| cps.last().cloned());
        debug!(task_id, worker_id, attempts = task.attempts, "claimed task");
        Ok(Some((task, checkpoint)))
    }

    async fn submit_result(
        &self,
        worker_id: &str,
        task_id: i64,
        outcome: Outcome,
        result: Payload,
        now: DateTime<Utc>,
    ) -> StoreResult<LeaseWrite<()>> {
        let mut db = self.db.lock().unwrap();
        let Some(task) = db.tasks.get_mut(&task_id) else {
            return Ok(LeaseWrite::Reject(RejectReason::TaskNotFound));
        };
        if task.status != TaskStatus::InProgress {
            return Ok(LeaseWrite::Reject(RejectReason::NotInProgress));
        }
        if task.assigned_worker.as_deref() != Some(worker_id) {
            return Ok(LeaseWrite::Reject(RejectReason::NotOwner));
        }
        if task.lease_expires_at.map(|exp| exp < now).unwrap_or(true) {
            return Ok(LeaseWrite::Reject(RejectReason::LeaseExpired));
        }

        task.status = outcome.into();
        task.updated_at = now;
        db.results.insert(
            task_id,
            TaskResult { task_id, outcome, result, worker_id: worker_id.to_string(), created_at: now },
        );
        db.checkpoints.remove(&task_id);
        Ok(LeaseWrite::Ack(()))
    }

    async fn save_checkpoint(
        &self,
        worker_id: &str,
        task_id: i64,
        state: Payload,
        elapsed_ms: u64,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<LeaseWrite<DateTime<Utc>>> {
        let mut db = self.db.lock().unwrap();
        let Some(task) = db.tasks.get(&task_id) else {
            return Ok(LeaseWrite::Reject(RejectReason::TaskNotFound));
        };
        if task.status != TaskStatus::InProgress {
            return Ok(LeaseWrite::Reject(RejectReason::NotInProgress));
        }
        if task.assigned_worker.as_deref() != Some(worker_id) {
            return Ok(LeaseWrite::Reject(RejectReason::NotOwner));
        }
        if task.lease_expires_at.map(|exp| exp < now).unwrap_or(true) {
            return Ok(LeaseWrite::Reject(RejectReason::LeaseExpired));
        }

        let lease_expires_at = now
            + chrono::Duration::from_std(lease_duration)
                .map_err(|e| crate::error::StoreError::Invariant(e.to_string()))?;

        let seq = db.checkpoints.get(&task_id).and_then(|cps| cps.last()).map(|c| c.seq + 1).unwrap_or(0);
        db.checkpoints.entry(task_id).or_default().push(Checkpoint {
            task_id,
            seq,
            state,
            elapsed_ms,
            created_at: now,
        });

        let task = db.tasks.get_mut(&task_id).unwrap();
        task.lease_expires_at = Some(lease_expires_at);
        task.updated_at = now;

        Ok(LeaseWrite::Ack(lease_expires_at))
    }

    async fn heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let mut db = self.db.lock().unwrap();
        db.workers
            .entry(worker_id.to_string())
            .and_modify(|w| {
                w.last_heartbeat_at = now;
                w.state = WorkerState::Alive;
            })
            .or_insert(WorkerRow { last_heartbeat_at: now, state: WorkerState::Alive });
        Ok(())
    }

    async fn get_task(&self, task_id: i64) -> StoreResult<Option<Task>> {
        let db = self.db.lock().unwrap();
        Ok(db.tasks.get(&task_id).cloned())
    }

    async fn get_result(&self, task_id: i64) -> StoreResult<Option<TaskResult>> {
        let db = self.db.lock().unwrap();
        Ok(db.results.get(&task_id).cloned())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let db = self.db.lock().unwrap();
        let mut stats = StoreStats::default();
        for task in db.tasks.values() {
            *stats.tasks_by_status.entry(task.status).or_insert(0) += 1;
        }
        for worker in db.workers.values() {
            match worker.state {
                WorkerState::Alive => stats.workers_alive += 1,
                WorkerState::Dead => stats.workers_dead += 1,
            }
        }
        Ok(stats)
    }

    async fn run_monitor_tick(
        &self,
        worker_dead_after: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<MonitorReport> {
        let mut db = self.db.lock().unwrap();
        let mut report = MonitorReport::default();

        let dead_cutoff = now
            - chrono::Duration::from_std(worker_dead_after)
                .map_err(|e| crate::error::StoreError::Invariant(e.to_string()))?;

        for (worker_id, worker) in db.workers.iter_mut() {
            if worker.state == WorkerState::Alive && worker.last_heartbeat_at < dead_cutoff {
                worker.state = WorkerState::Dead;
                report.newly_dead_workers.push(worker_id.clone());
            }
        }

        let dead_workers: std::collections::HashSet<String> = db
            .workers
            .iter()
            .filter(|(_, w)| w.state == WorkerState::Dead)
            .map(|(id, _)| id.clone())
            .collect();

        for task in db.tasks.values_mut() {
            if task.status != TaskStatus::InProgress {
                continue;
            }
            let lease_expired = task.lease_expires_at.map(|exp| exp < now).unwrap_or(true);
            let worker_dead = task
                .assigned_worker
                .as_deref()
                .map(|w| dead_workers.contains(w))
                .unwrap_or(true);
            if lease_expired || worker_dead {
                task.status = TaskStatus::Pending;
                task.assigned_worker = None;
                task.lease_expires_at = None;
                task.updated_at = now;
                report.reclaimed_tasks.push(task.task_id);
            }
        }
        report.reclaimed_tasks.sort_unstable();

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claims_in_fifo_order() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let first = store.submit_task("prime", Payload(vec![]), now).await.unwrap();
        let second = store.submit_task("prime", Payload(vec![]), now).await.unwrap();

        let (claimed, _) = store
            .claim_task("worker-1", Duration::from_secs(30), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.task_id, first);

        let (claimed, _) = store
            .claim_task("worker-1", Duration::from_secs(30), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.task_id, second);
    }

    #[tokio::test]
    async fn get_result_returns_the_submitted_outcome_and_blob() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.submit_task("prime", Payload(vec![]), now).await.unwrap();
        store.claim_task("worker-1", Duration::from_secs(30), now).await.unwrap();
        assert!(store.get_result(1).await.unwrap().is_none());

        store
            .submit_result("worker-1", 1, Outcome::Failed, Payload(vec![1, 6, 8]), now)
            .await
            .unwrap();

        let result = store.get_result(1).await.unwrap().expect("result should be readable once terminal");
        assert_eq!(result.outcome, Outcome::Failed);
        assert_eq!(result.result, Payload(vec![1, 6, 8]));
        assert_eq!(result.worker_id, "worker-1");
    }

    #[tokio::test]
    async fn submit_result_at_the_exact_lease_boundary_is_rejected() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.submit_task("prime", Payload(vec![]), now).await.unwrap();
        let (task, _) = store
            .claim_task("worker-1", Duration::from_secs(30), now)
            .await
            .unwrap()
            .unwrap();

        let outcome = store
            .submit_result("worker-1", 1, Outcome::Success, Payload(vec![]), task.lease_expires_at.unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, LeaseWrite::Reject(RejectReason::LeaseExpired));
    }

    #[tokio::test]
    async fn checkpoint_survives_reclaim_for_the_next_claimant() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.submit_task("prime", Payload(vec![]), now).await.unwrap();
        store.claim_task("worker-1", Duration::from_secs(1), now).await.unwrap();
        store
            .save_checkpoint("worker-1", 1, Payload(vec![7]), 500, Duration::from_secs(1), now)
            .await
            .unwrap();

        let later = now + chrono::Duration::seconds(10);
        let report = store.run_monitor_tick(Duration::from_secs(3600), later).await.unwrap();
        assert_eq!(report.reclaimed_tasks, vec![1]);

        let (_, checkpoint) = store
            .claim_task("worker-2", Duration::from_secs(30), later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.unwrap().state, Payload(vec![7]));
    }
}
