//! SQLite-backed [`Store`].
//!
//! ```text
//!  ____________________________________________________________________
//! | tasks                                                              |
//! |____________________________________________________________________|
//! | task_id | task_type | payload | status | assigned_worker | attempts |
//! |_________|___________|_________|________|_________________|__________|
//!
//!  ________________________________________     ___________________________
//! | results (one row per terminal task)  |     | checkpoints (many per task)|
//! |_______________________________________|     |____________________________|
//! | task_id | outcome | result | worker_id |     | task_id | seq | state    |
//! |_________|_________|________|___________|     |_________|_____|__________|
//!
//!  ___________________________________
//! | workers                          |
//! |___________________________________|
//! | worker_id | last_heartbeat_at | status |
//! |___________|___________________|________|
//! ```
//!
//! `task_id` is the SQLite rowid (`INTEGER PRIMARY KEY`), so `last_insert_rowid`
//! after an insert is exactly the new task's id. Unlike the schema this one is
//! descended from, there's a single row per task to update in place, so no
//! view-plus-trigger indirection is needed to work around `rusqlite` only
//! preparing the first statement of a batch.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use tokio::sync::Mutex;

use async_trait::async_trait;
use taskqueue_core::{Checkpoint, Outcome, Payload, Task, TaskResult, TaskStatus};

use crate::error::{StoreError, StoreResult};
use crate::store::{ClaimOutcome, LeaseWrite, MonitorReport, RejectReason, Store, StoreStats};

/// Durable store backed by a single SQLite connection.
///
/// SQLite is single-writer regardless of how many connections you open, so
/// there is no benefit to a connection pool here; a tokio mutex around one
/// connection gives every operation above a serialization point that
/// matches what the store's transactional guarantees already require.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open_or_create(path: &Path) -> StoreResult<Self> {
        let fresh = !path.exists();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.pragma_update(None, "locking_mode", "EXCLUSIVE")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        if fresh {
            Self::create_tables(&conn)?;
        }
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-process, file-backed store for tests that need a real SQLite
    /// engine (e.g. to exercise the schema) without a named file on disk.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Self::create_tables(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn create_tables(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE tasks(
              task_id INTEGER PRIMARY KEY AUTOINCREMENT,
              task_type TEXT NOT NULL,
              payload BLOB NOT NULL,
              status TEXT NOT NULL,
              assigned_worker TEXT,
              lease_expires_at TEXT,
              attempts INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );
            CREATE INDEX idx_tasks_status ON tasks(status);
            CREATE INDEX idx_tasks_lease_expires_at ON tasks(lease_expires_at);

            CREATE TABLE results(
              task_id INTEGER UNIQUE NOT NULL PRIMARY KEY,
              outcome TEXT NOT NULL,
              result BLOB NOT NULL,
              worker_id TEXT NOT NULL,
              created_at TEXT NOT NULL,
              FOREIGN KEY(task_id) REFERENCES tasks(task_id)
            );

            CREATE TABLE checkpoints(
              task_id INTEGER NOT NULL,
              seq INTEGER NOT NULL,
              state BLOB NOT NULL,
              elapsed_ms INTEGER NOT NULL,
              created_at TEXT NOT NULL,
              PRIMARY KEY(task_id, seq),
              FOREIGN KEY(task_id) REFERENCES tasks(task_id)
            );

            CREATE TABLE workers(
              worker_id TEXT UNIQUE NOT NULL PRIMARY KEY,
              last_heartbeat_at TEXT NOT NULL,
              status TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> StoreResult<TaskStatus> {
    match s {
        "pending" => Ok(TaskStatus::Pending),
        "in_progress" => Ok(TaskStatus::InProgress),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        other => Err(StoreError::Invariant(format!("unknown task status {other:?} in row"))),
    }
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let payload: Vec<u8> = row.get("payload")?;
    Ok(Task {
        task_id: row.get("task_id")?,
        task_type: row.get("task_type")?,
        payload: Payload(payload),
        status: status_from_str(&status).unwrap_or(TaskStatus::Pending),
        assigned_worker: row.get("assigned_worker")?,
        lease_expires_at: row.get("lease_expires_at")?,
        attempts: row.get("attempts")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn submit_task(&self, task_type: &str, payload: Payload, now: DateTime<Utc>) -> StoreResult<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tasks (task_type, payload, status, attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![task_type, payload.as_bytes(), status_str(TaskStatus::Pending), now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn claim_task(
        &self,
        worker_id: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO workers (worker_id, last_heartbeat_at, status)
             VALUES (?1, ?2, 'alive')
             ON CONFLICT(worker_id) DO UPDATE SET last_heartbeat_at = ?2, status = 'alive'",
            params![worker_id, now],
        )?;

        let task_id: Option<i64> = tx
            .query_row(
                "SELECT task_id FROM tasks WHERE status = 'pending' ORDER BY task_id ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some(task_id) = task_id else {
            tx.commit()?;
            return Ok(None);
        };

        let lease_expires_at = now + chrono::Duration::from_std(lease_duration)
            .map_err(|e| StoreError::Invariant(e.to_string()))?;

        tx.execute(
            "UPDATE tasks
             SET status = 'in_progress', assigned_worker = ?1, lease_expires_at = ?2,
                 attempts = attempts + 1, updated_at = ?3
             WHERE task_id = ?4",
            params![worker_id, lease_expires_at, now, task_id],
        )?;

        let task = tx.query_row(
            "SELECT * FROM tasks WHERE task_id = ?1",
            params![task_id],
            row_to_task,
        )?;

        let checkpoint = tx
            .query_row(
                "SELECT task_id, seq, state, elapsed_ms, created_at FROM checkpoints
                 WHERE task_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![task_id],
                |row| {
                    let state: Vec<u8> = row.get("state")?;
                    Ok(Some(Checkpoint {
                        task_id: row.get("task_id")?,
                        seq: row.get("seq")?,
                        state: Payload(state),
                        elapsed_ms: row.get("elapsed_ms")?,
                        created_at: row.get("created_at")?,
                    }))
                },
            )
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        tx.commit()?;
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
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let current = tx
            .query_row("SELECT * FROM tasks WHERE task_id = ?1", params![task_id], row_to_task);
        let current = match current {
            Ok(t) => t,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                tx.commit()?;
                return Ok(LeaseWrite::Reject(RejectReason::TaskNotFound));
            }
            Err(e) => return Err(e.into()),
        };

        if current.status != TaskStatus::InProgress {
            tx.commit()?;
            return Ok(LeaseWrite::Reject(RejectReason::NotInProgress));
        }
        if current.assigned_worker.as_deref() != Some(worker_id) {
            tx.commit()?;
            return Ok(LeaseWrite::Reject(RejectReason::NotOwner));
        }
        if current.lease_expires_at.map(|exp| exp < now).unwrap_or(true) {
            tx.commit()?;
            return Ok(LeaseWrite::Reject(RejectReason::LeaseExpired));
        }

        let new_status: TaskStatus = outcome.into();
        let outcome_str = match outcome {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
        };

        tx.execute(
            "INSERT INTO results (task_id, outcome, result, worker_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![task_id, outcome_str, result.as_bytes(), worker_id, now],
        )?;
        tx.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE task_id = ?3",
            params![status_str(new_status), now, task_id],
        )?;
        tx.execute("DELETE FROM checkpoints WHERE task_id = ?1", params![task_id])?;

        tx.commit()?;
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
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let current = tx
            .query_row("SELECT * FROM tasks WHERE task_id = ?1", params![task_id], row_to_task);
        let current = match current {
            Ok(t) => t,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                tx.commit()?;
                return Ok(LeaseWrite::Reject(RejectReason::TaskNotFound));
            }
            Err(e) => return Err(e.into()),
        };

        if current.status != TaskStatus::InProgress {
            tx.commit()?;
            return Ok(LeaseWrite::Reject(RejectReason::NotInProgress));
        }
        if current.assigned_worker.as_deref() != Some(worker_id) {
            tx.commit()?;
            return Ok(LeaseWrite::Reject(RejectReason::NotOwner));
        }
        if current.lease_expires_at.map(|exp| exp < now).unwrap_or(true) {
            tx.commit()?;
            return Ok(LeaseWrite::Reject(RejectReason::LeaseExpired));
        }

        let next_seq: u32 = tx.query_row(
            "SELECT COALESCE(MAX(seq), -1) + 1 FROM checkpoints WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO checkpoints (task_id, seq, state, elapsed_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![task_id, next_seq, state.as_bytes(), elapsed_ms, now],
        )?;

        let lease_expires_at = now + chrono::Duration::from_std(lease_duration)
            .map_err(|e| StoreError::Invariant(e.to_string()))?;
        tx.execute(
            "UPDATE tasks SET lease_expires_at = ?1, updated_at = ?2 WHERE task_id = ?3",
            params![lease_expires_at, now, task_id],
        )?;

        tx.commit()?;
        Ok(LeaseWrite::Ack(lease_expires_at))
    }

    async fn heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO workers (worker_id, last_heartbeat_at, status)
             VALUES (?1, ?2, 'alive')
             ON CONFLICT(worker_id) DO UPDATE SET last_heartbeat_at = ?2, status = 'alive'",
            params![worker_id, now],
        )?;
        Ok(())
    }

    async fn get_task(&self, task_id: i64) -> StoreResult<Option<Task>> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM tasks WHERE task_id = ?1", params![task_id], row_to_task)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other.into()),
            })
    }

    async fn get_result(&self, task_id: i64) -> StoreResult<Option<TaskResult>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT task_id, outcome, result, worker_id, created_at FROM results WHERE task_id = ?1",
            params![task_id],
            |row| {
                let outcome_str: String = row.get("outcome")?;
                let result: Vec<u8> = row.get("result")?;
                let outcome = match outcome_str.as_str() {
                    "success" => Outcome::Success,
                    _ => Outcome::Failed,
                };
                Ok(TaskResult {
                    task_id: row.get("task_id")?,
                    outcome,
                    result: Payload(result),
                    worker_id: row.get("worker_id")?,
                    created_at: row.get("created_at")?,
                })
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let conn = self.conn.lock().await;
        let mut stats = StoreStats::default();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: u64 = row.get(1)?;
            stats.tasks_by_status.insert(status_from_str(&status)?, count);
        }
        drop(rows);
        drop(stmt);

        stats.workers_alive = conn.query_row(
            "SELECT COUNT(*) FROM workers WHERE status = 'alive'",
            [],
            |row| row.get(0),
        )?;
        stats.workers_dead = conn.query_row(
            "SELECT COUNT(*) FROM workers WHERE status = 'dead'",
            [],
            |row| row.get(0),
        )?;

        Ok(stats)
    }

    async fn run_monitor_tick(
        &self,
        worker_dead_after: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<MonitorReport> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut report = MonitorReport::default();

        let dead_cutoff = now - chrono::Duration::from_std(worker_dead_after)
            .map_err(|e| StoreError::Invariant(e.to_string()))?;

        {
            let mut stmt = tx.prepare(
                "SELECT worker_id FROM workers WHERE status = 'alive' AND last_heartbeat_at < ?1",
            )?;
            let mut rows = stmt.query(params![dead_cutoff])?;
            while let Some(row) = rows.next()? {
                report.newly_dead_workers.push(row.get(0)?);
            }
        }
        if !report.newly_dead_workers.is_empty() {
            tx.execute(
                "UPDATE workers SET status = 'dead' WHERE status = 'alive' AND last_heartbeat_at < ?1",
                params![dead_cutoff],
            )?;
        }

        {
            let mut stmt = tx.prepare(
                "SELECT t.task_id FROM tasks t
                 LEFT JOIN workers w ON w.worker_id = t.assigned_worker
                 WHERE t.status = 'in_progress'
                   AND (t.lease_expires_at < ?1 OR w.status = 'dead' OR w.worker_id IS NULL)",
            )?;
            let mut rows = stmt.query(params![now])?;
            while let Some(row) = rows.next()? {
                report.reclaimed_tasks.push(row.get(0)?);
            }
        }
        if !report.reclaimed_tasks.is_empty() {
            tx.execute(
                "UPDATE tasks SET status = 'pending', assigned_worker = NULL, lease_expires_at = NULL, updated_at = ?1
                 WHERE task_id IN (
                   SELECT t.task_id FROM tasks t
                   LEFT JOIN workers w ON w.worker_id = t.assigned_worker
                   WHERE t.status = 'in_progress'
                     AND (t.lease_expires_at < ?1 OR w.status = 'dead' OR w.worker_id IS NULL)
                 )",
                params![now],
            )?;
        }

        tx.commit()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn submit_then_claim_round_trips_payload() {
        let store = store();
        let now = Utc::now();
        let task_id = store
            .submit_task("prime", Payload(vec![1, 2, 3]), now)
            .await
            .unwrap();

        let (task, checkpoint) = store
            .claim_task("worker-1", Duration::from_secs(30), now)
            .await
            .unwrap()
            .expect("a pending task should be claimable");

        assert_eq!(task.task_id, task_id);
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.assigned_worker.as_deref(), Some("worker-1"));
        assert!(checkpoint.is_none());
    }

    #[tokio::test]
    async fn claim_returns_none_when_queue_empty() {
        let store = store();
        let claimed = store
            .claim_task("worker-1", Duration::from_secs(30), Utc::now())
            .await
            .unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn submit_result_from_wrong_worker_is_rejected() {
        let store = store();
        let now = Utc::now();
        store.submit_task("prime", Payload(vec![]), now).await.unwrap();
        store
            .claim_task("worker-1", Duration::from_secs(30), now)
            .await
            .unwrap();

        let outcome = store
            .submit_result(
                "worker-2",
                1,
                Outcome::Success,
                Payload(vec![9]),
                now,
            )
            .await
            .unwrap();
        assert_eq!(outcome, LeaseWrite::Reject(RejectReason::NotOwner));
    }

    #[tokio::test]
    async fn submit_result_deletes_checkpoints_and_closes_the_task() {
        let store = store();
        let now = Utc::now();
        store.submit_task("prime", Payload(vec![]), now).await.unwrap();
        store
            .claim_task("worker-1", Duration::from_secs(30), now)
            .await
            .unwrap();
        store
            .save_checkpoint("worker-1", 1, Payload(vec![1]), 10, Duration::from_secs(30), now)
            .await
            .unwrap();

        store
            .submit_result("worker-1", 1, Outcome::Success, Payload(vec![2]), now)
            .await
            .unwrap();

        // the task is terminal now, so a late checkpoint from a retried
        // worker must be rejected rather than resurrecting stale state.
        let late_checkpoint = store
            .save_checkpoint("worker-1", 1, Payload(vec![3]), 20, Duration::from_secs(30), now)
            .await
            .unwrap();
        assert_eq!(late_checkpoint, LeaseWrite::Reject(RejectReason::NotInProgress));

        assert!(store.claim_task("worker-2", Duration::from_secs(30), now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_result_returns_the_submitted_outcome_and_blob() {
        let store = store();
        let now = Utc::now();
        store.submit_task("prime", Payload(vec![]), now).await.unwrap();
        store.claim_task("worker-1", Duration::from_secs(30), now).await.unwrap();
        assert!(store.get_result(1).await.unwrap().is_none());

        store
            .submit_result("worker-1", 1, Outcome::Success, Payload(vec![1, 6, 8]), now)
            .await
            .unwrap();

        let result = store.get_result(1).await.unwrap().expect("result should be readable once terminal");
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.result, Payload(vec![1, 6, 8]));
        assert_eq!(result.worker_id, "worker-1");
    }

    #[tokio::test]
    async fn submit_result_at_the_exact_lease_boundary_is_rejected() {
        let store = store();
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
    async fn monitor_tick_reclaims_expired_lease() {
        let store = store();
        let now = Utc::now();
        store.submit_task("prime", Payload(vec![]), now).await.unwrap();
        store
            .claim_task("worker-1", Duration::from_secs(1), now)
            .await
            .unwrap();

        let later = now + chrono::Duration::seconds(5);
        let report = store
            .run_monitor_tick(Duration::from_secs(3600), later)
            .await
            .unwrap();

        assert_eq!(report.reclaimed_tasks, vec![1]);
        let task = store.get_task(1).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_worker.is_none());
    }

    #[tokio::test]
    async fn monitor_tick_marks_silent_worker_dead_and_reclaims_its_task() {
        let store = store();
        let now = Utc::now();
        store.submit_task("prime", Payload(vec![]), now).await.unwrap();
        store
            .claim_task("worker-1", Duration::from_secs(3600), now)
            .await
            .unwrap();

        let later = now + chrono::Duration::seconds(120);
        let report = store
            .run_monitor_tick(Duration::from_secs(60), later)
            .await
            .unwrap();

        assert_eq!(report.newly_dead_workers, vec!["worker-1".to_string()]);
        assert_eq!(report.reclaimed_tasks, vec![1]);
    }

    #[tokio::test]
    async fn stats_counts_tasks_by_status() {
        let store = store();
        let now = Utc::now();
        store.submit_task("prime", Payload(vec![]), now).await.unwrap();
        store.submit_task("sleep", Payload(vec![]), now).await.unwrap();
        store
            .claim_task("worker-1", Duration::from_secs(30), now)
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.tasks_by_status.get(&TaskStatus::Pending), Some(&1));
        assert_eq!(stats.tasks_by_status.get(&TaskStatus::InProgress), Some(&1));
        assert_eq!(stats.workers_alive, 1);
    }
}
