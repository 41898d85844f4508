//! Operation layer: the coordinator's five RPCs (§4.1-4.5), sitting
//! between the HTTP handlers and the [`Store`]. Translates `LeaseWrite`
//! rejections into [`CoordinatorError::Rejected`], applies the
//! configured default lease duration, and logs every lifecycle
//! transition at the level described in the coordinator's error model.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskqueue_core::{Checkpoint, Outcome, Payload, Task, TaskResult};
use taskqueue_store::{LeaseWrite, Store, StoreStats};
use tracing::info;

use crate::error::{CoordinatorError, CoordinatorResult};

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    default_lease_duration: Duration,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, default_lease_duration: Duration) -> Self {
        Engine { store, default_lease_duration }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn submit_task(&self, task_type: String, payload: Payload) -> CoordinatorResult<i64> {
        let task_id = self.store.submit_task(&task_type, payload, Utc::now()).await?;
        info!(task_id, task_type, "task submitted");
        Ok(task_id)
    }

    pub async fn get_task(&self, task_id: i64) -> CoordinatorResult<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or(CoordinatorError::TaskNotFound(task_id))
    }

    /// Reads back a terminal task's result (I3). Rejects with
    /// `ResultNotFound` both when the task doesn't exist and when it
    /// exists but hasn't reached a terminal status yet — the caller can't
    /// tell the two apart from a missing result alone, and `get_task`
    /// already exists for checking status.
    pub async fn get_result(&self, task_id: i64) -> CoordinatorResult<TaskResult> {
        self.store
            .get_result(task_id)
            .await?
            .ok_or(CoordinatorError::ResultNotFound(task_id))
    }

    pub async fn stats(&self) -> CoordinatorResult<StoreStats> {
        Ok(self.store.stats().await?)
    }

    pub async fn claim_task(
        &self,
        worker_id: String,
        lease_duration_ms: Option<u64>,
    ) -> CoordinatorResult<Option<(Task, Option<Checkpoint>)>> {
        let lease_duration = lease_duration_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_lease_duration);
        let claimed = self.store.claim_task(&worker_id, lease_duration, Utc::now()).await?;
        if let Some((task, _)) = &claimed {
            info!(task_id = task.task_id, worker_id, attempts = task.attempts, "task claimed");
        }
        Ok(claimed)
    }

    pub async fn submit_result(
        &self,
        worker_id: String,
        task_id: i64,
        outcome: Outcome,
        result: Payload,
    ) -> CoordinatorResult<()> {
        match self
            .store
            .submit_result(&worker_id, task_id, outcome, result, Utc::now())
            .await?
        {
            LeaseWrite::Ack(()) => {
                info!(task_id, worker_id, ?outcome, "result submitted");
                Ok(())
            }
            LeaseWrite::Reject(reason) => {
                tracing::warn!(task_id, worker_id, %reason, "submit-result rejected");
                Err(reason.into())
            }
        }
    }

    pub async fn save_checkpoint(
        &self,
        worker_id: String,
        task_id: i64,
        state: Payload,
        elapsed_ms: u64,
    ) -> CoordinatorResult<chrono::DateTime<Utc>> {
        match self
            .store
            .save_checkpoint(&worker_id, task_id, state, elapsed_ms, self.default_lease_duration, Utc::now())
            .await?
        {
            LeaseWrite::Ack(lease_expires_at) => {
                tracing::debug!(task_id, worker_id, elapsed_ms, "checkpoint saved");
                Ok(lease_expires_at)
            }
            LeaseWrite::Reject(reason) => {
                tracing::warn!(task_id, worker_id, %reason, "checkpoint rejected");
                Err(reason.into())
            }
        }
    }

    pub async fn heartbeat(&self, worker_id: String) -> CoordinatorResult<()> {
        self.store.heartbeat(&worker_id, Utc::now()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskqueue_store::InMemoryStore;

    fn engine() -> Engine {
        Engine::new(Arc::new(InMemoryStore::new()), Duration::from_secs(120))
    }

    #[tokio::test]
    async fn submit_then_get_round_trips() {
        let engine = engine();
        let task_id = engine.submit_task("prime".into(), Payload(vec![1])).await.unwrap();
        let task = engine.get_task(task_id).await.unwrap();
        assert_eq!(task.task_type, "prime");
    }

    #[tokio::test]
    async fn get_missing_task_is_not_found() {
        let engine = engine();
        let err = engine.get_task(42).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::TaskNotFound(42)));
    }

    #[tokio::test]
    async fn claim_with_no_lease_override_uses_default() {
        let engine = engine();
        engine.submit_task("prime".into(), Payload(vec![])).await.unwrap();
        let (task, _) = engine.claim_task("w1".into(), None).await.unwrap().unwrap();
        let lease = task.lease_expires_at.unwrap() - task.updated_at;
        assert_eq!(lease.num_seconds(), 120);
    }

    #[tokio::test]
    async fn submit_result_from_non_owner_is_rejected_error() {
        let engine = engine();
        engine.submit_task("prime".into(), Payload(vec![])).await.unwrap();
        engine.claim_task("w1".into(), None).await.unwrap();
        let err = engine
            .submit_result("w2".into(), 1, Outcome::Success, Payload(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Rejected(_)));
    }
}
