//! The executor registry (§4.9): a static map from `task_type` to a task
//! function, populated once at startup in place of the dynamic
//! module-by-name resolution a scripting-language original would use (see
//! REDESIGN FLAGS). Adding a task type means adding an entry to
//! [`default_registry`], not registering anything at runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use taskqueue_client::Client;
use taskqueue_core::Payload;

use crate::tasks;

/// What a task function is handed and what it can do mid-execution.
/// Owns everything it needs so it can be moved wholesale into the
/// `tokio::spawn`'d task that runs it (§7: a panic there is caught as a
/// `JoinError`, not a crashed worker process).
pub struct ExecutionContext {
    pub task_id: i64,
    pub payload: Payload,
    pub resume_state: Option<Payload>,
    client: Client,
    worker_id: String,
    started_at: Instant,
}

impl ExecutionContext {
    pub fn new(
        task_id: i64,
        payload: Payload,
        resume_state: Option<Payload>,
        client: Client,
        worker_id: String,
    ) -> Self {
        ExecutionContext { task_id, payload, resume_state, client, worker_id, started_at: Instant::now() }
    }

    /// Reports intermediate progress. Failures (lease lost, coordinator
    /// unreachable) are logged and swallowed: the worker has no
    /// cancellation channel, so the task function keeps going regardless
    /// and only finds out about a lost lease when it submits its result.
    pub async fn checkpoint(&self, state: Payload) {
        let elapsed_ms = self.started_at.elapsed().as_millis() as u64;
        if let Err(e) = self.client.save_checkpoint(&self.worker_id, self.task_id, state, elapsed_ms).await {
            tracing::warn!(task_id = self.task_id, error = %e, "checkpoint failed, continuing");
        }
    }
}

/// A task function: a pure mapping from payload (and optional resume
/// state) to a result blob, per §4.9. Implementations must be idempotent
/// — the at-least-once delivery model means the same input can run twice.
#[async_trait]
pub trait TaskFn: Send + Sync {
    async fn run(&self, ctx: &mut ExecutionContext) -> Result<Payload, String>;
}

pub type Registry = HashMap<&'static str, Arc<dyn TaskFn>>;

pub fn default_registry() -> Registry {
    let mut registry: Registry = HashMap::new();
    registry.insert("prime", Arc::new(tasks::prime::Prime));
    registry.insert("sleep", Arc::new(tasks::sleep::Sleep));
    registry
}
