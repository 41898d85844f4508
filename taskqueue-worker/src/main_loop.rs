//! The worker's main loop (§4.7) plus its heartbeat/cache-retry ticker
//! (§5): two tokio tasks sharing nothing but an `AtomicBool` "shutting
//! down" flag and an `AtomicI64` holding the in-flight task id (or -1 when
//! idle), grounded on the teacher's `host/src/bin/main.rs` split between
//! the request-serving future and the signal-handling future.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskqueue_client::{Client, ClientError};
use taskqueue_core::{Outcome, Payload};

use crate::cache::{CacheEntry, SubmissionCache};
use crate::config::Config;
use crate::error::WorkerResult;
use crate::registry::{ExecutionContext, Registry, TaskFn as _};

const NO_TASK: i64 = -1;

struct SharedState {
    shutting_down: AtomicBool,
    current_task_id: AtomicI64,
}

/// Runs the worker until a shutdown signal is received, then drains the
/// submission cache once more before returning (§6: exit code 0).
pub async fn run(config: Config, registry: Registry) -> WorkerResult<()> {
    let worker_id = config.worker_id.clone().unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));
    tracing::info!(worker_id = %worker_id, coordinator_url = %config.coordinator_url, "starting worker");

    let client = Client::new(config.coordinator_url.clone());
    let cache = Arc::new(SubmissionCache::new(
        config.cache_path.clone(),
        Duration::from_millis(config.cache_ttl_ms),
    ));
    let state = Arc::new(SharedState { shutting_down: AtomicBool::new(false), current_task_id: AtomicI64::new(NO_TASK) });

    client.heartbeat(&worker_id).await.ok();

    let drained = cache.drain(|entry| client.submit_result(&worker_id, entry.task_id, entry.outcome, entry.result)).await?;
    if drained > 0 {
        tracing::info!(drained, "recovered cached results on startup");
    }

    let ticker = tokio::spawn(run_ticker(client.clone(), worker_id.clone(), cache.clone(), state.clone(), config.clone()));

    tokio::select! {
        result = poll_loop(client.clone(), worker_id.clone(), cache.clone(), registry, state.clone(), config.clone()) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    state.shutting_down.store(true, Ordering::SeqCst);
    ticker.abort();

    let drained = cache.drain(|entry| client.submit_result(&worker_id, entry.task_id, entry.outcome, entry.result)).await?;
    tracing::info!(drained, "drained submission cache before exit");
    Ok(())
}

/// Heartbeats on `heartbeat_interval` and retries the submission cache on
/// `cache_retry_interval`, both from a context independent of whatever
/// the poll loop is blocked on (§4.7.1, §5).
async fn run_ticker(
    client: Client,
    worker_id: String,
    cache: Arc<SubmissionCache>,
    state: Arc<SharedState>,
    config: Config,
) {
    let mut heartbeat_tick = tokio::time::interval(Duration::from_millis(config.heartbeat_interval_ms));
    let mut cache_tick = tokio::time::interval(Duration::from_millis(config.cache_retry_interval_ms));
    heartbeat_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    cache_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = heartbeat_tick.tick() => {
                let current_task = state.current_task_id.load(Ordering::SeqCst);
                if let Err(e) = client.heartbeat(&worker_id).await {
                    let current_task = (current_task != NO_TASK).then_some(current_task);
                    tracing::warn!(error = %e, ?current_task, "heartbeat failed, will retry next tick");
                }
            }
            _ = cache_tick.tick() => {
                match cache.drain(|entry| client.submit_result(&worker_id, entry.task_id, entry.outcome, entry.result)).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(delivered = n, "submission cache retry delivered cached results"),
                    Err(e) => tracing::warn!(error = %e, "submission cache retry failed"),
                }
            }
        }
    }
}

async fn poll_loop(
    client: Client,
    worker_id: String,
    cache: Arc<SubmissionCache>,
    registry: Registry,
    state: Arc<SharedState>,
    config: Config,
) -> WorkerResult<()> {
    loop {
        let claimed = match client.claim_task(&worker_id, None).await {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::warn!(error = %e, "claim failed, retrying after poll interval");
                tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
                continue;
            }
        };

        let Some((task, checkpoint)) = claimed else {
            tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
            continue;
        };

        state.current_task_id.store(task.task_id, Ordering::SeqCst);
        let (outcome, result) = execute(&client, &worker_id, &registry, &task, checkpoint.map(|c| c.state)).await;
        state.current_task_id.store(NO_TASK, Ordering::SeqCst);

        match client.submit_result(&worker_id, task.task_id, outcome, result.clone()).await {
            Ok(()) => {
                tracing::info!(task_id = task.task_id, outcome = ?outcome, "result submitted");
            }
            Err(ClientError::Rejected(reason)) => {
                tracing::warn!(task_id = task.task_id, %reason, "result rejected, discarding");
            }
            Err(e) => {
                tracing::warn!(task_id = task.task_id, error = %e, "submit failed, caching result");
                cache.append(&CacheEntry::new(task.task_id, outcome, result)).await?;
            }
        }
    }
}

/// Resolves the executor by `task_type` and runs it, catching a panic as
/// a failure result instead of taking the worker process down with it
/// (OQ-3). Unknown task types fail fast without ever invoking the
/// registry (§4.7 step 3).
async fn execute(
    client: &Client,
    worker_id: &str,
    registry: &Registry,
    task: &taskqueue_core::Task,
    resume_state: Option<Payload>,
) -> (Outcome, Payload) {
    let Some(task_fn) = registry.get(task.task_type.as_str()).cloned() else {
        tracing::warn!(task_id = task.task_id, task_type = %task.task_type, "unknown task type");
        return (Outcome::Failed, Payload::from(b"task type not implemented".to_vec()));
    };

    let mut ctx = ExecutionContext::new(task.task_id, task.payload.clone(), resume_state, client.clone(), worker_id.to_string());

    let handle = tokio::spawn(async move {
        let result = task_fn.run(&mut ctx).await;
        result
    });

    match handle.await {
        Ok(Ok(payload)) => (Outcome::Success, payload),
        Ok(Err(message)) => (Outcome::Failed, Payload::from(message.into_bytes())),
        Err(join_error) => {
            tracing::error!(task_id = task.task_id, error = %join_error, "task function panicked");
            (Outcome::Failed, Payload::from(format!("task panicked: {join_error}").into_bytes()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use taskqueue_core::{Task, TaskStatus};

    use crate::registry::{default_registry, TaskFn};

    fn dummy_task(task_type: &str, payload: Vec<u8>) -> Task {
        Task {
            task_id: 1,
            task_type: task_type.to_string(),
            payload: Payload(payload),
            status: TaskStatus::InProgress,
            assigned_worker: Some("worker-1".to_string()),
            lease_expires_at: None,
            attempts: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unknown_task_type_fails_without_touching_the_registry() {
        let client = Client::new("http://127.0.0.1:1".to_string());
        let registry = default_registry();
        let task = dummy_task("no-such-type", vec![]);

        let (outcome, result) = execute(&client, "worker-1", &registry, &task, None).await;
        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(result.as_bytes(), b"task type not implemented");
    }

    #[tokio::test]
    async fn sleep_task_completes_successfully() {
        let client = Client::new("http://127.0.0.1:1".to_string());
        let registry = default_registry();
        let task = dummy_task("sleep", br#"{"duration_ms": 1}"#.to_vec());

        let (outcome, _result) = execute(&client, "worker-1", &registry, &task, None).await;
        assert_eq!(outcome, Outcome::Success);
    }

    struct Panics;

    #[async_trait]
    impl TaskFn for Panics {
        async fn run(&self, _ctx: &mut ExecutionContext) -> Result<Payload, String> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn panicking_task_function_becomes_a_failed_outcome() {
        let client = Client::new("http://127.0.0.1:1".to_string());
        let mut registry = default_registry();
        registry.insert("panics", std::sync::Arc::new(Panics));
        let task = dummy_task("panics", vec![]);

        let (outcome, _result) = execute(&client, "worker-1", &registry, &task, None).await;
        assert_eq!(outcome, Outcome::Failed);
    }
}
