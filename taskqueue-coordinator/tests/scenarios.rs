//! End-to-end scenarios against a real coordinator server (§8), exercised
//! through `taskqueue_client::Client` rather than the engine directly, so
//! these tests also cover the HTTP transport binding of §4.10.

use std::sync::Arc;
use std::time::Duration;

use taskqueue_client::{Client, ClientError};
use taskqueue_coordinator::server::create_router;
use taskqueue_coordinator::Engine;
use taskqueue_core::{Outcome, Payload};
use taskqueue_store::{InMemoryStore, Store};

async fn spawn_server() -> (Client, Arc<Engine>) {
    spawn_server_with_lease(Duration::from_secs(120)).await
}

/// `SaveCheckpoint` always refreshes a task's lease to the coordinator's
/// configured default (the wire contract carries no duration), so tests
/// that need a short-lived lease to provoke a reclaim build their own
/// server with a short default rather than relying on `ClaimTask`'s
/// per-call override surviving a checkpoint.
async fn spawn_server_with_lease(default_lease_duration: Duration) -> (Client, Arc<Engine>) {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let engine = Arc::new(Engine::new(store, default_lease_duration));
    let router = create_router(engine.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (Client::new(format!("http://{address}")), engine)
}

#[tokio::test]
async fn single_worker_happy_path() {
    let (client, _engine) = spawn_server().await;

    let task_id = client.submit_task("sleep", Payload(vec![1, 2, 3])).await.unwrap();

    let (task, checkpoint) = client.claim_task("worker-1", None).await.unwrap().unwrap();
    assert_eq!(task.task_id, task_id);
    assert!(checkpoint.is_none());

    client
        .submit_result("worker-1", task_id, Outcome::Success, Payload(vec![9, 9]))
        .await
        .unwrap();

    let task = client.get_task(task_id).await.unwrap();
    assert_eq!(task.status, taskqueue_core::TaskStatus::Completed);

    assert!(client.claim_task("worker-1", None).await.unwrap().is_none());
}

#[tokio::test]
async fn result_is_readable_once_the_task_is_terminal() {
    let (client, _engine) = spawn_server().await;

    let task_id = client.submit_task("prime", Payload::default()).await.unwrap();
    client.claim_task("worker-1", None).await.unwrap().unwrap();

    let err = client.get_result(task_id).await.unwrap_err();
    match err {
        ClientError::Transport(e) => assert_eq!(e.status(), Some(reqwest::StatusCode::NOT_FOUND)),
        other => panic!("expected a 404 before the task is terminal, got {other:?}"),
    }

    client
        .submit_result("worker-1", task_id, Outcome::Success, Payload(vec![1, 6, 8]))
        .await
        .unwrap();

    let result = client.get_result(task_id).await.unwrap();
    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.result, Payload(vec![1, 6, 8]));
    assert_eq!(result.worker_id, "worker-1");
}

#[tokio::test]
async fn second_worker_cannot_claim_an_in_progress_task() {
    let (client, _engine) = spawn_server().await;

    client.submit_task("sleep", Payload::default()).await.unwrap();
    let (task, _) = client.claim_task("worker-1", None).await.unwrap().unwrap();

    assert!(client.claim_task("worker-2", None).await.unwrap().is_none());

    let err = client
        .submit_result("worker-2", task.task_id, Outcome::Success, Payload::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)));
}

#[tokio::test]
async fn checkpoint_is_handed_back_to_the_next_claimant_after_reclaim() {
    let (client, engine) = spawn_server_with_lease(Duration::from_millis(50)).await;

    let task_id = client.submit_task("prime", Payload::default()).await.unwrap();
    client.claim_task("worker-1", None).await.unwrap().unwrap();
    client
        .save_checkpoint("worker-1", task_id, Payload(vec![7, 7]), 10)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    engine.store().run_monitor_tick(Duration::from_secs(3600), chrono::Utc::now()).await.unwrap();

    let (task, checkpoint) = client.claim_task("worker-2", None).await.unwrap().unwrap();
    assert_eq!(task.task_id, task_id);
    assert_eq!(checkpoint.unwrap().state, Payload(vec![7, 7]));
}

#[tokio::test]
async fn submit_after_lease_expiry_is_rejected_even_before_reclaim_runs() {
    let (client, _engine) = spawn_server().await;

    let task_id = client.submit_task("sleep", Payload::default()).await.unwrap();
    client.claim_task("worker-1", Some(10)).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;

    let err = client
        .submit_result("worker-1", task_id, Outcome::Success, Payload::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)));
}

#[tokio::test]
async fn stats_reflects_task_counts_across_the_full_lifecycle() {
    let (client, _engine) = spawn_server().await;

    client.submit_task("sleep", Payload::default()).await.unwrap();
    let second = client.submit_task("sleep", Payload::default()).await.unwrap();

    let (task, _) = client.claim_task("worker-1", None).await.unwrap().unwrap();
    client.submit_result("worker-1", task.task_id, Outcome::Success, Payload::default()).await.unwrap();

    let (task2, _) = client.claim_task("worker-1", None).await.unwrap().unwrap();
    assert_eq!(task2.task_id, second);
    client.submit_result("worker-1", task2.task_id, Outcome::Failed, Payload::default()).await.unwrap();

    let stats = client.stats().await.unwrap();
    assert_eq!(stats.tasks_by_status.get("completed").copied().unwrap_or(0), 1);
    assert_eq!(stats.tasks_by_status.get("failed").copied().unwrap_or(0), 1);
    assert_eq!(stats.workers_alive, 1);
}

#[tokio::test]
async fn get_unknown_task_is_a_404() {
    let (client, _engine) = spawn_server().await;

    let err = client.get_task(99999).await.unwrap_err();
    match err {
        ClientError::Transport(e) => assert_eq!(e.status(), Some(reqwest::StatusCode::NOT_FOUND)),
        other => panic!("expected a 404 transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn claims_are_fifo_even_across_a_reclaim() {
    let (client, engine) = spawn_server().await;

    let first = client.submit_task("sleep", Payload::default()).await.unwrap();
    client.claim_task("worker-1", Some(10)).await.unwrap().unwrap();
    let second = client.submit_task("sleep", Payload::default()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    engine.store().run_monitor_tick(Duration::from_secs(3600), chrono::Utc::now()).await.unwrap();

    let (task, _) = client.claim_task("worker-2", None).await.unwrap().unwrap();
    assert_eq!(task.task_id, first, "reclaimed work should be preferred over newly submitted work");

    let (task, _) = client.claim_task("worker-2", None).await.unwrap().unwrap();
    assert_eq!(task.task_id, second);
}
