use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use taskqueue_core::{
    ClaimRequest, ClaimResponse, CheckpointRequest, HeartbeatRequest, StatsResponse,
    SubmitResultRequest, SubmitTaskRequest, SubmitTaskResponse, Task, TaskResult,
};

use crate::error::CoordinatorResult;
use crate::server::AppState;

#[utoipa::path(
    post,
    path = "/v1/tasks",
    tag = "Tasks",
    request_body = SubmitTaskRequest,
    responses((status = 200, description = "Task accepted", body = SubmitTaskResponse))
)]
pub async fn submit_task(
    State(state): State<AppState>,
    Json(req): Json<SubmitTaskRequest>,
) -> CoordinatorResult<Json<SubmitTaskResponse>> {
    let task_id = state.engine.submit_task(req.task_type, req.payload).await?;
    Ok(Json(SubmitTaskResponse { task_id }))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/{task_id}",
    tag = "Tasks",
    params(("task_id" = i64, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task found", body = Task),
        (status = 404, description = "No task with that id"),
    )
)]
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> CoordinatorResult<Json<Task>> {
    Ok(Json(state.engine.get_task(task_id).await?))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/{task_id}/result",
    tag = "Tasks",
    params(("task_id" = i64, Path, description = "Task id")),
    responses(
        (status = 200, description = "Terminal result for the task", body = TaskResult),
        (status = 404, description = "No task with that id, or it hasn't finished yet"),
    )
)]
pub async fn get_result(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> CoordinatorResult<Json<TaskResult>> {
    Ok(Json(state.engine.get_result(task_id).await?))
}

#[utoipa::path(
    get,
    path = "/v1/stats",
    tag = "Stats",
    responses((status = 200, description = "Aggregate counts", body = StatsResponse))
)]
pub async fn stats(State(state): State<AppState>) -> CoordinatorResult<Json<StatsResponse>> {
    let stats = state.engine.stats().await?;
    let tasks_by_status = stats
        .tasks_by_status
        .into_iter()
        .map(|(status, count)| (status.to_string(), count))
        .collect();
    Ok(Json(StatsResponse {
        tasks_by_status,
        workers_alive: stats.workers_alive,
        workers_dead: stats.workers_dead,
    }))
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Coordinator is healthy"))
)]
pub async fn health() -> StatusCode {
    StatusCode::OK
}

#[utoipa::path(
    post,
    path = "/v1/claim",
    tag = "Tasks",
    request_body = ClaimRequest,
    responses((status = 200, description = "A task, or task: null if the queue is empty", body = ClaimResponse))
)]
pub async fn claim_task(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> CoordinatorResult<Json<ClaimResponse>> {
    let claimed = state.engine.claim_task(req.worker_id, req.lease_duration_ms).await?;
    let (task, checkpoint) = match claimed {
        Some((task, checkpoint)) => (Some(task), checkpoint),
        None => (None, None),
    };
    Ok(Json(ClaimResponse { task, checkpoint }))
}

#[utoipa::path(
    post,
    path = "/v1/tasks/{task_id}/result",
    tag = "Tasks",
    params(("task_id" = i64, Path, description = "Task id")),
    request_body = SubmitResultRequest,
    responses(
        (status = 200, description = "Result accepted"),
        (status = 409, description = "Lease lost or wrong owner"),
    )
)]
pub async fn submit_result(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Json(req): Json<SubmitResultRequest>,
) -> CoordinatorResult<StatusCode> {
    state.engine.submit_result(req.worker_id, task_id, req.outcome, req.result).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/v1/tasks/{task_id}/checkpoint",
    tag = "Tasks",
    params(("task_id" = i64, Path, description = "Task id")),
    request_body = CheckpointRequest,
    responses(
        (status = 200, description = "Checkpoint saved, lease refreshed"),
        (status = 409, description = "Lease lost or wrong owner"),
    )
)]
pub async fn save_checkpoint(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Json(req): Json<CheckpointRequest>,
) -> CoordinatorResult<StatusCode> {
    state
        .engine
        .save_checkpoint(req.worker_id, task_id, req.state, req.elapsed_ms)
        .await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/v1/workers/{worker_id}/heartbeat",
    tag = "Workers",
    params(("worker_id" = String, Path, description = "Worker id")),
    request_body = HeartbeatRequest,
    responses((status = 200, description = "Heartbeat recorded"))
)]
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Json(_req): Json<HeartbeatRequest>,
) -> CoordinatorResult<StatusCode> {
    state.engine.heartbeat(worker_id).await?;
    Ok(StatusCode::OK)
}
