use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::engine::Engine;
use crate::error::CoordinatorError;

pub mod handlers;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::submit_task,
        handlers::get_task,
        handlers::get_result,
        handlers::stats,
        handlers::health,
        handlers::claim_task,
        handlers::submit_result,
        handlers::save_checkpoint,
        handlers::heartbeat,
    ),
    components(schemas(
        taskqueue_core::SubmitTaskRequest,
        taskqueue_core::SubmitTaskResponse,
        taskqueue_core::ClaimRequest,
        taskqueue_core::ClaimResponse,
        taskqueue_core::SubmitResultRequest,
        taskqueue_core::CheckpointRequest,
        taskqueue_core::HeartbeatRequest,
        taskqueue_core::StatsResponse,
        taskqueue_core::Task,
        taskqueue_core::TaskResult,
        taskqueue_core::Checkpoint,
        taskqueue_core::TaskStatus,
        taskqueue_core::Outcome,
    )),
    tags(
        (name = "Tasks", description = "Submit, claim, and resolve tasks"),
        (name = "Workers", description = "Worker liveness"),
        (name = "Health", description = "Server health"),
        (name = "Stats", description = "Aggregate queue counts"),
    )
)]
struct Docs;

pub fn create_router(engine: Arc<Engine>) -> Router {
    let state = AppState { engine };
    let docs = Docs::openapi();

    Router::new()
        .route("/v1/tasks", post(handlers::submit_task))
        .route("/v1/tasks/:task_id", get(handlers::get_task))
        .route("/v1/tasks/:task_id/result", post(handlers::submit_result).get(handlers::get_result))
        .route("/v1/tasks/:task_id/checkpoint", post(handlers::save_checkpoint))
        .route("/v1/claim", post(handlers::claim_task))
        .route("/v1/workers/:worker_id/heartbeat", post(handlers::heartbeat))
        .route("/v1/stats", get(handlers::stats))
        .route("/health", get(handlers::health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", docs))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Binds the listener and serves until the process is killed.
pub async fn serve(address: &str, engine: Arc<Engine>) -> anyhow::Result<()> {
    let addr = SocketAddr::from_str(address)
        .map_err(|_| CoordinatorError::BadRequest(format!("invalid bind address: {address}")))?;
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);

    let router = create_router(engine);
    axum::serve(listener, router).await.context("server exited")?;
    Ok(())
}
