use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use taskqueue_store::RejectReason;

/// Errors surfaced by the coordinator's operation layer.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("task {0} not found")]
    TaskNotFound(i64),

    #[error("no result for task {0}")]
    ResultNotFound(i64),

    /// The caller's precondition failed: stale lease, wrong owner, wrong
    /// state. Never retried by the coordinator itself.
    #[error("rejected: {0}")]
    Rejected(RejectReason),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] taskqueue_store::StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

impl From<RejectReason> for CoordinatorError {
    fn from(reason: RejectReason) -> Self {
        CoordinatorError::Rejected(reason)
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> axum::response::Response {
        let (status, error, message) = match &self {
            CoordinatorError::TaskNotFound(id) => {
                (StatusCode::NOT_FOUND, "task_not_found", format!("task {id} not found"))
            }
            CoordinatorError::ResultNotFound(id) => {
                (StatusCode::NOT_FOUND, "result_not_found", format!("no result for task {id}"))
            }
            CoordinatorError::Rejected(reason) => {
                (StatusCode::CONFLICT, "rejected", reason.to_string())
            }
            CoordinatorError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", msg.clone())
            }
            CoordinatorError::Config(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone())
            }
            CoordinatorError::Store(e) => {
                tracing::error!(error = %e, "store error handling request");
                (StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
            }
            CoordinatorError::Io(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "io_error", e.to_string())
            }
        };

        (status, Json(serde_json::json!({ "status": "error", "error": error, "message": message })))
            .into_response()
    }
}
