/// Errors internal to the worker process (§7). None of these cross the
/// wire; they govern local control flow (cache mode vs. loop, exit code).
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("coordinator client error: {0}")]
    Client(#[from] taskqueue_client::ClientError),

    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serde(serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
