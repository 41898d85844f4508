/// Errors surfaced by the client.
///
/// `Transport` and `Coordinator { status: 5xx, .. }` are transient — a
/// caller building a worker should treat them as cache-mode triggers.
/// `Rejected` is the §4.3/§4.4 REJECT outcome and must never be retried.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("coordinator returned {status}: {message}")]
    Coordinator { status: u16, message: String },
}

impl ClientError {
    /// Whether a caller should treat this as transient (worth retrying or
    /// falling back to the submission cache) rather than as a terminal
    /// contract rejection.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Rejected(_) => false,
            ClientError::Transport(_) => true,
            ClientError::Coordinator { status, .. } => *status >= 500,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
