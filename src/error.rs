use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Field {0:?} contains a separator or terminator and cannot be framed")]
    InvalidField(String),

    #[error("Malformed {keyword} message: {reason}")]
    MalformedMessage { keyword: String, reason: String },

    #[error("Job not found: {0}")]
    JobNotFound(u64),

    #[error("Job queue is full ({0} jobs)")]
    QueueFull(usize),

    #[error("No payload registered under {0:?}")]
    UnknownPayload(String),

    #[error("Schedule {0} is not supported")]
    UnsupportedSchedule(String),

    #[error("Payload error: {0}")]
    Payload(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl ClusterError {
    pub fn malformed(keyword: &str, reason: impl Into<String>) -> Self {
        ClusterError::MalformedMessage {
            keyword: keyword.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that leave the socket unusable.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClusterError::Io(_) | ClusterError::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
