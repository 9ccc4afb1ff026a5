use thiserror::Error;

#[derive(Error, Debug)]
pub enum DifsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{command} command for {name} rejected with status {status_code}")]
    CommandRejected {
        command: String,
        name: String,
        status_code: u32,
    },

    #[error("retries exhausted for {request} after {attempts} attempts")]
    RetryExhausted { request: String, attempts: u32 },

    #[error("{command} command for {name} lost: {reason}")]
    CommandLost {
        command: String,
        name: String,
        reason: String,
    },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("{operation} did not complete within {deadline_ms} ms")]
    DeadlineExceeded { operation: String, deadline_ms: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DifsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DifsError::NotFound(_))
    }

    /// Malformed manifests, unreadable input and signing failures. Never retried.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            DifsError::InvalidManifest(_) | DifsError::ProtocolViolation(_) | DifsError::Signing(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DifsError>;
