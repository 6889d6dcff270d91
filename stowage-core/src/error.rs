use thiserror::Error;

pub type Result<T> = std::result::Result<T, StowError>;

#[derive(Error, Debug)]
pub enum StowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Etcd error: {0}")]
    Etcd(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Write already in progress: {0}")]
    InUse(String),

    #[error("Store failure at {path}: {message}")]
    StoreFailure { path: String, message: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("CAS retries exhausted for {key} after {attempts} attempts")]
    CasExhausted { key: String, attempts: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StowError {
    /// Conflicts the caller may retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StowError::InUse(_) | StowError::CasExhausted { .. })
    }
}

impl From<etcd_client::Error> for StowError {
    fn from(err: etcd_client::Error) -> Self {
        StowError::Etcd(err.to_string())
    }
}
