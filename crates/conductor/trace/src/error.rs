use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type TraceResult<T> = Result<T, TraceError>;
