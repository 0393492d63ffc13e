use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QaError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("invalid config {path:?}: {message}")]
    Config { path: PathBuf, message: String },
    #[error("{field} exceeds max token length ({length} > {limit})")]
    Validation {
        field: &'static str,
        length: usize,
        limit: usize,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("other: {0}")]
    Other(String),
}

impl QaError {
    pub fn is_validation(&self) -> bool {
        matches!(self, QaError::Validation { .. } | QaError::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, QaError>;

impl From<anyhow::Error> for QaError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
