//! Error types for the viewer core

use docview_render::CodecError;
use thiserror::Error;

/// Errors produced while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Errors produced while opening or driving a document view
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The document is protected; retry with a password
    #[error("document requires a password")]
    PasswordRequired,

    #[error(transparent)]
    Codec(CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The decode thread could not be started
    #[error("failed to start decode worker: {0}")]
    Worker(std::io::Error),

    #[error("page {page} out of range (page count {count})")]
    InvalidPage { page: usize, count: usize },
}

impl DocumentError {
    pub fn is_password_required(&self) -> bool {
        matches!(self, Self::PasswordRequired)
    }
}

impl From<CodecError> for DocumentError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::PasswordRequired => Self::PasswordRequired,
            other => Self::Codec(other),
        }
    }
}

/// Result type for document operations
pub type DocumentResult<T> = Result<T, DocumentError>;
