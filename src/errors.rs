// nvrbackup/src/errors.rs
use thiserror::Error;

use crate::cloud::ProviderErrorKind;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Cloud provider rejected credential: {message}")]
    AuthFailure { message: String, retriable: bool },

    #[error("Upload failed ({kind}): {message}")]
    UploadFailure { kind: ProviderErrorKind, message: String },

    #[error("Cloud operation failed ({kind}): {message}")]
    Cloud { kind: ProviderErrorKind, message: String },

    #[error("A restore is already in progress")]
    Busy,

    #[error("Cloud sync is not configured; supply a credential first")]
    NotConfigured,

    #[error("Restore apply failed: {0}")]
    ApplyFailure(String),

    #[error("Integrity check failed for {filename}: expected {expected}, got {actual}")]
    Integrity {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl AppError {
    /// Whether retrying the same call could succeed without operator action.
    pub fn is_retriable(&self) -> bool {
        match self {
            AppError::UploadFailure { kind, .. } | AppError::Cloud { kind, .. } => kind.is_retriable(),
            AppError::AuthFailure { retriable, .. } => *retriable,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
