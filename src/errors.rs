use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to resolve required path: {0}")]
    Path(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("{0}")]
    Config(String),
    #[error("settings file is malformed: {0}")]
    ConfigCorrupt(String),
    #[error("file not found: {}", .0.display())]
    FileMissing(PathBuf),
    #[error("applications file {} is corrupt: {reason}", path.display())]
    CorruptFile { path: PathBuf, reason: String },
    #[error("google authentication failed: {0}")]
    Auth(String),
    #[error("google sheets call failed: {0}")]
    RemoteCall(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("remote call timed out after {0}s")]
    Timeout(u64),
}

impl AppError {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CorruptFile {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
