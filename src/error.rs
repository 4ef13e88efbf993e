//! Crate-wide error type. Public operations never surface it; it travels
//! between internal helpers and ends up in a log line.

use std::path::PathBuf;

use hyper::header::InvalidHeaderValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StaticError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),

    #[error("{path} is not under {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

impl StaticError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StaticError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StaticError>;
