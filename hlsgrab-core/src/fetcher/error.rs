use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no playable stream: {0}")]
    NoPlayableStream(String),
    #[error("ffmpeg exited with status {status:?}: {stderr}")]
    ProcessFailed { status: Option<i32>, stderr: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("subtitle download failed: {0}")]
    Subtitle(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl FetchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Io {
            source,
            path: path.into(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        FetchError::Network(error.to_string())
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
