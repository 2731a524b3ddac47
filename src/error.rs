use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::governor::DenyReason;

/// Failure of a single HTTP attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed with status: {0}")]
    Http(reqwest::StatusCode),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("request cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("not a post URL: {0}")]
    InvalidUrl(String),

    #[error("{0} not found")]
    TokenNotFound(&'static str),

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("fetching {url} failed after {attempts} attempts: {source}")]
    FetchExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error("malformed JSON response: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("failed to download {url} to {}: {source}", path.display())]
    DownloadFailed {
        url: String,
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to prepare {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("request denied: {0}")]
    Denied(DenyReason),

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Delivery(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline step an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Admission,
    Credentials,
    Query,
    Fetch,
    Extract,
    Download,
    Deliver,
    Forward,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Parse => "parse",
            Stage::Admission => "admission",
            Stage::Credentials => "credentials",
            Stage::Query => "query",
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Download => "download",
            Stage::Deliver => "deliver",
            Stage::Forward => "forward",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl PipelineError {
    pub fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }
}

/// Attaches a pipeline stage to a failed result.
pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> std::result::Result<T, PipelineError>;
}

impl<T> StageContext<T> for Result<T> {
    fn stage(self, stage: Stage) -> std::result::Result<T, PipelineError> {
        self.map_err(|source| PipelineError::new(stage, source))
    }
}
