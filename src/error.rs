use thiserror::Error;
use uuid::Uuid;

use crate::guard::RunKind;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },
    #[error("generative service returned no text")]
    EmptyResponse,
    #[error("generative service not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Error)]
#[error("unrecoverable JSON payload: {reason}")]
pub struct ParseError {
    pub reason: String,
}

/// Per-record rejection. The record is dropped and counted.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("record is not an object: {0}")]
    Malformed(String),
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' has stale year {year}")]
    StaleYear { field: &'static str, year: i32 },
    #[error("field '{field}' is not a date: '{value}'")]
    BadDate { field: &'static str, value: String },
    #[error("expected end precedes expected start")]
    EndBeforeStart,
    #[error("event falls outside the validity window")]
    OutsideWindow,
    #[error("invalid source URL '{0}'")]
    BadUrl(String),
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
    #[error("sub-category '{sub_category}' is not allowed for '{category}'")]
    UnknownSubCategory {
        category: String,
        sub_category: String,
    },
    #[error("impact location {index} has invalid coordinates")]
    BadCoordinates { index: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row for alert {id}: {reason}")]
    Decode { id: Uuid, reason: String },
    #[error("alert {0} not found")]
    NotFound(Uuid),
}

/// Failure that aborts one location/segment (or one update check) but not
/// the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced to operator-triggered calls.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} run already in progress")]
    AlreadyRunning(RunKind),
    #[error("alert {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::Pipeline(PipelineError::Store(other)),
        }
    }
}
