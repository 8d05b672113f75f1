use thiserror::Error;

/// Closed error taxonomy for the operation layer. Background services log
/// through anyhow; everything the dashboard can observe maps onto one of
/// these variants.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input, rejected before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The request contradicts existing state, e.g. a duplicate exclusion.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Undo no longer applies because the device moved on.
    #[error("undo expired: {0}")]
    UndoExpired(String),

    /// Home Assistant is unreachable; the caller may retry.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Best-effort import found nothing usable.
    #[error("import parse error: {0}")]
    ImportParse(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Internal(e.into())
    }
}

pub type ApiResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        EngineError::NotFound(format!("{} {}", what, id))
    }
}
