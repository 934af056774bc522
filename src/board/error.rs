/// Errors surfaced by the mutation engine.
///
/// `NotFound` and `VersionConflict` are recoverable by the caller (re-fetch
/// and retry with fresh state); `Validation` means the request itself is
/// malformed; `Store` is an underlying database failure.
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("task not found")]
    NotFound,
    #[error("stale version — task was modified by another writer")]
    VersionConflict,
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    Store(#[from] sqlx::Error),
}

impl BoardError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BoardError::Validation(msg.into())
    }
}

pub type Result<T, E = BoardError> = std::result::Result<T, E>;
