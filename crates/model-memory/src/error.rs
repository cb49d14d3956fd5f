use thiserror::Error;
use uniter_model::{ModelError, ModelErrorKind};

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The fixture file could not be read or parsed.
    #[error("fixture error: {0}")]
    Fixture(String),

    /// The unit does not hold leadership.
    #[error("cannot write leader settings: {0} is not the leader")]
    NotLeader(String),

    /// The entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A failure injected by a test.
    #[error("model unavailable (injected failure)")]
    Unavailable,

    /// The write was based on a stale version.
    #[error("settings version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        /// Version the caller based its write on.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },
}

impl ModelError for Error {
    fn kind(&self) -> ModelErrorKind {
        match self {
            Self::Fixture(_) => ModelErrorKind::Other,
            Self::NotLeader(_) => ModelErrorKind::NotLeader,
            Self::NotFound(_) => ModelErrorKind::NotFound,
            Self::Unavailable => ModelErrorKind::Transient,
            Self::VersionConflict { .. } => ModelErrorKind::VersionConflict,
        }
    }
}
