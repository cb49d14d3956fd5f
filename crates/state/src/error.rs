use std::path::PathBuf;

use thiserror::Error;
use uniter_model::{HookKind, RelationId, UnitName};

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A state file could not be parsed.
    #[error("cannot parse {path}: {message}")]
    Deserialize {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A state violation that would corrupt hook ordering if ignored.
    #[error("invariant violation: {0}")]
    Invariant(#[from] Invariant),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// A state record is internally inconsistent.
    #[error("invalid operation state: {0}")]
    InvalidOperation(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialize(String),
}

/// Bookkeeping rules of the relation lifecycle.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Invariant {
    /// A joined hook was recorded twice for the same member.
    #[error("{unit} already joined relation {relation_id}")]
    DuplicateJoin {
        /// The relation.
        relation_id: RelationId,
        /// The member.
        unit: UnitName,
    },

    /// A hook other than joined was recorded for a member that never joined.
    #[error("{hook} recorded for {unit} before it joined relation {relation_id}")]
    NotJoined {
        /// The relation.
        relation_id: RelationId,
        /// The member.
        unit: UnitName,
        /// The offending hook.
        hook: HookKind,
    },

    /// A relation was removed while members had not departed.
    #[error("relation {relation_id} removed with {remaining} members still joined")]
    MembersRemaining {
        /// The relation.
        relation_id: RelationId,
        /// Number of joined members left.
        remaining: usize,
    },

    /// The relation is not tracked.
    #[error("relation {0} is not tracked")]
    UnknownRelation(RelationId),

    /// A relation hook was recorded without the remote unit it needs.
    #[error("{0} recorded without a remote unit")]
    MissingRemoteUnit(HookKind),

    /// A non-relation hook was passed to the relation tracker.
    #[error("{0} is not a relation hook")]
    NotRelationHook(HookKind),
}
