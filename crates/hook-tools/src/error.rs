use std::io;

use thiserror::Error;
use uniter_model::{PortRange, RelationId, StorageId, UnitName};

/// Result type for hook tools.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors a hook tool reports to its caller.
#[derive(Debug, Error)]
pub enum Error {
    /// The hook this tool was called for has finished.
    #[error("context closed")]
    ContextClosed,

    /// A context was opened while another one was still live.
    #[error("context {0} is still open")]
    ContextBusy(String),

    /// Bad invocation; reported with exit code 2.
    #[error("{0}")]
    Usage(String),

    /// Argument parsing stopped, for a usage error or a help request.
    #[error(transparent)]
    Clap(#[from] clap::Error),

    /// The tool name is not known.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    /// The unit does not hold leadership.
    #[error("cannot write leadership settings: not the leader")]
    NotLeader,

    /// No relation was named and the hook is not relation-scoped.
    #[error("no relation id specified")]
    NoRelation,

    /// The relation is not the one the hook runs for.
    #[error("relation {0} is not available to this hook")]
    RelationNotInScope(RelationId),

    /// The unit is not a member of the relation.
    #[error("unit {unit} is not a member of relation {relation_id}")]
    UnknownMember {
        /// The relation.
        relation_id: RelationId,
        /// The unit asked for.
        unit: UnitName,
    },

    /// No storage was named and the hook is not storage-scoped.
    #[error("no storage instance specified")]
    NoStorage,

    /// The storage instance is not attached.
    #[error("storage {0} is not attached")]
    UnknownStorage(StorageId),

    /// A settings key is not acceptable.
    #[error("invalid setting key {0:?}")]
    InvalidKey(String),

    /// The port range overlaps a different open range.
    #[error("cannot open {requested}: conflicts with {existing}")]
    PortConflict {
        /// The range asked for.
        requested: PortRange,
        /// The range already open.
        existing: PortRange,
    },

    /// Output could not be rendered.
    #[error("cannot format output: {0}")]
    Format(String),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] io::Error),
}

impl Error {
    /// Exit code the tool process should report.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Clap(e) => e.exit_code(),
            _ => 1,
        }
    }
}
