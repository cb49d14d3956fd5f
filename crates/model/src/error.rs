use std::error::Error;
use std::fmt::{self, Debug, Display};

use thiserror::Error;

/// Errors produced while parsing model identifiers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ParseError {
    /// Not a valid hook name.
    #[error("invalid hook name {0:?}")]
    HookName(String),

    /// Not a valid port or port range.
    #[error("invalid port range {0:?}: {1}")]
    PortRange(String, &'static str),

    /// Not a valid relation id.
    #[error("invalid relation id {0:?}")]
    RelationId(String),

    /// Not a valid storage id.
    #[error("invalid storage id {0:?}")]
    StorageId(String),

    /// Not a valid unit name.
    #[error("invalid unit name {0:?}")]
    UnitName(String),

    /// Not a valid workload status.
    #[error("invalid status {0:?}, expected one of: maintenance, blocked, waiting, active")]
    WorkloadStatus(String),
}

/// The kind of model error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModelErrorKind {
    /// The write was based on a stale settings version.
    VersionConflict,

    /// The requested entity does not exist.
    NotFound,

    /// The unit is not the leader of its application.
    NotLeader,

    /// A temporary failure; the call can be retried unchanged.
    Transient,

    /// Any other failure.
    Other,
}

impl Display for ModelErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for `Model` errors.
pub trait ModelError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ModelErrorKind;

    /// Whether retrying the same call may succeed.
    fn is_transient(&self) -> bool {
        self.kind() == ModelErrorKind::Transient
    }
}
