//! Durable local state of a unit agent: the current operation, hooked
//! watermarks and relation membership.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod file;
mod local;
mod operation;
mod relation;

pub use error::{Error, Invariant, Result};
pub use local::{LocalState, LocalStateStore};
pub use operation::{OperationKind, OperationState, OperationStatus, OperationStore};
pub use relation::{MemberState, RelationState, RelationStateTracker};

use std::path::{Path, PathBuf};

/// The three stores that live under one state directory.
#[derive(Debug)]
pub struct StateDir {
    /// The current operation.
    pub operation: OperationStore,

    /// Hooked watermarks.
    pub local: LocalStateStore,

    /// Relation membership.
    pub relations: RelationStateTracker,
}

impl StateDir {
    /// Opens (or initialises) the state kept under `dir`.
    ///
    /// # Errors
    ///
    /// Fails if existing relation documents cannot be loaded.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            operation: OperationStore::new(dir),
            local: LocalStateStore::new(dir),
            relations: RelationStateTracker::load(relations_dir(dir))?,
        })
    }
}

fn relations_dir(dir: &Path) -> PathBuf {
    dir.join("relations")
}
