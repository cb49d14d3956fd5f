use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uniter_model::StorageId;

use crate::error::Result;
use crate::file;

/// What the agent has already hooked, independent of any single operation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LocalState {
    /// The install hook completed.
    pub installed: bool,

    /// The start hook completed.
    pub started: bool,

    /// The stop hook completed.
    pub stopped: bool,

    /// Charm revision last deployed.
    pub charm_revision: u64,

    /// Config version last hooked; `None` means config-changed is owed.
    pub config_version: Option<u64>,

    /// Leadership as of the last leadership hook.
    pub leader: bool,

    /// Leader settings version last hooked.
    pub leader_settings_version: Option<u64>,

    /// Storage the unit ran storage-attached for.
    pub storage: BTreeSet<StorageId>,
}

/// Durable storage for [`LocalState`].
#[derive(Clone, Debug)]
pub struct LocalStateStore {
    path: PathBuf,
}

impl LocalStateStore {
    const FILE_NAME: &'static str = "local.yaml";

    /// A store keeping its document in `state_dir`.
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(Self::FILE_NAME),
        }
    }

    /// Reads the state; a fresh unit reads the default.
    ///
    /// # Errors
    ///
    /// Fails if the document exists but cannot be read or parsed.
    pub fn read(&self) -> Result<LocalState> {
        Ok(file::read_yaml(&self.path)?.unwrap_or_default())
    }

    /// Atomically replaces the state.
    ///
    /// # Errors
    ///
    /// Fails if the document cannot be written durably.
    pub fn write(&self, state: &LocalState) -> Result<()> {
        file::write_yaml(&self.path, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_unit_owes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let state = LocalStateStore::new(dir.path()).read().unwrap();
        assert!(!state.installed);
        assert_eq!(state.config_version, None);
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStateStore::new(dir.path());

        let state = LocalState {
            installed: true,
            started: true,
            charm_revision: 7,
            config_version: Some(3),
            leader: true,
            storage: BTreeSet::from(["data/0".parse().unwrap()]),
            ..LocalState::default()
        };
        store.write(&state).unwrap();
        assert_eq!(store.read().unwrap(), state);
    }
}
