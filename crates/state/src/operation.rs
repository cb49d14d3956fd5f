use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uniter_model::{HookInfo, HookKind, StatusInfo, UnitSnapshot};

use crate::error::{Error, Result};
use crate::file;

/// What the current operation does.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Runs the install hook.
    Install,

    /// Runs any other hook.
    RunHook,

    /// Deploys a new charm revision and runs upgrade-charm.
    UpgradeCharm,
}

impl OperationKind {
    /// The operation kind that runs a hook of `kind`.
    #[must_use]
    pub const fn for_hook(kind: HookKind) -> Self {
        match kind {
            HookKind::Install => Self::Install,
            HookKind::UpgradeCharm => Self::UpgradeCharm,
            _ => Self::RunHook,
        }
    }
}

/// Progress of the current operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationStatus {
    /// Chosen but the hook has not been started.
    Pending,

    /// The hook process may be running.
    InFlight,

    /// The hook failed and awaits resolution.
    Error,

    /// The hook succeeded and its changes are committed; only local
    /// bookkeeping remains.
    Completed,
}

/// The durable record of the one operation a unit is executing.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperationState {
    /// What the operation does.
    pub kind: OperationKind,

    /// The hook it runs.
    pub hook: HookInfo,

    /// How far it got.
    pub status: OperationStatus,

    /// Charm revision the hook runs against.
    #[serde(default)]
    pub charm_revision: u64,

    /// Leadership when the operation started.
    #[serde(default)]
    pub leader: bool,

    /// Configuration version when the operation started.
    #[serde(default)]
    pub config_version: u64,

    /// Leader settings version when the operation started.
    #[serde(default)]
    pub leader_settings_version: u64,

    /// Exit detail of a failed hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Workload status from before the failure, restored on resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_status: Option<StatusInfo>,
}

impl OperationState {
    /// A pending operation for `hook`, chosen against `snapshot`.
    #[must_use]
    pub fn pending(hook: HookInfo, snapshot: &UnitSnapshot) -> Self {
        Self {
            kind: OperationKind::for_hook(hook.kind),
            hook,
            status: OperationStatus::Pending,
            charm_revision: snapshot.charm_revision,
            leader: snapshot.leader,
            config_version: snapshot.config_version,
            leader_settings_version: snapshot.leader_settings_version,
            error: None,
            workload_status: None,
        }
    }

    /// The same operation with a different status.
    #[must_use]
    pub fn with_status(&self, status: OperationStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Checks the record is consistent with itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] describing the inconsistency.
    pub fn validate(&self) -> Result<()> {
        self.hook
            .validate()
            .map_err(|e| Error::InvalidOperation(format!("{}: {e}", self.hook.name())))?;

        if self.kind != OperationKind::for_hook(self.hook.kind) {
            return Err(Error::InvalidOperation(format!(
                "{:?} operation cannot run {}",
                self.kind, self.hook.kind
            )));
        }

        if self.status == OperationStatus::Error && self.error.is_none() {
            return Err(Error::InvalidOperation(
                "failed operation without error detail".to_string(),
            ));
        }

        Ok(())
    }
}

/// Durable storage for the unit's single [`OperationState`].
#[derive(Clone, Debug)]
pub struct OperationStore {
    path: PathBuf,
}

impl OperationStore {
    const FILE_NAME: &'static str = "operation.yaml";

    /// A store keeping its record in `state_dir`.
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(Self::FILE_NAME),
        }
    }

    /// Path of the record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current record, if any.
    ///
    /// # Errors
    ///
    /// Fails if the record cannot be read, parsed or validated.
    pub fn read(&self) -> Result<Option<OperationState>> {
        let state: Option<OperationState> = file::read_yaml(&self.path)?;
        if let Some(state) = &state {
            state.validate()?;
        }
        Ok(state)
    }

    /// Atomically replaces the record.
    ///
    /// # Errors
    ///
    /// Fails if the record is invalid or cannot be written durably.
    pub fn write(&self, state: &OperationState) -> Result<()> {
        state.validate()?;
        debug!(hook = %state.hook, status = ?state.status, "writing operation state");
        file::write_yaml(&self.path, state)
    }

    /// Removes the record.
    ///
    /// # Errors
    ///
    /// Fails if the record cannot be removed.
    pub fn clear(&self) -> Result<()> {
        debug!("clearing operation state");
        file::remove(&self.path)
    }
}
