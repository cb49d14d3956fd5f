//! Abstract interface to the remote model a unit agent is driven by, and the
//! vocabulary shared by the agent's crates.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod hook;
mod ports;
mod relation;
mod retry;
mod settings;
mod status;
mod storage;
mod unit;

pub use error::{ModelError, ModelErrorKind, ParseError};
pub use hook::{HookInfo, HookKind};
pub use ports::{PortRange, Protocol};
pub use relation::{RelationId, RelationSnapshot};
pub use retry::RetryPolicy;
pub use settings::{ConfigSettings, Settings, SettingsChanges, Versioned};
pub use status::{AgentStatus, StatusInfo, WorkloadStatus};
pub use storage::{StorageId, StorageKind, StorageSnapshot};
pub use unit::{Life, ResolvedMode, UnitName};

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Everything the resolver needs to know about the unit, read in one call.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnitSnapshot {
    /// Lifecycle of the unit.
    #[serde(default)]
    pub life: Life,

    /// Operator resolution request for a failed hook.
    #[serde(default)]
    pub resolved: ResolvedMode,

    /// Charm revision the unit should be running.
    #[serde(default)]
    pub charm_revision: u64,

    /// Version of the application configuration.
    #[serde(default)]
    pub config_version: u64,

    /// Whether the unit currently holds leadership.
    #[serde(default)]
    pub leader: bool,

    /// Version of the application's leader settings.
    #[serde(default)]
    pub leader_settings_version: u64,

    /// Relations the unit is in scope of, keyed by id.
    #[serde(default)]
    pub relations: BTreeMap<RelationId, RelationSnapshot>,

    /// Storage attached to the unit.
    #[serde(default)]
    pub storage: BTreeMap<StorageId, StorageSnapshot>,
}

/// A hint about what changed in the model.
///
/// Notifications may be coalesced, reordered or dropped; consumers re-read
/// the snapshot rather than trusting them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ModelChange {
    /// Unit life or resolved mode changed.
    Unit,

    /// The charm revision changed.
    Charm,

    /// Configuration changed.
    Config,

    /// Leadership or leader settings changed.
    Leadership,

    /// Relation membership or settings changed.
    Relations,

    /// Storage attachments changed.
    Storage,
}

/// Stream of change notifications for one unit.
pub type ChangeStream = BoxStream<'static, ModelChange>;

/// Abstract interface to the remote model, scoped to a single unit.
///
/// Every write is safe to retry with the same arguments.
#[async_trait]
pub trait Model
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for this model.
    type Error: ModelError;

    /// The unit this handle acts for.
    fn unit(&self) -> &UnitName;

    /// Subscribes to change notifications.
    async fn watch(&self) -> Result<ChangeStream, Self::Error>;

    /// Reads the current snapshot of everything the resolver looks at.
    async fn snapshot(&self) -> Result<UnitSnapshot, Self::Error>;

    /// Reads the application configuration.
    async fn config(&self) -> Result<Versioned<ConfigSettings>, Self::Error>;

    /// Reads the settings `unit` published in a relation.
    async fn relation_settings(
        &self,
        relation_id: RelationId,
        unit: &UnitName,
    ) -> Result<Versioned<Settings>, Self::Error>;

    /// Writes this unit's settings in a relation.
    ///
    /// Fails with [`ModelErrorKind::VersionConflict`] if the stored version is
    /// not `expected_version`. Returns the new version.
    async fn set_relation_settings(
        &self,
        relation_id: RelationId,
        changes: &SettingsChanges,
        expected_version: u64,
    ) -> Result<u64, Self::Error>;

    /// Reads the application's leader settings.
    async fn leader_settings(&self) -> Result<Versioned<Settings>, Self::Error>;

    /// Writes leader settings. Fails with [`ModelErrorKind::NotLeader`] when
    /// the unit does not hold leadership.
    async fn set_leader_settings(&self, changes: &SettingsChanges) -> Result<u64, Self::Error>;

    /// Reads the unit's workload status.
    async fn workload_status(&self) -> Result<StatusInfo, Self::Error>;

    /// Sets the unit's workload status.
    async fn set_workload_status(&self, status: &StatusInfo) -> Result<(), Self::Error>;

    /// Sets the agent's own status.
    async fn set_agent_status(&self, status: AgentStatus, message: &str)
    -> Result<(), Self::Error>;

    /// Port ranges currently opened for the unit.
    async fn opened_ports(&self) -> Result<BTreeSet<PortRange>, Self::Error>;

    /// Opens and closes port ranges in one change.
    async fn update_ports(
        &self,
        open: &BTreeSet<PortRange>,
        close: &BTreeSet<PortRange>,
    ) -> Result<(), Self::Error>;

    /// Clears a pending resolution request.
    async fn clear_resolved(&self) -> Result<(), Self::Error>;

    /// Marks the unit dead once teardown is complete.
    async fn ensure_dead(&self) -> Result<(), Self::Error>;
}
