//! In-memory implementation of the model interface, for tests and for running
//! the agent locally against a fixture file.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod fixture;

pub use error::Error;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use fixture::Fixture;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;
use uniter_model::{
    AgentStatus, ChangeStream, ConfigSettings, Life, Model, ModelChange, PortRange, RelationId,
    RelationSnapshot, ResolvedMode, Settings, SettingsChanges, StatusInfo, StorageId,
    StorageKind, StorageSnapshot, UnitName, UnitSnapshot, Versioned,
};

#[derive(Debug, Default)]
struct Inner {
    snapshot: UnitSnapshot,
    config: ConfigSettings,
    relation_settings: HashMap<(RelationId, UnitName), Versioned<Settings>>,
    leader_settings: Settings,
    workload_status: StatusInfo,
    workload_history: Vec<StatusInfo>,
    agent_status: (AgentStatus, String),
    ports: BTreeSet<PortRange>,
    failing_writes: u32,
    unacknowledged_writes: u32,
    writes: u64,
}

impl Inner {
    /// Consumes one injected failure, if any. Returns `Err` when the write
    /// must fail before being applied and `Ok(true)` when it must be applied
    /// but reported as failed.
    fn take_injected_failure(&mut self) -> Result<bool, Error> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(Error::Unavailable);
        }
        if self.unacknowledged_writes > 0 {
            self.unacknowledged_writes -= 1;
            return Ok(true);
        }
        Ok(false)
    }
}

/// In-memory model for a single unit.
#[derive(Clone, Debug)]
pub struct MemoryModel {
    unit: UnitName,
    inner: Arc<Mutex<Inner>>,
    changes: broadcast::Sender<ModelChange>,
}

impl MemoryModel {
    /// Creates an empty model for `unit`: alive, charm revision 1, no
    /// configuration and no relations.
    #[must_use]
    pub fn new(unit: UnitName) -> Self {
        let (changes, _) = broadcast::channel(256);
        let inner = Inner {
            snapshot: UnitSnapshot {
                charm_revision: 1,
                ..UnitSnapshot::default()
            },
            ..Inner::default()
        };

        Self {
            unit,
            inner: Arc::new(Mutex::new(inner)),
            changes,
        }
    }

    /// Creates a model from a YAML fixture file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_fixture_file<P: AsRef<Path>>(path: P, unit: UnitName) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Fixture(format!(
                "failed to read {}: {e}",
                path.as_ref().display()
            ))
        })?;

        let fixture: Fixture = serde_yaml::from_str(&content)
            .map_err(|e| Error::Fixture(format!("failed to parse fixture: {e}")))?;

        let model = Self::new(unit);
        {
            let mut inner = model.inner.lock();
            inner.snapshot.life = fixture.life;
            inner.snapshot.charm_revision = fixture.charm_revision;
            inner.snapshot.leader = fixture.leader;
            inner.snapshot.storage = fixture.storage;
            inner.workload_status = fixture.workload_status;
            if !fixture.config.is_empty() {
                inner.config = fixture.config;
                inner.snapshot.config_version = 1;
            }
            if !fixture.leader_settings.is_empty() {
                inner.leader_settings = fixture.leader_settings;
                inner.snapshot.leader_settings_version = 1;
            }

            for (id, relation) in fixture.relations {
                let mut snapshot = RelationSnapshot::new(relation.endpoint);
                snapshot.life = relation.life;
                for (member, settings) in relation.members {
                    snapshot.members.insert(member.clone(), 1);
                    inner
                        .relation_settings
                        .insert((id, member), Versioned::new(settings, 1));
                }
                inner.snapshot.relations.insert(id, snapshot);
            }
        }

        Ok(model)
    }

    fn notify(&self, change: ModelChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    fn mutate<T>(&self, change: ModelChange, f: impl FnOnce(&mut Inner) -> T) -> T {
        let result = f(&mut self.inner.lock());
        self.notify(change);
        result
    }

    /// Sets a configuration value and bumps the configuration version.
    pub fn set_config(&self, key: impl Into<String>, value: serde_json::Value) {
        self.mutate(ModelChange::Config, |inner| {
            inner.config.insert(key.into(), value);
            inner.snapshot.config_version += 1;
        });
    }

    /// Bumps the configuration version without changing any value.
    pub fn touch_config(&self) {
        self.mutate(ModelChange::Config, |inner| {
            inner.snapshot.config_version += 1;
        });
    }

    /// Sets the charm revision the unit should run.
    pub fn set_charm_revision(&self, revision: u64) {
        self.mutate(ModelChange::Charm, |inner| {
            inner.snapshot.charm_revision = revision;
        });
    }

    /// Sets the unit's life.
    pub fn set_life(&self, life: Life) {
        self.mutate(ModelChange::Unit, |inner| inner.snapshot.life = life);
    }

    /// Requests resolution of a failed hook.
    pub fn set_resolved(&self, mode: ResolvedMode) {
        self.mutate(ModelChange::Unit, |inner| inner.snapshot.resolved = mode);
    }

    /// Grants or revokes leadership.
    pub fn set_leader(&self, leader: bool) {
        self.mutate(ModelChange::Leadership, |inner| {
            inner.snapshot.leader = leader;
        });
    }

    /// Writes a leader setting as if another unit had led.
    pub fn set_leader_setting(&self, key: impl Into<String>, value: impl Into<String>) {
        self.mutate(ModelChange::Leadership, |inner| {
            inner.leader_settings.insert(key.into(), value.into());
            inner.snapshot.leader_settings_version += 1;
        });
    }

    /// Adds a live relation with no members.
    pub fn add_relation(&self, id: RelationId, endpoint: impl Into<String>) {
        self.mutate(ModelChange::Relations, |inner| {
            inner
                .snapshot
                .relations
                .insert(id, RelationSnapshot::new(endpoint));
        });
    }

    /// Sets a relation's life.
    pub fn set_relation_life(&self, id: RelationId, life: Life) {
        self.mutate(ModelChange::Relations, |inner| {
            if let Some(relation) = inner.snapshot.relations.get_mut(&id) {
                relation.life = life;
            }
        });
    }

    /// Removes a relation and every settings bucket in it.
    pub fn remove_relation(&self, id: RelationId) {
        self.mutate(ModelChange::Relations, |inner| {
            inner.snapshot.relations.remove(&id);
            inner.relation_settings.retain(|(rid, _), _| *rid != id);
        });
    }

    /// Brings a remote unit into a relation with initial settings.
    pub fn join(&self, id: RelationId, member: &UnitName, settings: Settings) {
        self.mutate(ModelChange::Relations, |inner| {
            let key = (id, member.clone());
            let version = inner
                .relation_settings
                .get(&key)
                .map_or(1, |current| current.version + 1);
            inner
                .relation_settings
                .insert(key, Versioned::new(settings, version));
            if let Some(relation) = inner.snapshot.relations.get_mut(&id) {
                relation.members.insert(member.clone(), version);
            }
        });
    }

    /// Changes one setting published by a remote unit.
    pub fn change_settings(
        &self,
        id: RelationId,
        member: &UnitName,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.mutate(ModelChange::Relations, |inner| {
            let entry = inner
                .relation_settings
                .entry((id, member.clone()))
                .or_default();
            entry.value.insert(key.into(), value.into());
            entry.version += 1;
            let version = entry.version;
            if let Some(version_seen) = inner
                .snapshot
                .relations
                .get_mut(&id)
                .and_then(|relation| relation.members.get_mut(member))
            {
                *version_seen = version;
            }
        });
    }

    /// Takes a remote unit out of a relation. Its settings remain readable.
    pub fn depart(&self, id: RelationId, member: &UnitName) {
        self.mutate(ModelChange::Relations, |inner| {
            if let Some(relation) = inner.snapshot.relations.get_mut(&id) {
                relation.members.shift_remove(member);
            }
        });
    }

    /// Attaches a storage instance.
    pub fn attach_storage(&self, id: StorageId, kind: StorageKind, location: impl Into<std::path::PathBuf>) {
        self.mutate(ModelChange::Storage, |inner| {
            inner.snapshot.storage.insert(
                id,
                StorageSnapshot {
                    kind,
                    location: location.into(),
                    life: Life::Alive,
                },
            );
        });
    }

    /// Marks a storage instance as detaching.
    pub fn detach_storage(&self, id: &StorageId) {
        self.mutate(ModelChange::Storage, |inner| {
            if let Some(storage) = inner.snapshot.storage.get_mut(id) {
                storage.life = Life::Dying;
            }
        });
    }

    /// Removes a storage instance entirely.
    pub fn remove_storage(&self, id: &StorageId) {
        self.mutate(ModelChange::Storage, |inner| {
            inner.snapshot.storage.remove(id);
        });
    }

    /// Makes the next `count` writes fail without being applied.
    pub fn fail_next_writes(&self, count: u32) {
        self.inner.lock().failing_writes = count;
    }

    /// Makes the next `count` writes apply but report a transient failure,
    /// as if the response had been lost.
    pub fn drop_next_write_acks(&self, count: u32) {
        self.inner.lock().unacknowledged_writes = count;
    }

    /// Number of writes that reached the model.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }

    /// The unit's current life.
    #[must_use]
    pub fn current_life(&self) -> Life {
        self.inner.lock().snapshot.life
    }

    /// The current resolution request.
    #[must_use]
    pub fn current_resolved(&self) -> ResolvedMode {
        self.inner.lock().snapshot.resolved
    }

    /// The unit's current workload status.
    #[must_use]
    pub fn current_workload_status(&self) -> StatusInfo {
        self.inner.lock().workload_status.clone()
    }

    /// Every workload status set so far, oldest first.
    #[must_use]
    pub fn workload_status_history(&self) -> Vec<StatusInfo> {
        self.inner.lock().workload_history.clone()
    }

    /// The agent's current status.
    #[must_use]
    pub fn current_agent_status(&self) -> (AgentStatus, String) {
        self.inner.lock().agent_status.clone()
    }

    /// Settings currently stored for `unit` in a relation.
    #[must_use]
    pub fn current_relation_settings(&self, id: RelationId, unit: &UnitName) -> Versioned<Settings> {
        self.inner
            .lock()
            .relation_settings
            .get(&(id, unit.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Leader settings currently stored.
    #[must_use]
    pub fn current_leader_settings(&self) -> Settings {
        self.inner.lock().leader_settings.clone()
    }

    /// Ports currently opened.
    #[must_use]
    pub fn current_ports(&self) -> BTreeSet<PortRange> {
        self.inner.lock().ports.clone()
    }
}

#[async_trait]
impl Model for MemoryModel {
    type Error = Error;

    fn unit(&self) -> &UnitName {
        &self.unit
    }

    async fn watch(&self) -> Result<ChangeStream, Self::Error> {
        let stream = BroadcastStream::new(self.changes.subscribe())
            // A lagged receiver still means something changed.
            .map(|change| change.unwrap_or(ModelChange::Unit))
            .boxed();
        Ok(stream)
    }

    async fn snapshot(&self) -> Result<UnitSnapshot, Self::Error> {
        Ok(self.inner.lock().snapshot.clone())
    }

    async fn config(&self) -> Result<Versioned<ConfigSettings>, Self::Error> {
        let inner = self.inner.lock();
        Ok(Versioned::new(
            inner.config.clone(),
            inner.snapshot.config_version,
        ))
    }

    async fn relation_settings(
        &self,
        relation_id: RelationId,
        unit: &UnitName,
    ) -> Result<Versioned<Settings>, Self::Error> {
        let inner = self.inner.lock();
        if !inner.snapshot.relations.contains_key(&relation_id) {
            return Err(Error::NotFound(format!("relation {relation_id}")));
        }
        Ok(inner
            .relation_settings
            .get(&(relation_id, unit.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_relation_settings(
        &self,
        relation_id: RelationId,
        changes: &SettingsChanges,
        expected_version: u64,
    ) -> Result<u64, Self::Error> {
        let (version, lost_ack) = {
            let mut inner = self.inner.lock();
            let lost_ack = inner.take_injected_failure()?;
            if !inner.snapshot.relations.contains_key(&relation_id) {
                return Err(Error::NotFound(format!("relation {relation_id}")));
            }

            let bucket = inner
                .relation_settings
                .entry((relation_id, self.unit.clone()))
                .or_default();
            if bucket.version != expected_version {
                return Err(Error::VersionConflict {
                    expected: expected_version,
                    actual: bucket.version,
                });
            }
            changes.apply_to(&mut bucket.value);
            bucket.version += 1;
            let version = bucket.version;
            inner.writes += 1;
            (version, lost_ack)
        };

        debug!(%relation_id, version, "relation settings written");
        self.notify(ModelChange::Relations);

        if lost_ack {
            return Err(Error::Unavailable);
        }
        Ok(version)
    }

    async fn leader_settings(&self) -> Result<Versioned<Settings>, Self::Error> {
        let inner = self.inner.lock();
        Ok(Versioned::new(
            inner.leader_settings.clone(),
            inner.snapshot.leader_settings_version,
        ))
    }

    async fn set_leader_settings(&self, changes: &SettingsChanges) -> Result<u64, Self::Error> {
        let (version, lost_ack) = {
            let mut inner = self.inner.lock();
            let lost_ack = inner.take_injected_failure()?;
            if !inner.snapshot.leader {
                return Err(Error::NotLeader(self.unit.to_string()));
            }
            if !changes.is_reflected_in(&inner.leader_settings) {
                changes.apply_to(&mut inner.leader_settings);
                inner.snapshot.leader_settings_version += 1;
            }
            inner.writes += 1;
            (inner.snapshot.leader_settings_version, lost_ack)
        };

        self.notify(ModelChange::Leadership);

        if lost_ack {
            return Err(Error::Unavailable);
        }
        Ok(version)
    }

    async fn workload_status(&self) -> Result<StatusInfo, Self::Error> {
        Ok(self.inner.lock().workload_status.clone())
    }

    async fn set_workload_status(&self, status: &StatusInfo) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock();
        let lost_ack = inner.take_injected_failure()?;
        inner.workload_status = status.clone();
        inner.workload_history.push(status.clone());
        inner.writes += 1;
        if lost_ack {
            return Err(Error::Unavailable);
        }
        Ok(())
    }

    async fn set_agent_status(
        &self,
        status: AgentStatus,
        message: &str,
    ) -> Result<(), Self::Error> {
        self.inner.lock().agent_status = (status, message.to_string());
        Ok(())
    }

    async fn opened_ports(&self) -> Result<BTreeSet<PortRange>, Self::Error> {
        Ok(self.inner.lock().ports.clone())
    }

    async fn update_ports(
        &self,
        open: &BTreeSet<PortRange>,
        close: &BTreeSet<PortRange>,
    ) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock();
        let lost_ack = inner.take_injected_failure()?;
        for range in close {
            inner.ports.remove(range);
        }
        inner.ports.extend(open.iter().copied());
        inner.writes += 1;
        if lost_ack {
            return Err(Error::Unavailable);
        }
        Ok(())
    }

    async fn clear_resolved(&self) -> Result<(), Self::Error> {
        self.inner.lock().snapshot.resolved = ResolvedMode::None;
        Ok(())
    }

    async fn ensure_dead(&self) -> Result<(), Self::Error> {
        self.mutate(ModelChange::Unit, |inner| {
            inner.snapshot.life = Life::Dead;
        });
        Ok(())
    }
}

/// Builds an ordered settings map from pairs.
#[must_use]
pub fn settings<const N: usize>(pairs: [(&str, &str); N]) -> Settings {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>()
}
