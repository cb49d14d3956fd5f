//! The view of the world one hook execution is entitled to, and the writes it
//! makes.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};
use uniter_model::{
    ConfigSettings, HookInfo, HookKind, Model, ModelError, ModelErrorKind, PortRange, RelationId,
    RetryPolicy, Settings, SettingsChanges, StatusInfo, StorageId, StorageSnapshot, UnitName,
    UnitSnapshot, Versioned,
};

use crate::error::{Error, Result};

/// The relation a relation hook is scoped to.
#[derive(Debug, Clone)]
pub struct ContextRelation {
    id: RelationId,
    endpoint: String,
    members: Vec<UnitName>,
    own: Versioned<Settings>,
    member_settings: BTreeMap<UnitName, Settings>,
}

impl ContextRelation {
    /// Relation id.
    #[must_use]
    pub const fn id(&self) -> RelationId {
        self.id
    }

    /// Local endpoint name.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Remote members visible to the hook, in join order.
    #[must_use]
    pub fn members(&self) -> &[UnitName] {
        &self.members
    }
}

/// A side-effecting call made through a hook tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextCall {
    /// `relation-set`; `None` deletes the key.
    RelationSet {
        /// The relation written.
        relation_id: RelationId,
        /// The key.
        key: String,
        /// The new value.
        value: Option<String>,
    },

    /// `status-set`.
    StatusSet(StatusInfo),

    /// `open-port`.
    OpenPort(PortRange),

    /// `close-port`.
    ClosePort(PortRange),

    /// `leader-set`; `None` deletes the key.
    LeaderSet {
        /// The key.
        key: String,
        /// The new value.
        value: Option<String>,
    },
}

/// Writes buffered by a hook, applied to the model only on commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextChanges {
    /// The unit's own settings in the scoped relation.
    pub relation_settings: SettingsChanges,

    /// Application leader settings.
    pub leader_settings: SettingsChanges,

    /// New workload status.
    pub workload_status: Option<StatusInfo>,

    /// Port ranges to open.
    pub open_ports: BTreeSet<PortRange>,

    /// Port ranges to close.
    pub close_ports: BTreeSet<PortRange>,
}

impl ContextChanges {
    /// Whether there is nothing to commit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relation_settings.is_empty()
            && self.leader_settings.is_empty()
            && self.workload_status.is_none()
            && self.open_ports.is_empty()
            && self.close_ports.is_empty()
    }
}

/// Everything one hook execution can see and change.
///
/// Reads come from a snapshot taken when the context is built; writes go to
/// an overlay and reach the model only through [`commit`](Self::commit).
#[derive(Debug, Clone)]
pub struct HookContext {
    id: String,
    unit: UnitName,
    hook: HookInfo,
    config: ConfigSettings,
    leader: bool,
    leader_settings: Settings,
    workload_status: StatusInfo,
    opened_ports: BTreeSet<PortRange>,
    storage: BTreeMap<StorageId, StorageSnapshot>,
    relation_ids: BTreeMap<String, Vec<RelationId>>,
    relation: Option<ContextRelation>,
    changes: ContextChanges,
    calls: Vec<ContextCall>,
}

impl HookContext {
    /// Reads everything `hook` is entitled to see.
    ///
    /// `members` are the remote units that have joined the hook's relation;
    /// the joining unit is added and the departing unit removed as the hook
    /// kind requires. Only the scoped relation's settings are read.
    ///
    /// # Errors
    ///
    /// Returns the model error if a read fails.
    pub async fn build<M: Model>(
        model: &M,
        id: impl Into<String>,
        hook: HookInfo,
        snapshot: &UnitSnapshot,
        members: Vec<UnitName>,
    ) -> std::result::Result<Self, M::Error> {
        let config = model.config().await?.value;
        let leader_settings = model.leader_settings().await?.value;
        let workload_status = model.workload_status().await?;
        let opened_ports = model.opened_ports().await?;

        let mut relation_ids: BTreeMap<String, Vec<RelationId>> = BTreeMap::new();
        for (relation_id, relation) in &snapshot.relations {
            relation_ids
                .entry(relation.endpoint.clone())
                .or_default()
                .push(*relation_id);
        }

        let relation = match (hook.relation_id, &hook.endpoint) {
            (Some(relation_id), Some(endpoint)) => Some(
                read_relation(model, relation_id, endpoint, &hook, members).await?,
            ),
            _ => None,
        };

        Ok(Self {
            id: id.into(),
            unit: model.unit().clone(),
            config,
            leader: snapshot.leader,
            leader_settings,
            workload_status,
            opened_ports,
            storage: snapshot.storage.clone(),
            relation_ids,
            relation,
            hook,
            changes: ContextChanges::default(),
            calls: Vec::new(),
        })
    }

    /// Credential the hook tools present.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The unit the hook runs for.
    #[must_use]
    pub const fn unit(&self) -> &UnitName {
        &self.unit
    }

    /// The hook being run.
    #[must_use]
    pub const fn hook(&self) -> &HookInfo {
        &self.hook
    }

    /// Application configuration.
    #[must_use]
    pub const fn config(&self) -> &ConfigSettings {
        &self.config
    }

    /// Whether the unit held leadership when the hook started.
    #[must_use]
    pub const fn is_leader(&self) -> bool {
        self.leader
    }

    /// Leader settings including this hook's pending writes.
    #[must_use]
    pub fn leader_settings(&self) -> Settings {
        self.changes.leader_settings.applied(&self.leader_settings)
    }

    /// Workload status including a pending `status-set`.
    #[must_use]
    pub fn workload_status(&self) -> &StatusInfo {
        self.changes
            .workload_status
            .as_ref()
            .unwrap_or(&self.workload_status)
    }

    /// Open port ranges including pending opens and closes.
    #[must_use]
    pub fn opened_ports(&self) -> BTreeSet<PortRange> {
        self.opened_ports
            .iter()
            .filter(|range| !self.changes.close_ports.contains(range))
            .chain(&self.changes.open_ports)
            .copied()
            .collect()
    }

    /// Attached storage, optionally only instances of storage `name`.
    pub fn storage_ids<'a>(&'a self, name: Option<&'a str>) -> impl Iterator<Item = &'a StorageId> {
        self.storage
            .keys()
            .filter(move |id| name.is_none_or(|name| id.storage_name() == name))
    }

    /// An attached storage instance, defaulting to the hook's own.
    ///
    /// # Errors
    ///
    /// Fails if no instance is named and the hook is not storage-scoped, or
    /// the instance is not attached.
    pub fn storage(&self, id: Option<&StorageId>) -> Result<(&StorageId, &StorageSnapshot)> {
        let id = id
            .or(self.hook.storage_id.as_ref())
            .ok_or(Error::NoStorage)?;
        self.storage
            .get_key_value(id)
            .ok_or_else(|| Error::UnknownStorage(id.clone()))
    }

    /// Endpoints with at least one relation.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.relation_ids.keys().map(String::as_str)
    }

    /// Relation ids for `endpoint`.
    #[must_use]
    pub fn relation_ids(&self, endpoint: &str) -> &[RelationId] {
        self.relation_ids
            .get(endpoint)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The scoped relation, if `id` names it or is omitted.
    ///
    /// # Errors
    ///
    /// Fails if `id` names another relation, or no relation is named and the
    /// hook is not relation-scoped.
    pub fn relation(&self, id: Option<RelationId>) -> Result<&ContextRelation> {
        match (&self.relation, id) {
            (Some(relation), None) => Ok(relation),
            (Some(relation), Some(id)) if relation.id == id => Ok(relation),
            (_, Some(id)) => Err(Error::RelationNotInScope(id)),
            (None, None) => Err(Error::NoRelation),
        }
    }

    /// The remote unit the hook is about.
    #[must_use]
    pub const fn remote_unit(&self) -> Option<&UnitName> {
        self.hook.remote_unit.as_ref()
    }

    /// Settings `unit` published in the relation; this unit's own settings
    /// include pending writes.
    ///
    /// # Errors
    ///
    /// Fails if the relation is out of scope or `unit` is not a member.
    pub fn relation_settings(&self, id: Option<RelationId>, unit: &UnitName) -> Result<Settings> {
        let relation = self.relation(id)?;
        if *unit == self.unit {
            return Ok(self.changes.relation_settings.applied(&relation.own.value));
        }
        relation
            .member_settings
            .get(unit)
            .cloned()
            .ok_or_else(|| Error::UnknownMember {
                relation_id: relation.id,
                unit: unit.clone(),
            })
    }

    /// Buffers a write to this unit's settings; an empty value deletes.
    ///
    /// # Errors
    ///
    /// Fails if the relation is out of scope or the key is invalid.
    pub fn set_relation_setting(
        &mut self,
        id: Option<RelationId>,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let relation_id = self.relation(id)?.id;
        check_key(key)?;

        self.changes.relation_settings.set(key, value);
        self.calls.push(ContextCall::RelationSet {
            relation_id,
            key: key.to_string(),
            value: (!value.is_empty()).then(|| value.to_string()),
        });
        Ok(())
    }

    /// Buffers a workload status.
    pub fn set_workload_status(&mut self, status: StatusInfo) {
        self.changes.workload_status = Some(status.clone());
        self.calls.push(ContextCall::StatusSet(status));
    }

    /// Buffers opening a port range. Reopening an open range is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the range overlaps a different open range.
    pub fn open_port(&mut self, range: PortRange) -> Result<()> {
        if let Some(existing) = self
            .opened_ports()
            .into_iter()
            .find(|existing| *existing != range && existing.overlaps(&range))
        {
            return Err(Error::PortConflict {
                requested: range,
                existing,
            });
        }

        self.changes.close_ports.remove(&range);
        if !self.opened_ports.contains(&range) {
            self.changes.open_ports.insert(range);
        }
        self.calls.push(ContextCall::OpenPort(range));
        Ok(())
    }

    /// Buffers closing a port range. Closing a closed range is a no-op.
    pub fn close_port(&mut self, range: PortRange) {
        self.changes.open_ports.remove(&range);
        if self.opened_ports.contains(&range) {
            self.changes.close_ports.insert(range);
        }
        self.calls.push(ContextCall::ClosePort(range));
    }

    /// Buffers a leader settings write; an empty value deletes.
    ///
    /// # Errors
    ///
    /// Fails if the unit is not the leader or the key is invalid.
    pub fn set_leader_setting(&mut self, key: &str, value: &str) -> Result<()> {
        if !self.leader {
            return Err(Error::NotLeader);
        }
        check_key(key)?;

        self.changes.leader_settings.set(key, value);
        self.calls.push(ContextCall::LeaderSet {
            key: key.to_string(),
            value: (!value.is_empty()).then(|| value.to_string()),
        });
        Ok(())
    }

    /// Pending writes.
    #[must_use]
    pub const fn changes(&self) -> &ContextChanges {
        &self.changes
    }

    /// Side-effecting calls in the order they were made.
    #[must_use]
    pub fn calls(&self) -> &[ContextCall] {
        &self.calls
    }

    /// Applies every pending write to the model.
    ///
    /// A transient failure retries the whole overlay with backoff. A version
    /// conflict on relation settings re-reads the settings and retries against
    /// the new version, unless the stored settings already reflect the
    /// overlay. Committing the same context twice leaves the model as one
    /// commit would.
    ///
    /// # Errors
    ///
    /// Returns the model error once `retry` runs out of attempts or on a
    /// failure that retrying cannot fix. Calling again with the same context
    /// picks up where the failed call stopped.
    pub async fn commit<M: Model>(
        &self,
        model: &M,
        retry: &RetryPolicy,
    ) -> std::result::Result<(), M::Error> {
        if self.changes.is_empty() {
            debug!(context = %self.id, "nothing to commit");
            return Ok(());
        }

        let mut attempt = 1;
        loop {
            match self.apply(model, retry).await {
                Ok(()) => {
                    info!(context = %self.id, hook = %self.hook, calls = self.calls.len(), "context committed");
                    return Ok(());
                }
                Err(e) if e.is_transient() && retry.should_retry(attempt) => {
                    let delay = retry.backoff(attempt);
                    warn!(context = %self.id, attempt, ?delay, "commit failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn apply<M: Model>(
        &self,
        model: &M,
        retry: &RetryPolicy,
    ) -> std::result::Result<(), M::Error> {
        if let Some(relation) = &self.relation {
            if !self.changes.relation_settings.is_empty() {
                self.apply_relation_settings(model, relation, retry).await?;
            }
        }

        if !self.changes.leader_settings.is_empty() {
            let current = model.leader_settings().await?;
            if !self.changes.leader_settings.is_reflected_in(&current.value) {
                model.set_leader_settings(&self.changes.leader_settings).await?;
            }
        }

        if let Some(status) = &self.changes.workload_status {
            model.set_workload_status(status).await?;
        }

        if !self.changes.open_ports.is_empty() || !self.changes.close_ports.is_empty() {
            model
                .update_ports(&self.changes.open_ports, &self.changes.close_ports)
                .await?;
        }

        Ok(())
    }

    async fn apply_relation_settings<M: Model>(
        &self,
        model: &M,
        relation: &ContextRelation,
        retry: &RetryPolicy,
    ) -> std::result::Result<(), M::Error> {
        let changes = &self.changes.relation_settings;
        let mut expected = relation.own.version;
        let mut conflicts = 0;

        loop {
            match model
                .set_relation_settings(relation.id, changes, expected)
                .await
            {
                Ok(version) => {
                    debug!(relation_id = %relation.id, version, "relation settings committed");
                    return Ok(());
                }
                Err(e)
                    if e.kind() == ModelErrorKind::VersionConflict
                        && retry.should_retry(conflicts + 1) =>
                {
                    conflicts += 1;
                    let current = model.relation_settings(relation.id, &self.unit).await?;
                    if changes.is_reflected_in(&current.value) {
                        debug!(relation_id = %relation.id, "relation settings already committed");
                        return Ok(());
                    }
                    debug!(
                        relation_id = %relation.id,
                        expected,
                        actual = current.version,
                        "rebasing relation settings"
                    );
                    expected = current.version;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drops every pending write.
    pub fn discard(self) {
        debug!(
            context = %self.id,
            hook = %self.hook,
            calls = self.calls.len(),
            "context discarded"
        );
    }
}

async fn read_relation<M: Model>(
    model: &M,
    relation_id: RelationId,
    endpoint: &str,
    hook: &HookInfo,
    mut members: Vec<UnitName>,
) -> std::result::Result<ContextRelation, M::Error> {
    if let Some(remote) = &hook.remote_unit {
        match hook.kind {
            HookKind::RelationJoined | HookKind::RelationChanged => {
                if !members.contains(remote) {
                    members.push(remote.clone());
                }
            }
            HookKind::RelationDeparted => members.retain(|member| member != remote),
            _ => {}
        }
    }

    let own = or_empty(model.relation_settings(relation_id, model.unit()).await)?;

    let mut member_settings = BTreeMap::new();
    for unit in members.iter().chain(hook.remote_unit.as_ref()) {
        let settings = or_empty(model.relation_settings(relation_id, unit).await)?;
        member_settings.insert(unit.clone(), settings.value);
    }

    Ok(ContextRelation {
        id: relation_id,
        endpoint: endpoint.to_string(),
        members,
        own,
        member_settings,
    })
}

/// Treats settings of a relation or unit that has left the model as empty.
fn or_empty<E: ModelError>(
    result: std::result::Result<Versioned<Settings>, E>,
) -> std::result::Result<Versioned<Settings>, E> {
    match result {
        Err(e) if e.kind() == ModelErrorKind::NotFound => Ok(Versioned::default()),
        other => other,
    }
}

pub(crate) fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('=') || key.chars().any(char::is_whitespace) {
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use uniter_model::WorkloadStatus;
    use uniter_model_memory::{MemoryModel, settings};

    use super::*;

    const DB: RelationId = RelationId(1);
    const CACHE: RelationId = RelationId(2);

    fn unit(name: &str) -> UnitName {
        UnitName::new(name).unwrap()
    }

    fn model() -> MemoryModel {
        let model = MemoryModel::new(unit("wordpress/0"));
        model.add_relation(DB, "db");
        model.join(DB, &unit("mysql/0"), settings([("host", "10.0.0.1")]));
        model.join(DB, &unit("mysql/1"), settings([("host", "10.0.0.2")]));
        model.add_relation(CACHE, "cache");
        model.join(CACHE, &unit("memcached/0"), settings([("secret", "s3cr3t")]));
        model
    }

    async fn context(model: &MemoryModel, kind: HookKind, remote: &str) -> HookContext {
        let snapshot = model.snapshot().await.unwrap();
        let hook = HookInfo::relation(kind, DB, "db", Some(unit(remote)), Some(1));
        HookContext::build(model, "ctx", hook, &snapshot, vec![unit("mysql/0")])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reads_are_scoped_to_the_hook_relation() {
        let model = model();
        let ctx = context(&model, HookKind::RelationChanged, "mysql/0").await;

        let host = ctx.relation_settings(None, &unit("mysql/0")).unwrap();
        assert_eq!(host, settings([("host", "10.0.0.1")]));
        assert_eq!(ctx.relation_ids("cache"), [CACHE]);
        assert_matches!(
            ctx.relation_settings(Some(CACHE), &unit("memcached/0")),
            Err(Error::RelationNotInScope(CACHE))
        );
        assert_matches!(
            ctx.relation_settings(None, &unit("mysql/1")),
            Err(Error::UnknownMember { .. })
        );
    }

    #[tokio::test]
    async fn test_membership_follows_hook_kind() {
        let model = model();

        let joined = context(&model, HookKind::RelationJoined, "mysql/1").await;
        assert_eq!(
            joined.relation(None).unwrap().members(),
            [unit("mysql/0"), unit("mysql/1")]
        );
        assert_eq!(
            joined.relation_settings(None, &unit("mysql/1")).unwrap(),
            settings([("host", "10.0.0.2")])
        );

        let departed = context(&model, HookKind::RelationDeparted, "mysql/0").await;
        assert!(departed.relation(None).unwrap().members().is_empty());
        // The departing unit's settings stay readable.
        assert!(departed.relation_settings(None, &unit("mysql/0")).is_ok());
    }

    #[tokio::test]
    async fn test_writes_are_buffered_until_commit() {
        let model = model();
        let mut ctx = context(&model, HookKind::RelationChanged, "mysql/0").await;
        let me = unit("wordpress/0");

        ctx.set_relation_setting(None, "url", "http://blog").unwrap();
        ctx.set_workload_status(StatusInfo::new(WorkloadStatus::Active, "ready"));
        ctx.open_port("80/tcp".parse().unwrap()).unwrap();

        assert_eq!(
            ctx.relation_settings(None, &me).unwrap(),
            settings([("url", "http://blog")])
        );
        assert!(model.current_relation_settings(DB, &me).value.is_empty());
        assert_eq!(model.write_count(), 0);

        ctx.commit(&model, &RetryPolicy::immediate(3)).await.unwrap();

        assert_eq!(
            model.current_relation_settings(DB, &me).value,
            settings([("url", "http://blog")])
        );
        assert_eq!(model.current_workload_status().message, "ready");
        assert_eq!(model.current_ports().len(), 1);
        assert_eq!(ctx.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_commit_twice_leaves_one_commit() {
        let model = model();
        let mut ctx = context(&model, HookKind::RelationChanged, "mysql/0").await;
        let me = unit("wordpress/0");

        ctx.set_relation_setting(None, "url", "http://blog").unwrap();
        ctx.set_relation_setting(None, "stale", "").unwrap();
        ctx.open_port("8080/tcp".parse().unwrap()).unwrap();

        let retry = RetryPolicy::immediate(3);
        ctx.commit(&model, &retry).await.unwrap();
        let first = model.current_relation_settings(DB, &me);
        let ports = model.current_ports();

        ctx.commit(&model, &retry).await.unwrap();
        assert_eq!(model.current_relation_settings(DB, &me), first);
        assert_eq!(model.current_ports(), ports);
    }

    #[tokio::test]
    async fn test_lost_acknowledgement_is_retried() {
        let model = model();
        let mut ctx = context(&model, HookKind::RelationChanged, "mysql/0").await;
        let me = unit("wordpress/0");

        ctx.set_relation_setting(None, "url", "http://blog").unwrap();
        model.drop_next_write_acks(1);
        ctx.commit(&model, &RetryPolicy::immediate(3)).await.unwrap();

        let stored = model.current_relation_settings(DB, &me);
        assert_eq!(stored.value, settings([("url", "http://blog")]));
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_version_conflict_rebases() {
        let model = model();
        let mut ctx = context(&model, HookKind::RelationChanged, "mysql/0").await;
        let me = unit("wordpress/0");

        let mut concurrent = SettingsChanges::new();
        concurrent.set("port", "3306");
        model.set_relation_settings(DB, &concurrent, 0).await.unwrap();

        ctx.set_relation_setting(None, "url", "http://blog").unwrap();
        ctx.commit(&model, &RetryPolicy::immediate(3)).await.unwrap();

        assert_eq!(
            model.current_relation_settings(DB, &me).value,
            settings([("port", "3306"), ("url", "http://blog")])
        );
    }

    #[tokio::test]
    async fn test_commit_gives_up_after_its_attempts() {
        let model = model();
        let mut ctx = context(&model, HookKind::RelationChanged, "mysql/0").await;

        let waiting = StatusInfo::new(WorkloadStatus::Waiting, "db");
        ctx.set_workload_status(waiting.clone());
        model.fail_next_writes(5);
        let err = ctx
            .commit(&model, &RetryPolicy::immediate(3))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_ne!(model.current_workload_status(), waiting);

        ctx.commit(&model, &RetryPolicy::immediate(3)).await.unwrap();
        assert_eq!(model.current_workload_status(), waiting);
    }

    #[tokio::test]
    async fn test_leader_writes_require_leadership() {
        let model = model();
        let mut ctx = context(&model, HookKind::RelationChanged, "mysql/0").await;
        assert_matches!(ctx.set_leader_setting("k", "v"), Err(Error::NotLeader));

        model.set_leader(true);
        let mut ctx = context(&model, HookKind::RelationChanged, "mysql/0").await;
        ctx.set_leader_setting("k", "v").unwrap();
        assert_eq!(ctx.leader_settings(), settings([("k", "v")]));
        assert_matches!(
            ctx.set_leader_setting("bad key", "v"),
            Err(Error::InvalidKey(_))
        );
    }

    #[tokio::test]
    async fn test_port_conflicts() {
        let model = model();
        let mut ctx = context(&model, HookKind::RelationChanged, "mysql/0").await;
        let range: PortRange = "8000-8100/tcp".parse().unwrap();

        ctx.open_port(range).unwrap();
        ctx.open_port(range).unwrap();
        assert_matches!(
            ctx.open_port("8080/tcp".parse().unwrap()),
            Err(Error::PortConflict { existing, .. }) if existing == range
        );
        ctx.open_port("8080/udp".parse().unwrap()).unwrap();

        ctx.close_port(range);
        assert_eq!(ctx.opened_ports().len(), 1);
    }
}
