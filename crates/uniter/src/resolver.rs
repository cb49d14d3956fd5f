//! Decides what the unit does next.
//!
//! The resolver is a pure function of what the model says, what the unit has
//! already hooked and the operation in progress. It never touches the model
//! or the disk, so the same inputs always give the same decision; resuming
//! after a crash relies on that.

use uniter_model::{HookInfo, HookKind, Life, ResolvedMode, UnitSnapshot};
use uniter_state::{LocalState, OperationState, OperationStatus, RelationStateTracker};

/// Knobs for the order hooks are chosen in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResolverPolicy {
    /// Run leader-elected and leader-deposed before owed relation hooks.
    pub leadership_before_relations: bool,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            leadership_before_relations: true,
        }
    }
}

/// What the control loop should do next.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    /// Run the operation's hook.
    Run(OperationState),

    /// Record the operation as done without running its hook.
    Skip(OperationState),

    /// A hook failed; wait for the operator.
    AwaitResolution,

    /// Nothing to do until the model changes.
    Idle,

    /// Teardown is complete; mark the unit dead.
    Terminate,
}

/// Everything a decision depends on.
#[derive(Clone, Copy, Debug)]
pub struct ResolverInput<'a> {
    /// The latest model snapshot.
    pub snapshot: &'a UnitSnapshot,

    /// What the unit has hooked.
    pub local: &'a LocalState,

    /// Relation membership, synced with `snapshot`.
    pub relations: &'a RelationStateTracker,

    /// The operation in progress, if any. A completed record must be
    /// finished before resolving.
    pub operation: Option<&'a OperationState>,
}

/// Chooses the next hook by a fixed priority order.
#[derive(Clone, Debug, Default)]
pub struct Resolver {
    policy: ResolverPolicy,
}

impl Resolver {
    /// A resolver with `policy`.
    #[must_use]
    pub const fn new(policy: ResolverPolicy) -> Self {
        Self { policy }
    }

    /// The policy in use.
    #[must_use]
    pub const fn policy(&self) -> ResolverPolicy {
        self.policy
    }

    /// Decides what to do next.
    #[must_use]
    pub fn next(&self, input: &ResolverInput<'_>) -> Decision {
        let ResolverInput {
            snapshot,
            local,
            relations,
            operation,
        } = *input;
        let dying = snapshot.life != Life::Alive;

        if let Some(operation) = operation {
            match operation.status {
                OperationStatus::Pending | OperationStatus::InFlight => {
                    return Decision::Run(operation.with_status(OperationStatus::Pending));
                }
                OperationStatus::Error => {
                    return match snapshot.resolved {
                        _ if dying => Decision::Skip(operation.clone()),
                        ResolvedMode::RetryHooks => {
                            Decision::Run(operation.with_status(OperationStatus::Pending))
                        }
                        ResolvedMode::NoHooks => Decision::Skip(operation.clone()),
                        ResolvedMode::None => Decision::AwaitResolution,
                    };
                }
                OperationStatus::Completed => {}
            }
        }

        let run = |hook: HookInfo| Decision::Run(OperationState::pending(hook, snapshot));

        if dying {
            return teardown(local, relations).map_or(Decision::Terminate, run);
        }

        if local.installed && snapshot.charm_revision > local.charm_revision {
            return run(HookInfo::new(HookKind::UpgradeCharm));
        }

        if !local.installed {
            return run(HookInfo::new(HookKind::Install));
        }

        if self.policy.leadership_before_relations {
            if let Some(hook) = leadership(snapshot, local) {
                return run(hook);
            }
        }

        if let Some(hook) = storage(snapshot, local) {
            return run(hook);
        }

        if !local.started {
            if config_owed(snapshot, local) {
                return run(HookInfo::new(HookKind::ConfigChanged));
            }
            return run(HookInfo::new(HookKind::Start));
        }

        if let Some(hook) = relations.next_hook() {
            return run(hook);
        }

        if !self.policy.leadership_before_relations {
            if let Some(hook) = leadership(snapshot, local) {
                return run(hook);
            }
        }

        if config_owed(snapshot, local) {
            return run(HookInfo::new(HookKind::ConfigChanged));
        }

        if !snapshot.leader
            && local.leader_settings_version != Some(snapshot.leader_settings_version)
        {
            return run(HookInfo::new(HookKind::LeaderSettingsChanged));
        }

        Decision::Idle
    }
}

/// Hooks a dying unit still owes: relations, then storage, then stop.
fn teardown(local: &LocalState, relations: &RelationStateTracker) -> Option<HookInfo> {
    if !local.installed {
        return None;
    }
    if let Some(hook) = relations.next_hook() {
        return Some(hook);
    }
    if let Some(id) = local.storage.iter().next() {
        return Some(HookInfo::storage(HookKind::StorageDetaching, id.clone()));
    }
    (!local.stopped).then(|| HookInfo::new(HookKind::Stop))
}

fn leadership(snapshot: &UnitSnapshot, local: &LocalState) -> Option<HookInfo> {
    match (snapshot.leader, local.leader) {
        (true, false) => Some(HookInfo::new(HookKind::LeaderElected)),
        (false, true) => Some(HookInfo::new(HookKind::LeaderDeposed)),
        _ => None,
    }
}

fn storage(snapshot: &UnitSnapshot, local: &LocalState) -> Option<HookInfo> {
    let attached = snapshot
        .storage
        .iter()
        .find(|(id, storage)| storage.life == Life::Alive && !local.storage.contains(*id));
    if let Some((id, _)) = attached {
        return Some(HookInfo::storage(HookKind::StorageAttached, id.clone()));
    }

    local
        .storage
        .iter()
        .find(|id| {
            snapshot
                .storage
                .get(*id)
                .is_none_or(|storage| storage.life != Life::Alive)
        })
        .map(|id| HookInfo::storage(HookKind::StorageDetaching, id.clone()))
}

fn config_owed(snapshot: &UnitSnapshot, local: &LocalState) -> bool {
    local.config_version != Some(snapshot.config_version)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use uniter_model::{
        RelationId, RelationSnapshot, StatusInfo, StorageId, StorageSnapshot, UnitName,
    };

    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        relations: RelationStateTracker,
        snapshot: UnitSnapshot,
        local: LocalState,
    }

    impl Fixture {
        /// An installed, started unit with nothing owed.
        fn settled() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let relations = RelationStateTracker::load(dir.path()).unwrap();
            let snapshot = UnitSnapshot {
                charm_revision: 1,
                config_version: 1,
                ..UnitSnapshot::default()
            };
            let local = LocalState {
                installed: true,
                started: true,
                charm_revision: 1,
                config_version: Some(1),
                leader_settings_version: Some(0),
                ..LocalState::default()
            };
            Self {
                _dir: dir,
                relations,
                snapshot,
                local,
            }
        }

        fn fresh() -> Self {
            Self {
                local: LocalState::default(),
                ..Self::settled()
            }
        }

        fn join(&mut self, id: u32, member: &str) {
            let relation = self
                .snapshot
                .relations
                .entry(RelationId(id))
                .or_insert_with(|| RelationSnapshot::new("db"));
            relation.members.insert(UnitName::new(member).unwrap(), 1);
            self.sync();
        }

        fn sync(&mut self) {
            let dying = self.snapshot.life != Life::Alive;
            self.relations.sync(&self.snapshot, dying);
        }

        fn next(&self, policy: ResolverPolicy) -> Decision {
            self.next_with(policy, None)
        }

        fn next_with(&self, policy: ResolverPolicy, operation: Option<&OperationState>) -> Decision {
            Resolver::new(policy).next(&ResolverInput {
                snapshot: &self.snapshot,
                local: &self.local,
                relations: &self.relations,
                operation,
            })
        }

        fn next_hook(&self) -> Option<String> {
            match self.next(ResolverPolicy::default()) {
                Decision::Run(operation) => Some(operation.hook.name()),
                _ => None,
            }
        }

        /// Applies the bookkeeping of the next hook as if it had run.
        fn complete_next(&mut self) -> String {
            let Decision::Run(operation) = self.next(ResolverPolicy::default()) else {
                panic!("expected a hook to run");
            };
            crate::operation::record(&operation, &mut self.local, &mut self.relations).unwrap();
            operation.hook.name()
        }
    }

    #[test]
    fn test_fresh_unit_installs_then_configures_then_starts() {
        let mut fixture = Fixture::fresh();
        assert_eq!(fixture.complete_next(), "install");
        assert_eq!(fixture.complete_next(), "config-changed");
        assert_eq!(fixture.complete_next(), "start");
        assert_eq!(fixture.complete_next(), "leader-settings-changed");
        assert_eq!(fixture.next(ResolverPolicy::default()), Decision::Idle);
    }

    #[test]
    fn test_settled_unit_is_idle() {
        let fixture = Fixture::settled();
        assert_eq!(fixture.next(ResolverPolicy::default()), Decision::Idle);
    }

    #[test]
    fn test_config_change_is_owed_once() {
        let mut fixture = Fixture::settled();
        fixture.snapshot.config_version = 3;
        fixture.local.config_version = Some(2);
        assert_eq!(fixture.complete_next(), "config-changed");
        assert_eq!(fixture.local.config_version, Some(3));
        assert_eq!(fixture.next(ResolverPolicy::default()), Decision::Idle);
    }

    #[test]
    fn test_upgrade_comes_before_everything_else() {
        let mut fixture = Fixture::settled();
        fixture.snapshot.charm_revision = 2;
        fixture.snapshot.config_version = 2;
        fixture.snapshot.leader = true;
        fixture.join(1, "mysql/0");

        assert_eq!(fixture.complete_next(), "upgrade-charm");
        assert_eq!(fixture.complete_next(), "leader-elected");
        assert_eq!(fixture.complete_next(), "db-relation-joined");
        assert_eq!(fixture.complete_next(), "db-relation-changed");
        assert_eq!(fixture.complete_next(), "config-changed");
        assert_eq!(fixture.next(ResolverPolicy::default()), Decision::Idle);
    }

    #[test]
    fn test_leadership_after_relations_when_configured() {
        let mut fixture = Fixture::settled();
        fixture.snapshot.leader = true;
        fixture.join(1, "mysql/0");

        let policy = ResolverPolicy {
            leadership_before_relations: false,
        };
        assert_matches!(
            fixture.next(policy),
            Decision::Run(operation) if operation.hook.kind == HookKind::RelationJoined
        );
        assert_matches!(
            fixture.next(ResolverPolicy::default()),
            Decision::Run(operation) if operation.hook.kind == HookKind::LeaderElected
        );
    }

    #[test]
    fn test_follower_hooks_leader_settings() {
        let mut fixture = Fixture::settled();
        fixture.snapshot.leader_settings_version = 4;
        assert_eq!(fixture.complete_next(), "leader-settings-changed");
        assert_eq!(fixture.next(ResolverPolicy::default()), Decision::Idle);

        fixture.snapshot.leader = true;
        fixture.snapshot.leader_settings_version = 5;
        assert_eq!(fixture.complete_next(), "leader-elected");
        assert_eq!(fixture.next(ResolverPolicy::default()), Decision::Idle);
    }

    #[test]
    fn test_storage_attach_and_detach() {
        let mut fixture = Fixture::settled();
        let id: StorageId = "data/0".parse().unwrap();
        fixture.snapshot.storage.insert(
            id.clone(),
            StorageSnapshot {
                location: "/srv/data".into(),
                ..StorageSnapshot::default()
            },
        );
        assert_eq!(fixture.complete_next(), "data-storage-attached");
        assert!(fixture.local.storage.contains(&id));
        assert_eq!(fixture.next(ResolverPolicy::default()), Decision::Idle);

        fixture.snapshot.storage.remove(&id);
        assert_eq!(fixture.complete_next(), "data-storage-detaching");
        assert!(fixture.local.storage.is_empty());
    }

    #[test]
    fn test_pending_operation_is_resumed() {
        let fixture = Fixture::settled();
        let operation = OperationState::pending(HookInfo::new(HookKind::ConfigChanged), &fixture.snapshot)
            .with_status(OperationStatus::InFlight);

        assert_matches!(
            fixture.next_with(ResolverPolicy::default(), Some(&operation)),
            Decision::Run(resumed) if resumed.status == OperationStatus::Pending
                && resumed.hook.kind == HookKind::ConfigChanged
        );
    }

    #[test]
    fn test_failed_operation_follows_resolution() {
        let mut fixture = Fixture::settled();
        let mut failed = OperationState::pending(HookInfo::new(HookKind::ConfigChanged), &fixture.snapshot)
            .with_status(OperationStatus::Error);
        failed.error = Some("exit status: 1".to_string());
        failed.workload_status = Some(StatusInfo::default());

        assert_eq!(
            fixture.next_with(ResolverPolicy::default(), Some(&failed)),
            Decision::AwaitResolution
        );

        fixture.snapshot.resolved = ResolvedMode::RetryHooks;
        assert_matches!(
            fixture.next_with(ResolverPolicy::default(), Some(&failed)),
            Decision::Run(retry) if retry.status == OperationStatus::Pending && retry.error.is_some()
        );

        fixture.snapshot.resolved = ResolvedMode::NoHooks;
        assert_eq!(
            fixture.next_with(ResolverPolicy::default(), Some(&failed)),
            Decision::Skip(failed.clone())
        );

        fixture.snapshot.resolved = ResolvedMode::None;
        fixture.snapshot.life = Life::Dying;
        assert_eq!(
            fixture.next_with(ResolverPolicy::default(), Some(&failed)),
            Decision::Skip(failed)
        );
    }

    #[test]
    fn test_dying_unit_tears_down_in_order() {
        let mut fixture = Fixture::settled();
        let id: StorageId = "data/0".parse().unwrap();
        fixture.local.storage.insert(id);
        fixture.join(1, "mysql/0");
        assert_eq!(fixture.complete_next(), "db-relation-joined");
        assert_eq!(fixture.complete_next(), "db-relation-changed");

        fixture.snapshot.life = Life::Dying;
        fixture.snapshot.config_version = 9;
        fixture.sync();

        assert_eq!(fixture.complete_next(), "db-relation-departed");
        assert_eq!(fixture.complete_next(), "db-relation-broken");
        fixture.sync();
        assert_eq!(fixture.complete_next(), "data-storage-detaching");
        assert_eq!(fixture.complete_next(), "stop");
        assert_eq!(fixture.next(ResolverPolicy::default()), Decision::Terminate);
    }

    #[test]
    fn test_uninstalled_dying_unit_terminates() {
        let mut fixture = Fixture::fresh();
        fixture.snapshot.life = Life::Dying;
        assert_eq!(fixture.next_hook(), None);
        assert_eq!(fixture.next(ResolverPolicy::default()), Decision::Terminate);
    }
}
