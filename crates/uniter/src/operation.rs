//! Local bookkeeping for an operation whose hook has run or been skipped.

use tracing::debug;
use uniter_model::HookKind;
use uniter_state::{LocalState, OperationState, RelationStateTracker, Result};

/// Records that `operation`'s hook is done.
///
/// Relation hooks update `relations` and persist immediately; everything
/// else updates `local`, which the caller persists.
///
/// # Errors
///
/// Fails if the relation tracker rejects the hook or cannot persist it.
pub fn record(
    operation: &OperationState,
    local: &mut LocalState,
    relations: &mut RelationStateTracker,
) -> Result<()> {
    let hook = &operation.hook;
    match hook.kind {
        HookKind::Install => {
            local.installed = true;
            local.charm_revision = operation.charm_revision;
        }
        HookKind::UpgradeCharm => {
            local.charm_revision = operation.charm_revision;
            local.config_version = None;
        }
        HookKind::Start => local.started = true,
        HookKind::Stop => local.stopped = true,
        HookKind::ConfigChanged => local.config_version = Some(operation.config_version),
        HookKind::LeaderElected => local.leader = true,
        HookKind::LeaderDeposed => local.leader = false,
        HookKind::LeaderSettingsChanged => {
            local.leader_settings_version = Some(operation.leader_settings_version);
        }
        HookKind::StorageAttached => {
            if let Some(id) = &hook.storage_id {
                local.storage.insert(id.clone());
            }
        }
        HookKind::StorageDetaching => {
            if let Some(id) = &hook.storage_id {
                local.storage.remove(id);
            }
        }
        HookKind::RelationJoined
        | HookKind::RelationChanged
        | HookKind::RelationDeparted
        | HookKind::RelationBroken => relations.mark_hooked(hook)?,
    }
    debug!(%hook, "hook recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use uniter_model::{HookInfo, RelationId, RelationSnapshot, StorageId, UnitName, UnitSnapshot};

    use super::*;

    fn snapshot() -> UnitSnapshot {
        UnitSnapshot {
            charm_revision: 4,
            config_version: 3,
            leader_settings_version: 7,
            ..UnitSnapshot::default()
        }
    }

    #[test]
    fn test_watermarks() {
        let dir = tempfile::tempdir().unwrap();
        let mut relations = RelationStateTracker::load(dir.path()).unwrap();
        let mut local = LocalState {
            config_version: Some(2),
            ..LocalState::default()
        };
        let snapshot = snapshot();

        for kind in [HookKind::Install, HookKind::ConfigChanged, HookKind::Start] {
            let operation = OperationState::pending(HookInfo::new(kind), &snapshot);
            record(&operation, &mut local, &mut relations).unwrap();
        }
        assert!(local.installed && local.started);
        assert_eq!(local.charm_revision, 4);
        assert_eq!(local.config_version, Some(3));

        let upgrade = OperationState::pending(HookInfo::new(HookKind::UpgradeCharm), &snapshot);
        record(&upgrade, &mut local, &mut relations).unwrap();
        assert_eq!(local.config_version, None);

        let settings =
            OperationState::pending(HookInfo::new(HookKind::LeaderSettingsChanged), &snapshot);
        record(&settings, &mut local, &mut relations).unwrap();
        assert_eq!(local.leader_settings_version, Some(7));
    }

    #[test]
    fn test_storage_and_relations() {
        let dir = tempfile::tempdir().unwrap();
        let mut relations = RelationStateTracker::load(dir.path()).unwrap();
        let mut local = LocalState::default();
        let mut snapshot = snapshot();
        let id: StorageId = "data/0".parse().unwrap();

        let attached = OperationState::pending(
            HookInfo::storage(HookKind::StorageAttached, id.clone()),
            &snapshot,
        );
        record(&attached, &mut local, &mut relations).unwrap();
        assert!(local.storage.contains(&id));

        let mut db = RelationSnapshot::new("db");
        db.members.insert(UnitName::new("mysql/0").unwrap(), 1);
        snapshot.relations.insert(RelationId(1), db);
        relations.sync(&snapshot, false);

        let joined = relations.next_hook().unwrap();
        record(&OperationState::pending(joined, &snapshot), &mut local, &mut relations).unwrap();
        assert_eq!(
            relations.next_hook().map(|hook| hook.kind),
            Some(HookKind::RelationChanged)
        );

        let detaching =
            OperationState::pending(HookInfo::storage(HookKind::StorageDetaching, id), &snapshot);
        record(&detaching, &mut local, &mut relations).unwrap();
        assert!(local.storage.is_empty());
    }
}
