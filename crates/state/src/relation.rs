//! Per-relation membership bookkeeping that decides which relation hook is
//! owed next.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uniter_model::{HookInfo, HookKind, Life, RelationId, UnitName, UnitSnapshot};

use crate::error::{Error, Invariant, Result};
use crate::file;

/// What the agent knows about one remote member of a relation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MemberState {
    /// Settings version last seen in the model.
    pub observed: u64,

    /// Settings version the last changed hook ran with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooked: Option<u64>,

    /// The joined hook ran for this member.
    pub joined: bool,

    /// The member is still in the model.
    pub present: bool,
}

/// What the agent knows about one relation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelationState {
    /// Relation id.
    pub id: RelationId,

    /// Local endpoint name.
    pub endpoint: String,

    /// Remote members in the order they were first seen.
    #[serde(default)]
    pub members: IndexMap<UnitName, MemberState>,

    /// The relation left the model or the unit is dying.
    #[serde(default)]
    pub removed: bool,
}

impl RelationState {
    fn new(id: RelationId, endpoint: impl Into<String>) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            members: IndexMap::new(),
            removed: false,
        }
    }

    /// Members the joined hook ran for, in join order.
    pub fn joined_members(&self) -> impl Iterator<Item = &UnitName> {
        self.members
            .iter()
            .filter(|(_, member)| member.joined)
            .map(|(unit, _)| unit)
    }

    fn pending_join(&self) -> Option<(&UnitName, &MemberState)> {
        if self.removed {
            return None;
        }
        self.members
            .iter()
            .find(|(_, member)| member.present && !member.joined)
    }

    fn pending_change(&self) -> Option<(&UnitName, &MemberState)> {
        self.members.iter().find(|(_, member)| {
            member.joined
                && member.present
                && member.hooked.is_none_or(|hooked| member.observed > hooked)
        })
    }

    fn pending_depart(&self) -> Option<(&UnitName, &MemberState)> {
        self.members
            .iter()
            .find(|(_, member)| member.joined && !member.present)
    }

    fn pending_broken(&self) -> bool {
        self.removed && self.members.values().all(|member| !member.joined)
    }

    fn next_hook(&self) -> Option<HookInfo> {
        let member_hook = |kind, (unit, member): (&UnitName, &MemberState)| {
            HookInfo::relation(
                kind,
                self.id,
                self.endpoint.clone(),
                Some(unit.clone()),
                Some(member.observed),
            )
        };

        if let Some(found) = self.pending_join() {
            return Some(member_hook(HookKind::RelationJoined, found));
        }
        if let Some(found) = self.pending_change() {
            return Some(member_hook(HookKind::RelationChanged, found));
        }
        if let Some(found) = self.pending_depart() {
            return Some(member_hook(HookKind::RelationDeparted, found));
        }
        if self.pending_broken() {
            return Some(HookInfo::relation(
                HookKind::RelationBroken,
                self.id,
                self.endpoint.clone(),
                None,
                None,
            ));
        }
        None
    }

    /// Marks everything absent and drops members that never joined.
    fn mark_removed(&mut self) {
        self.removed = true;
        for member in self.members.values_mut() {
            member.present = false;
        }
        self.members.retain(|_, member| member.joined);
    }
}

/// Tracks relation membership and the hooks already run for it.
///
/// Mutated only by the control loop: [`sync`](Self::sync) folds in what the
/// model says, [`mark_hooked`](Self::mark_hooked) records what ran.
#[derive(Debug)]
pub struct RelationStateTracker {
    dir: PathBuf,
    relations: BTreeMap<RelationId, RelationState>,
}

impl RelationStateTracker {
    /// Restores a tracker from the documents in `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the directory or a document in it cannot be read.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut relations = BTreeMap::new();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self { dir, relations });
            }
            Err(e) => return Err(Error::Io("error reading relation state directory", e)),
        };

        for entry in entries {
            let path = entry
                .map_err(|e| Error::Io("error reading relation state directory", e))?
                .path();
            if path.extension().is_none_or(|ext| ext != "yaml") {
                continue;
            }
            if let Some(state) = file::read_yaml::<RelationState>(&path)? {
                relations.insert(state.id, state);
            }
        }

        debug!(relations = relations.len(), "loaded relation state");
        Ok(Self { dir, relations })
    }

    /// A tracked relation.
    #[must_use]
    pub fn relation(&self, id: RelationId) -> Option<&RelationState> {
        self.relations.get(&id)
    }

    /// All tracked relations in id order.
    pub fn relations(&self) -> impl Iterator<Item = &RelationState> {
        self.relations.values()
    }

    /// Starts tracking a relation.
    pub fn add_relation(&mut self, id: RelationId, endpoint: &str) {
        self.relations
            .entry(id)
            .or_insert_with(|| RelationState::new(id, endpoint));
    }

    /// Records the settings version observed for `member`, adding the member
    /// after the existing ones if it is new.
    ///
    /// # Errors
    ///
    /// Fails if the relation is not tracked.
    pub fn update(&mut self, id: RelationId, member: &UnitName, version: u64) -> Result<()> {
        let relation = self
            .relations
            .get_mut(&id)
            .ok_or(Invariant::UnknownRelation(id))?;
        if relation.removed {
            return Ok(());
        }

        let state = relation.members.entry(member.clone()).or_default();
        state.observed = version;
        state.present = true;
        Ok(())
    }

    /// Reconciles with a model snapshot.
    ///
    /// Live relations are registered, observed versions refreshed and members
    /// no longer in the model flagged as departing. Relations no longer in the
    /// model or no longer alive, or every relation when `dying`, are flagged
    /// as removed; a relation is never registered again once removed.
    pub fn sync(&mut self, snapshot: &UnitSnapshot, dying: bool) {
        for (id, relation) in &snapshot.relations {
            let alive = !dying && relation.life == Life::Alive;
            let state = match self.relations.entry(*id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) if alive => {
                    entry.insert(RelationState::new(*id, relation.endpoint.clone()))
                }
                // Never entered, or already broken.
                Entry::Vacant(_) => continue,
            };

            if !alive || state.removed {
                state.mark_removed();
                continue;
            }

            for (unit, member) in &mut state.members {
                member.present = relation.members.contains_key(unit);
            }
            for (unit, version) in &relation.members {
                let member = state.members.entry(unit.clone()).or_default();
                member.observed = *version;
                member.present = true;
            }
            state.members.retain(|_, member| member.joined || member.present);
        }

        for (id, state) in &mut self.relations {
            if !snapshot.relations.contains_key(id) {
                state.mark_removed();
            }
        }
    }

    /// The next member owed a joined hook.
    #[must_use]
    pub fn members_pending_join(&self, id: RelationId) -> Option<&UnitName> {
        self.relations
            .get(&id)
            .and_then(RelationState::pending_join)
            .map(|(unit, _)| unit)
    }

    /// The next member owed a changed hook.
    #[must_use]
    pub fn members_pending_change(&self, id: RelationId) -> Option<&UnitName> {
        self.relations
            .get(&id)
            .and_then(RelationState::pending_change)
            .map(|(unit, _)| unit)
    }

    /// The next member owed a departed hook.
    #[must_use]
    pub fn members_pending_depart(&self, id: RelationId) -> Option<&UnitName> {
        self.relations
            .get(&id)
            .and_then(RelationState::pending_depart)
            .map(|(unit, _)| unit)
    }

    /// Whether the relation is owed its broken hook.
    #[must_use]
    pub fn pending_broken(&self, id: RelationId) -> bool {
        self.relations
            .get(&id)
            .is_some_and(RelationState::pending_broken)
    }

    /// The next relation hook owed, across relations in id order.
    #[must_use]
    pub fn next_hook(&self) -> Option<HookInfo> {
        self.relations.values().find_map(RelationState::next_hook)
    }

    /// Whether any relation hook is owed.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.next_hook().is_some()
    }

    /// Records that a relation hook ran and its changes were committed.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Invariant`] if the hook is out of order for the
    /// member or relation, or if the new state cannot be persisted.
    pub fn mark_hooked(&mut self, hook: &HookInfo) -> Result<()> {
        let id = hook
            .relation_id
            .ok_or(Invariant::NotRelationHook(hook.kind))?;

        if hook.kind == HookKind::RelationBroken {
            return self.remove(id);
        }

        let unit = hook
            .remote_unit
            .as_ref()
            .ok_or(Invariant::MissingRemoteUnit(hook.kind))?;
        let path = self.path_for(id);
        let relation = self
            .relations
            .get_mut(&id)
            .ok_or(Invariant::UnknownRelation(id))?;

        match hook.kind {
            HookKind::RelationJoined => {
                // Resumed after the member left and was dropped: it still
                // needs its departed hook.
                let member = relation.members.entry(unit.clone()).or_default();
                if member.joined {
                    return Err(Invariant::DuplicateJoin {
                        relation_id: id,
                        unit: unit.clone(),
                    }
                    .into());
                }
                member.joined = true;
                member.hooked = None;
            }
            HookKind::RelationChanged => {
                let member = joined_member(relation, unit, hook.kind)?;
                member.hooked = Some(hook.settings_version.unwrap_or(member.observed));
            }
            HookKind::RelationDeparted => {
                joined_member(relation, unit, hook.kind)?;
                relation.members.shift_remove(unit);
            }
            kind => return Err(Invariant::NotRelationHook(kind).into()),
        }

        debug!(%hook, "relation hook recorded");
        file::write_yaml(&path, relation)
    }

    /// Stops tracking a relation after its broken hook.
    ///
    /// # Errors
    ///
    /// Fails if members are still joined or the document cannot be removed.
    pub fn remove(&mut self, id: RelationId) -> Result<()> {
        let relation = self
            .relations
            .get(&id)
            .ok_or(Invariant::UnknownRelation(id))?;

        let remaining = relation.joined_members().count();
        if remaining > 0 {
            return Err(Invariant::MembersRemaining {
                relation_id: id,
                remaining,
            }
            .into());
        }

        file::remove(&self.path_for(id))?;
        self.relations.remove(&id);
        info!(relation_id = %id, "relation removed");
        Ok(())
    }

    fn path_for(&self, id: RelationId) -> PathBuf {
        self.dir.join(format!("{id}.yaml"))
    }

    /// Directory the tracker persists to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn joined_member<'a>(
    relation: &'a mut RelationState,
    unit: &UnitName,
    hook: HookKind,
) -> Result<&'a mut MemberState> {
    match relation.members.get_mut(unit) {
        Some(member) if member.joined => Ok(member),
        _ => Err(Invariant::NotJoined {
            relation_id: relation.id,
            unit: unit.clone(),
            hook,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use uniter_model::RelationSnapshot;

    use super::*;

    fn unit(name: &str) -> UnitName {
        UnitName::new(name).unwrap()
    }

    fn snapshot(relations: &[(u32, &str, &[(&str, u64)])]) -> UnitSnapshot {
        let mut snapshot = UnitSnapshot::default();
        for (id, endpoint, members) in relations {
            let mut relation = RelationSnapshot::new(*endpoint);
            for (member, version) in *members {
                relation.members.insert(unit(member), *version);
            }
            snapshot.relations.insert(RelationId(*id), relation);
        }
        snapshot
    }

    fn tracker() -> (tempfile::TempDir, RelationStateTracker) {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RelationStateTracker::load(dir.path().join("relations")).unwrap();
        (dir, tracker)
    }

    fn run_next(tracker: &mut RelationStateTracker) -> Option<HookInfo> {
        let hook = tracker.next_hook()?;
        tracker.mark_hooked(&hook).unwrap();
        Some(hook)
    }

    #[test]
    fn test_join_then_change_then_depart_then_broken() {
        let (_dir, mut tracker) = tracker();

        tracker.sync(&snapshot(&[(1, "db", &[("mysql/0", 1)])]), false);
        let joined = run_next(&mut tracker).unwrap();
        assert_eq!(joined.name(), "db-relation-joined");
        assert_eq!(joined.remote_unit, Some(unit("mysql/0")));

        let changed = run_next(&mut tracker).unwrap();
        assert_eq!(changed.name(), "db-relation-changed");
        assert_eq!(changed.settings_version, Some(1));
        assert_eq!(tracker.next_hook(), None);

        tracker.sync(&snapshot(&[(1, "db", &[("mysql/0", 2)])]), false);
        assert_eq!(
            tracker.members_pending_change(RelationId(1)),
            Some(&unit("mysql/0"))
        );
        assert_eq!(run_next(&mut tracker).unwrap().settings_version, Some(2));

        tracker.sync(&snapshot(&[]), false);
        assert_eq!(
            tracker.members_pending_depart(RelationId(1)),
            Some(&unit("mysql/0"))
        );
        assert!(!tracker.pending_broken(RelationId(1)));
        assert_eq!(
            run_next(&mut tracker).unwrap().kind,
            HookKind::RelationDeparted
        );

        assert!(tracker.pending_broken(RelationId(1)));
        assert_eq!(
            run_next(&mut tracker).unwrap().kind,
            HookKind::RelationBroken
        );
        assert_eq!(tracker.next_hook(), None);
        assert!(tracker.relation(RelationId(1)).is_none());
    }

    #[test]
    fn test_changed_only_when_version_advances() {
        let (_dir, mut tracker) = tracker();

        tracker.sync(&snapshot(&[(1, "db", &[("mysql/0", 5)])]), false);
        run_next(&mut tracker);
        run_next(&mut tracker);

        tracker.sync(&snapshot(&[(1, "db", &[("mysql/0", 5)])]), false);
        assert_eq!(tracker.next_hook(), None);
    }

    #[test]
    fn test_members_in_insertion_order() {
        let (_dir, mut tracker) = tracker();

        tracker.sync(
            &snapshot(&[(1, "db", &[("mysql/2", 1), ("mysql/0", 1)])]),
            false,
        );
        assert_eq!(
            tracker.members_pending_join(RelationId(1)),
            Some(&unit("mysql/2"))
        );
        run_next(&mut tracker);
        assert_eq!(
            tracker.members_pending_join(RelationId(1)),
            Some(&unit("mysql/0"))
        );
    }

    #[test]
    fn test_member_leaving_before_join_is_dropped() {
        let (_dir, mut tracker) = tracker();

        tracker.sync(&snapshot(&[(1, "db", &[("mysql/0", 1)])]), false);
        tracker.sync(&snapshot(&[(1, "db", &[])]), false);

        assert_eq!(tracker.next_hook(), None);
        assert!(tracker.relation(RelationId(1)).unwrap().members.is_empty());
    }

    #[test]
    fn test_relations_in_id_order() {
        let (_dir, mut tracker) = tracker();

        tracker.sync(
            &snapshot(&[(9, "web", &[("nginx/0", 1)]), (4, "db", &[("mysql/0", 1)])]),
            false,
        );
        assert_eq!(tracker.next_hook().unwrap().relation_id, Some(RelationId(4)));
    }

    #[test]
    fn test_dying_departs_everything() {
        let (_dir, mut tracker) = tracker();

        let live = snapshot(&[(1, "db", &[("mysql/0", 1), ("mysql/1", 1)])]);
        tracker.sync(&live, false);
        for _ in 0..4 {
            run_next(&mut tracker);
        }

        tracker.sync(&live, true);
        let kinds: Vec<_> = std::iter::from_fn(|| run_next(&mut tracker))
            .map(|hook| hook.kind)
            .collect();
        assert_eq!(
            kinds,
            [
                HookKind::RelationDeparted,
                HookKind::RelationDeparted,
                HookKind::RelationBroken
            ]
        );

        tracker.sync(&live, true);
        assert_eq!(tracker.next_hook(), None);
    }

    #[test]
    fn test_broken_relation_is_not_tracked_again() {
        let (_dir, mut tracker) = tracker();

        let mut dying = snapshot(&[(1, "db", &[])]);
        tracker.sync(&dying, false);
        dying.relations.get_mut(&RelationId(1)).unwrap().life = Life::Dying;
        tracker.sync(&dying, false);
        assert_eq!(run_next(&mut tracker).unwrap().kind, HookKind::RelationBroken);

        tracker.sync(&dying, false);
        assert_eq!(tracker.next_hook(), None);
        assert!(tracker.relation(RelationId(1)).is_none());
    }

    #[test]
    fn test_dying_relation_is_removed() {
        let (_dir, mut tracker) = tracker();

        let mut dying = snapshot(&[(1, "db", &[("mysql/0", 1)])]);
        tracker.sync(&dying, false);
        run_next(&mut tracker);

        dying.relations.get_mut(&RelationId(1)).unwrap().life = Life::Dying;
        tracker.sync(&dying, false);
        assert_eq!(
            tracker.next_hook().unwrap().kind,
            HookKind::RelationDeparted
        );
    }

    #[test]
    fn test_out_of_order_hooks_are_invariant_violations() {
        let (_dir, mut tracker) = tracker();
        tracker.sync(&snapshot(&[(1, "db", &[("mysql/0", 1)])]), false);

        let changed = HookInfo::relation(
            HookKind::RelationChanged,
            RelationId(1),
            "db",
            Some(unit("mysql/0")),
            Some(1),
        );
        assert_matches!(
            tracker.mark_hooked(&changed),
            Err(Error::Invariant(Invariant::NotJoined { .. }))
        );

        let joined = tracker.next_hook().unwrap();
        tracker.mark_hooked(&joined).unwrap();
        assert_matches!(
            tracker.mark_hooked(&joined),
            Err(Error::Invariant(Invariant::DuplicateJoin { .. }))
        );

        assert_matches!(
            tracker.remove(RelationId(1)),
            Err(Error::Invariant(Invariant::MembersRemaining { remaining: 1, .. }))
        );
    }

    #[test]
    fn test_update_adds_members() {
        let (_dir, mut tracker) = tracker();
        assert_matches!(
            tracker.update(RelationId(1), &unit("mysql/0"), 1),
            Err(Error::Invariant(Invariant::UnknownRelation(_)))
        );

        tracker.add_relation(RelationId(1), "db");
        tracker.update(RelationId(1), &unit("mysql/0"), 3).unwrap();
        let hook = tracker.next_hook().unwrap();
        assert_eq!(hook.kind, HookKind::RelationJoined);
        assert_eq!(hook.settings_version, Some(3));
    }

    #[test]
    fn test_resumed_join_of_vanished_member_owes_departed() {
        let (_dir, mut tracker) = tracker();

        tracker.sync(&snapshot(&[(1, "db", &[("mysql/0", 1)])]), false);
        let joined = tracker.next_hook().unwrap();
        tracker.sync(&snapshot(&[(1, "db", &[])]), false);

        tracker.mark_hooked(&joined).unwrap();
        assert_eq!(
            tracker.next_hook().unwrap().kind,
            HookKind::RelationDeparted
        );
    }

    #[test]
    fn test_state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relations");

        let mut tracker = RelationStateTracker::load(&path).unwrap();
        tracker.sync(&snapshot(&[(1, "db", &[("mysql/0", 1)])]), false);
        run_next(&mut tracker);
        run_next(&mut tracker);

        let mut reloaded = RelationStateTracker::load(&path).unwrap();
        reloaded.sync(&snapshot(&[(1, "db", &[("mysql/0", 1)])]), false);
        assert_eq!(reloaded.next_hook(), None);

        reloaded.sync(&snapshot(&[]), false);
        run_next(&mut reloaded);
        run_next(&mut reloaded);
        assert!(!path.join("1.yaml").exists());
    }
}
