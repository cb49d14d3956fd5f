use std::fmt;

use serde::{Deserialize, Serialize};

use crate::relation::RelationId;
use crate::storage::StorageId;
use crate::unit::UnitName;

/// The kinds of hook a charm can implement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookKind {
    /// First hook run for a unit.
    Install,

    /// Runs once after install and the first config-changed.
    Start,

    /// Application configuration changed.
    ConfigChanged,

    /// The charm was upgraded to a new revision.
    UpgradeCharm,

    /// The unit is being torn down.
    Stop,

    /// The unit became leader of its application.
    LeaderElected,

    /// The unit stopped being leader.
    LeaderDeposed,

    /// Leader settings changed; non-leaders only.
    LeaderSettingsChanged,

    /// A remote unit entered a relation.
    RelationJoined,

    /// A remote unit's relation settings changed.
    RelationChanged,

    /// A remote unit left a relation.
    RelationDeparted,

    /// The relation is gone.
    RelationBroken,

    /// Storage was attached to the unit.
    StorageAttached,

    /// Storage is about to be detached from the unit.
    StorageDetaching,
}

impl HookKind {
    /// Whether hooks of this kind are scoped to a relation.
    #[must_use]
    pub const fn is_relation(self) -> bool {
        matches!(
            self,
            Self::RelationJoined
                | Self::RelationChanged
                | Self::RelationDeparted
                | Self::RelationBroken
        )
    }

    /// Whether hooks of this kind are scoped to a remote unit.
    #[must_use]
    pub const fn has_remote_unit(self) -> bool {
        matches!(
            self,
            Self::RelationJoined | Self::RelationChanged | Self::RelationDeparted
        )
    }

    /// Whether hooks of this kind are scoped to a storage instance.
    #[must_use]
    pub const fn is_storage(self) -> bool {
        matches!(self, Self::StorageAttached | Self::StorageDetaching)
    }

    /// The hook name without any endpoint prefix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Start => "start",
            Self::ConfigChanged => "config-changed",
            Self::UpgradeCharm => "upgrade-charm",
            Self::Stop => "stop",
            Self::LeaderElected => "leader-elected",
            Self::LeaderDeposed => "leader-deposed",
            Self::LeaderSettingsChanged => "leader-settings-changed",
            Self::RelationJoined => "relation-joined",
            Self::RelationChanged => "relation-changed",
            Self::RelationDeparted => "relation-departed",
            Self::RelationBroken => "relation-broken",
            Self::StorageAttached => "storage-attached",
            Self::StorageDetaching => "storage-detaching",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to identify one hook invocation.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HookInfo {
    /// The kind of hook.
    pub kind: HookKind,

    /// Relation the hook is scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_id: Option<RelationId>,

    /// Local endpoint name of that relation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Remote unit the hook is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_unit: Option<UnitName>,

    /// Settings version of the remote unit observed when the hook was chosen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_version: Option<u64>,

    /// Storage instance the hook is scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<StorageId>,
}

impl HookInfo {
    /// A hook with no relation or storage scope.
    #[must_use]
    pub const fn new(kind: HookKind) -> Self {
        Self {
            kind,
            relation_id: None,
            endpoint: None,
            remote_unit: None,
            settings_version: None,
            storage_id: None,
        }
    }

    /// A relation-scoped hook.
    pub fn relation(
        kind: HookKind,
        relation_id: RelationId,
        endpoint: impl Into<String>,
        remote_unit: Option<UnitName>,
        settings_version: Option<u64>,
    ) -> Self {
        Self {
            relation_id: Some(relation_id),
            endpoint: Some(endpoint.into()),
            remote_unit,
            settings_version,
            ..Self::new(kind)
        }
    }

    /// A storage-scoped hook.
    #[must_use]
    pub fn storage(kind: HookKind, storage_id: StorageId) -> Self {
        Self {
            storage_id: Some(storage_id),
            ..Self::new(kind)
        }
    }

    /// The name of the hook executable, e.g. `db-relation-joined`.
    #[must_use]
    pub fn name(&self) -> String {
        if self.kind.is_relation() {
            if let Some(endpoint) = &self.endpoint {
                return format!("{endpoint}-{}", self.kind);
            }
        }
        if self.kind.is_storage() {
            if let Some(storage_id) = &self.storage_id {
                return format!("{}-{}", storage_id.storage_name(), self.kind);
            }
        }
        self.kind.as_str().to_string()
    }

    /// Checks that the scope fields match the hook kind.
    ///
    /// # Errors
    ///
    /// Returns a description of the first missing or unexpected field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.kind.is_relation() {
            if self.relation_id.is_none() || self.endpoint.is_none() {
                return Err("relation hook without relation id or endpoint");
            }
        } else if self.relation_id.is_some() {
            return Err("relation id on a non-relation hook");
        }

        if self.kind.has_remote_unit() != self.remote_unit.is_some() {
            return Err("remote unit does not match hook kind");
        }

        if self.kind.is_storage() != self.storage_id.is_some() {
            return Err("storage id does not match hook kind");
        }

        Ok(())
    }
}

impl fmt::Display for HookInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())?;
        if let Some(remote_unit) = &self.remote_unit {
            write!(f, " ({remote_unit})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_names() {
        let remote: UnitName = "mysql/0".parse().unwrap();
        let joined = HookInfo::relation(
            HookKind::RelationJoined,
            RelationId(3),
            "db",
            Some(remote),
            Some(1),
        );
        assert_eq!(joined.name(), "db-relation-joined");
        assert_eq!(joined.to_string(), "db-relation-joined (mysql/0)");

        let attached = HookInfo::storage(HookKind::StorageAttached, "data/1".parse().unwrap());
        assert_eq!(attached.name(), "data-storage-attached");

        assert_eq!(HookInfo::new(HookKind::ConfigChanged).name(), "config-changed");
    }

    #[test]
    fn test_validate_scopes() {
        assert!(HookInfo::new(HookKind::Install).validate().is_ok());
        assert!(HookInfo::new(HookKind::RelationJoined).validate().is_err());

        let broken = HookInfo::relation(HookKind::RelationBroken, RelationId(1), "db", None, None);
        assert!(broken.validate().is_ok());

        let changed = HookInfo::relation(HookKind::RelationChanged, RelationId(1), "db", None, None);
        assert!(changed.validate().is_err());
    }

    #[test]
    fn test_serialized_form_is_kebab_case() {
        let info = HookInfo::relation(
            HookKind::RelationChanged,
            RelationId(2),
            "db",
            Some("mysql/1".parse().unwrap()),
            Some(4),
        );

        let yaml = serde_yaml::to_string(&info).unwrap();
        assert!(yaml.contains("kind: relation-changed"));
        assert!(yaml.contains("relation-id: 2"));
        assert!(yaml.contains("remote-unit: mysql/1"));
        assert!(!yaml.contains("storage-id"));

        let back: HookInfo = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, info);
    }
}
