use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Deserialize;
use uniter_model::{
    ConfigSettings, Life, RelationId, Settings, StatusInfo, StorageId, StorageSnapshot, UnitName,
};

/// On-disk description of a model, used to run the agent without a
/// controller.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Fixture {
    #[serde(default)]
    pub life: Life,

    #[serde(default = "default_revision")]
    pub charm_revision: u64,

    #[serde(default)]
    pub config: ConfigSettings,

    #[serde(default)]
    pub leader: bool,

    #[serde(default)]
    pub leader_settings: Settings,

    #[serde(default)]
    pub relations: BTreeMap<RelationId, FixtureRelation>,

    #[serde(default)]
    pub storage: BTreeMap<StorageId, StorageSnapshot>,

    #[serde(default)]
    pub workload_status: StatusInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FixtureRelation {
    pub endpoint: String,

    #[serde(default)]
    pub life: Life,

    /// Remote members and the settings they publish.
    #[serde(default)]
    pub members: IndexMap<UnitName, Settings>,
}

const fn default_revision() -> u64 {
    1
}
