use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::unit::{Life, UnitName};

/// Identifier of a relation in the model.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(pub u32);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RelationId {
    type Err = ParseError;

    /// Accepts both `7` and the qualified `db:7` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.rsplit_once(':').map_or(s, |(_, id)| id);
        id.parse()
            .map(Self)
            .map_err(|_| ParseError::RelationId(s.to_string()))
    }
}

/// A relation the unit participates in, as currently seen by the model.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RelationSnapshot {
    /// Name of the local endpoint, e.g. `db`.
    pub endpoint: String,

    /// Lifecycle of the relation.
    #[serde(default)]
    pub life: Life,

    /// Remote members in the order they entered scope, with the version of
    /// their settings.
    #[serde(default)]
    pub members: IndexMap<UnitName, u64>,
}

impl RelationSnapshot {
    /// Creates a live relation snapshot with no members.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            life: Life::Alive,
            members: IndexMap::new(),
        }
    }
}
