use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::unit::Life;

/// Identifier of a storage instance, `<storage-name>/<number>`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageId(String);

impl StorageId {
    /// The storage name declared by the charm, e.g. `data`.
    #[must_use]
    pub fn storage_name(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(name, _)| name)
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StorageId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((name, number))
                if !name.is_empty()
                    && !number.is_empty()
                    && number.chars().all(|c| c.is_ascii_digit()) =>
            {
                Ok(Self(s.to_string()))
            }
            _ => Err(ParseError::StorageId(s.to_string())),
        }
    }
}

impl TryFrom<String> for StorageId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StorageId> for String {
    fn from(value: StorageId) -> Self {
        value.0
    }
}

/// The kind of a storage instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// A mounted filesystem.
    #[default]
    Filesystem,

    /// A raw block device.
    Block,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Filesystem => "filesystem",
            Self::Block => "block",
        })
    }
}

/// A storage attachment as currently seen by the model.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    /// Filesystem or block.
    #[serde(default)]
    pub kind: StorageKind,

    /// Mount point or device path.
    pub location: PathBuf,

    /// Lifecycle of the attachment.
    #[serde(default)]
    pub life: Life,
}
