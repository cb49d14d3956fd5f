use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// The name of a unit, `<application>/<number>`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitName {
    name: String,
    split: usize,
}

impl UnitName {
    /// Parses a unit name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not of the form `<application>/<number>`.
    pub fn new(name: impl Into<String>) -> Result<Self, ParseError> {
        let name = name.into();
        let Some(split) = name.find('/') else {
            return Err(ParseError::UnitName(name));
        };

        let (application, number) = (&name[..split], &name[split + 1..]);
        let valid_application = !application.is_empty()
            && application
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        let valid_number = !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());

        if !valid_application || !valid_number {
            return Err(ParseError::UnitName(name));
        }

        Ok(Self { name, split })
    }

    /// The application this unit belongs to.
    #[must_use]
    pub fn application(&self) -> &str {
        &self.name[..self.split]
    }

    /// The unit's sequence number within its application.
    #[must_use]
    pub fn number(&self) -> u64 {
        self.name[self.split + 1..].parse().unwrap_or(u64::MAX)
    }

    /// The full name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl Ord for UnitName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.application()
            .cmp(other.application())
            .then_with(|| self.number().cmp(&other.number()))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for UnitName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for UnitName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UnitName {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UnitName> for String {
    fn from(value: UnitName) -> Self {
        value.name
    }
}

/// Lifecycle of an entity in the model.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Life {
    /// The entity is in normal use.
    #[default]
    Alive,

    /// The entity is being torn down.
    Dying,

    /// The entity is gone.
    Dead,
}

/// How an operator has asked the agent to resolve a failed hook.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolvedMode {
    /// No resolution requested.
    #[default]
    None,

    /// Re-run the failed hook.
    RetryHooks,

    /// Mark the failed hook as done without running it again.
    NoHooks,
}
