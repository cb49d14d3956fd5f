use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Relation or leader settings: string keys to string values.
pub type Settings = BTreeMap<String, String>;

/// Application configuration: keys to arbitrary values, `null` when unset.
pub type ConfigSettings = BTreeMap<String, serde_json::Value>;

/// A value together with the model version it was read at.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// The value.
    pub value: T,

    /// Version of the value in the model.
    pub version: u64,
}

impl<T> Versioned<T> {
    /// Wraps a value with its version.
    pub const fn new(value: T, version: u64) -> Self {
        Self { value, version }
    }
}

/// A buffered set of key-level writes to a settings bucket.
///
/// `Some(value)` sets a key, `None` deletes it. Applying the same changes
/// more than once always produces the same settings.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsChanges(BTreeMap<String, Option<String>>);

impl SettingsChanges {
    /// Creates an empty change set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Records a write of `key`. An empty value deletes the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let value = if value.is_empty() { None } else { Some(value) };
        self.0.insert(key.into(), value);
    }

    /// Records a deletion of `key`.
    pub fn delete(&mut self, key: impl Into<String>) {
        self.0.insert(key.into(), None);
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the buffered writes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Option<String>)> {
        self.0.iter()
    }

    /// Applies the writes to `settings`.
    pub fn apply_to(&self, settings: &mut Settings) {
        for (key, value) in &self.0 {
            match value {
                Some(value) => {
                    settings.insert(key.clone(), value.clone());
                }
                None => {
                    settings.remove(key);
                }
            }
        }
    }

    /// Returns `settings` with the writes applied.
    #[must_use]
    pub fn applied(&self, settings: &Settings) -> Settings {
        let mut settings = settings.clone();
        self.apply_to(&mut settings);
        settings
    }

    /// Whether `settings` already reflects every write.
    #[must_use]
    pub fn is_reflected_in(&self, settings: &Settings) -> bool {
        self.0
            .iter()
            .all(|(key, value)| settings.get(key) == value.as_ref())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SettingsChanges {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut changes = Self::new();
        for (key, value) in iter {
            changes.set(key, value);
        }
        changes
    }
}
