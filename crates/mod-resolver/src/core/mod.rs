//! Core types used throughout the resolver
//!
//! This module contains the data model every stage agrees on: mod identifiers,
//! catalog records, resolved mods and the picked set shown to the user.

pub mod error;
pub mod status;

pub use error::{ResolveError, Result, ScriptError};
pub use status::ResolveStatus;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Structured, script-declared option descriptors of a mod
///
/// The shape belongs to the script author, so it is carried as plain JSON data.
pub type ConfigurationOptions = serde_json::Value;

/// Numeric catalog identifier of a mod, kept in its textual form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ModId(String);

impl ModId {
    /// Parse an identifier; it must be a non-empty run of ASCII digits that fits a `u64`
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        raw.parse::<u64>().ok()?;
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name the game gives the mod's folder, e.g. `workshop-123`
    pub fn folder_name(&self) -> String {
        format!("workshop-{}", self.0)
    }
}

impl fmt::Display for ModId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ModId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

// Catalog endpoints are not consistent about quoting ids.
impl<'de> Deserialize<'de> for ModId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(u64),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Text(text) => ModId::parse(&text)
                .ok_or_else(|| D::Error::custom(format!("invalid mod id '{}'", text))),
            RawId::Number(number) => Ok(ModId::from(number)),
        }
    }
}

/// Public catalog record of a mod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModMetadata {
    #[serde(rename = "publishedfileid")]
    pub id: ModId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    /// Remaining descriptive fields, passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ModMetadata {
    pub fn new<S: Into<String>>(id: ModId, title: S) -> Self {
        Self {
            id,
            title: title.into(),
            preview_url: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_preview_url<S: Into<String>>(mut self, url: S) -> Self {
        self.preview_url = Some(url.into());
        self
    }
}

/// Configuration script source of a mod as served by the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModConfigScript {
    pub id: ModId,
    pub code: String,
}

impl ModConfigScript {
    pub fn new<S: Into<String>>(id: ModId, code: S) -> Self {
        Self { id, code: code.into() }
    }
}

/// A mod ready to be shown and edited: metadata plus what its script declared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMod {
    #[serde(flatten)]
    pub metadata: ModMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Present only when the script ran and assigned the options binding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_options: Option<ConfigurationOptions>,
}

impl ResolvedMod {
    /// A mod without a script or options
    pub fn bare(metadata: ModMetadata) -> Self {
        Self {
            metadata,
            code: None,
            configuration_options: None,
        }
    }

    pub fn id(&self) -> &ModId {
        &self.metadata.id
    }

    pub fn has_options(&self) -> bool {
        self.configuration_options.is_some()
    }
}

/// Ordered set of mods attached to a deployment, unique by id
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PickedSet {
    mods: Vec<ResolvedMod>,
}

impl PickedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a mod; an existing entry with the same id is removed first,
    /// so the inserted mod always ends up last. Returns the replaced entry.
    pub fn insert(&mut self, resolved: ResolvedMod) -> Option<ResolvedMod> {
        let replaced = self.remove(resolved.id());
        self.mods.push(resolved);
        replaced
    }

    pub fn remove(&mut self, id: &ModId) -> Option<ResolvedMod> {
        let index = self.mods.iter().position(|m| m.id() == id)?;
        Some(self.mods.remove(index))
    }

    pub fn contains(&self, id: &ModId) -> bool {
        self.mods.iter().any(|m| m.id() == id)
    }

    pub fn get(&self, id: &ModId) -> Option<&ResolvedMod> {
        self.mods.iter().find(|m| m.id() == id)
    }

    pub fn ids(&self) -> Vec<ModId> {
        self.mods.iter().map(|m| m.id().clone()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResolvedMod> {
        self.mods.iter()
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    pub fn into_vec(self) -> Vec<ResolvedMod> {
        self.mods
    }
}

/// Builds a set keeping the first occurrence of each id
impl FromIterator<ResolvedMod> for PickedSet {
    fn from_iter<I: IntoIterator<Item = ResolvedMod>>(iter: I) -> Self {
        let mut set = PickedSet::new();
        for resolved in iter {
            if !set.contains(resolved.id()) {
                set.mods.push(resolved);
            }
        }
        set
    }
}

impl<'a> IntoIterator for &'a PickedSet {
    type Item = &'a ResolvedMod;
    type IntoIter = std::slice::Iter<'a, ResolvedMod>;

    fn into_iter(self) -> Self::IntoIter {
        self.mods.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(raw: &str) -> ModId {
        ModId::parse(raw).unwrap()
    }

    #[test]
    fn test_mod_id_parse() {
        assert_eq!(id("378160973").as_str(), "378160973");
        assert!(ModId::parse("").is_none());
        assert!(ModId::parse("12a").is_none());
        assert!(ModId::parse("-12").is_none());
        // one past u64::MAX
        assert!(ModId::parse("18446744073709551616").is_none());
        assert_eq!(id("42").folder_name(), "workshop-42");
    }

    #[test]
    fn test_mod_id_accepts_string_or_number() {
        let from_text: ModId = serde_json::from_value(json!("100")).unwrap();
        let from_number: ModId = serde_json::from_value(json!(100)).unwrap();
        assert_eq!(from_text, from_number);
        assert!(serde_json::from_value::<ModId>(json!("abc")).is_err());
        assert_eq!(serde_json::to_value(&from_text).unwrap(), json!("100"));
    }

    #[test]
    fn test_metadata_keeps_extra_fields() {
        let metadata: ModMetadata = serde_json::from_value(json!({
            "publishedfileid": "100",
            "title": "Foo",
            "preview_url": "https://images.example/foo.png",
            "file_size": 2048,
            "tags": [{"tag": "server_only_mod"}]
        }))
        .unwrap();

        assert_eq!(metadata.id, id("100"));
        assert_eq!(metadata.title, "Foo");
        assert_eq!(metadata.extra.get("file_size"), Some(&json!(2048)));

        let round = serde_json::to_value(&metadata).unwrap();
        assert_eq!(round["tags"][0]["tag"], json!("server_only_mod"));
    }

    #[test]
    fn test_resolved_mod_serializes_flat() {
        let resolved = ResolvedMod {
            metadata: ModMetadata::new(id("100"), "Foo"),
            code: None,
            configuration_options: Some(json!({"x": 1})),
        };
        assert_eq!(
            serde_json::to_value(&resolved).unwrap(),
            json!({"publishedfileid": "100", "title": "Foo", "configuration_options": {"x": 1}})
        );
    }

    #[test]
    fn test_picked_set_unique_by_id() {
        let set: PickedSet = vec![
            ResolvedMod::bare(ModMetadata::new(id("1"), "first")),
            ResolvedMod::bare(ModMetadata::new(id("2"), "second")),
            ResolvedMod::bare(ModMetadata::new(id("1"), "duplicate")),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.len(), 2);
        assert_eq!(set.get(&id("1")).unwrap().metadata.title, "first");
    }

    #[test]
    fn test_picked_set_insert_moves_to_end() {
        let mut set: PickedSet = vec![
            ResolvedMod::bare(ModMetadata::new(id("1"), "one")),
            ResolvedMod::bare(ModMetadata::new(id("2"), "two")),
        ]
        .into_iter()
        .collect();

        let replaced = set.insert(ResolvedMod::bare(ModMetadata::new(id("1"), "one again")));
        assert_eq!(replaced.unwrap().metadata.title, "one");
        assert_eq!(set.ids(), vec![id("2"), id("1")]);
        assert_eq!(set.get(&id("1")).unwrap().metadata.title, "one again");

        assert!(set.remove(&id("2")).is_some());
        assert!(set.remove(&id("2")).is_none());
        assert_eq!(set.len(), 1);
    }
}
