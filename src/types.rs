//! Core types used throughout the configuration service.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Separator used when building canonical cache keys.
pub const KEY_SEP: &str = "$";

/// Separator between a canonical key and an entry name.
pub const ENTRY_SEP: &str = "#";

/// Storage medium backing a configuration type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Medium {
    /// Medium not specified; the config type's default applies.
    Unknown,
    /// Flat-file storage.
    File,
    /// Relational database storage.
    Db,
    /// LDAP directory storage.
    Ldap,
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Medium::Unknown => "unknown",
            Medium::File => "file",
            Medium::Db => "database",
            Medium::Ldap => "ldap",
        };
        f.write_str(s)
    }
}

/// A single typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ConfigValue {
    /// Returns the value as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a bool, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Str(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::Str(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<i32> for ConfigValue {
    fn from(v: i32) -> Self {
        ConfigValue::Int(v as i64)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

/// A named, ordered set of configuration entries for one configuration type.
///
/// Retrieving the whole set saves round trips to the backing storage; callers
/// then pick individual values by name. Mutations are tracked in pending sets
/// (`updated`, `reset`) that the write path consumes on persist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueSet {
    config_type_name: String,
    /// Entry names in insertion order.
    names: Vec<String>,
    values: HashMap<String, ConfigValue>,
    descriptions: HashMap<String, String>,
    /// Names whose values are pending a write to storage.
    updated: HashSet<String>,
    /// Names pending a reset to their default (delete of the override).
    reset: HashSet<String>,
}

impl ValueSet {
    /// Create an empty value set for the given configuration type.
    ///
    /// Usually called by a storage adapter while materializing a read.
    pub fn new(config_type_name: impl Into<String>) -> Self {
        Self {
            config_type_name: config_type_name.into(),
            ..Default::default()
        }
    }

    /// The configuration type this set belongs to.
    pub fn config_type_name(&self) -> &str {
        &self.config_type_name
    }

    /// Add or replace a value, preserving insertion order on replace.
    pub fn put(&mut self, name: impl Into<String>, value: impl Into<ConfigValue>) {
        self.put_described(name, value, "");
    }

    /// Add or replace a value with a description.
    pub fn put_described(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ConfigValue>,
        description: impl Into<String>,
    ) {
        let name = name.into();
        self.descriptions.insert(name.clone(), description.into());
        if self.values.insert(name.clone(), value.into()).is_none() {
            self.names.push(name);
        }
    }

    /// Update a value and mark it pending persistence.
    ///
    /// Usually called by configuration editors; the write path persists the
    /// marked entries.
    pub fn update(&mut self, name: impl Into<String>, value: impl Into<ConfigValue>) {
        let name = name.into();
        self.updated.insert(name.clone());
        self.put(name, value);
    }

    /// Mark a value to be reset to its default on the next persist.
    ///
    /// The name may refer to an entry already removed from the override layer
    /// but still defined in the defaults.
    pub fn reset_value(&mut self, name: impl Into<String>) {
        self.reset.insert(name.into());
    }

    /// Remove an entry and any pending reset mark for it.
    pub fn remove(&mut self, name: &str) {
        self.descriptions.remove(name);
        self.reset.remove(name);
        if self.values.remove(name).is_some() {
            self.names.retain(|n| n != name);
        }
    }

    /// Look up a value by name.
    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.values.get(name)
    }

    /// Look up an entry's description.
    pub fn description(&self, name: &str) -> Option<&str> {
        self.descriptions.get(name).map(String::as_str)
    }

    /// Entry names in insertion order. For some configuration types the order
    /// matters.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Values in insertion order, paired with `names()`.
    pub fn values(&self) -> impl Iterator<Item = &ConfigValue> {
        self.names.iter().filter_map(|n| self.values.get(n))
    }

    /// Names pending a write to storage.
    pub fn updated(&self) -> &HashSet<String> {
        &self.updated
    }

    /// Names pending a reset to default.
    pub fn reset(&self) -> &HashSet<String> {
        &self.reset
    }

    /// Clear both pending-change sets. Called by the write path after the
    /// changes have been persisted.
    pub fn clear_pending(&mut self) {
        self.updated.clear();
        self.reset.clear();
    }

    /// Number of entries in the set.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the set holds no entries.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Parameters for looking up a configuration value set.
///
/// Equality and hashing delegate to the canonical key string, so two lookups
/// for the same (type, organization) are interchangeable as cache keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupKey {
    config_type_name: String,
    org: Option<String>,
    medium: Medium,
    key_string: String,
}

impl LookupKey {
    /// Lookup for the default (organization-less) scope.
    pub fn new(config_type_name: impl Into<String>) -> Self {
        Self::build(config_type_name.into(), None, Medium::Unknown)
    }

    /// Lookup scoped to an organization.
    pub fn for_org(config_type_name: impl Into<String>, org: impl Into<String>) -> Self {
        let org = org.into();
        let org = if org.trim().is_empty() { None } else { Some(org) };
        Self::build(config_type_name.into(), org, Medium::Unknown)
    }

    /// Override the storage medium hint. The hint is the only mutable part of
    /// a lookup; it does not participate in the canonical key.
    pub fn with_medium(mut self, medium: Medium) -> Self {
        self.medium = medium;
        self
    }

    fn build(config_type_name: String, org: Option<String>, medium: Medium) -> Self {
        let mut key = String::with_capacity(
            config_type_name.len() + 2 + org.as_deref().map_or(0, str::len),
        );
        key.push_str(&config_type_name);
        key.push_str(KEY_SEP);
        if let Some(org) = &org {
            key.push_str(KEY_SEP);
            key.push_str(org);
        }
        Self {
            config_type_name,
            org,
            medium,
            key_string: key,
        }
    }

    /// The configuration type name of this lookup.
    pub fn config_type_name(&self) -> &str {
        &self.config_type_name
    }

    /// The organization scope, if any.
    pub fn org(&self) -> Option<&str> {
        self.org.as_deref()
    }

    /// The storage medium hint.
    pub fn medium(&self) -> Medium {
        self.medium
    }

    /// Set the storage medium hint in place.
    pub fn set_medium(&mut self, medium: Medium) {
        self.medium = medium;
    }

    /// The canonical cache key for the whole value set.
    pub fn key_string(&self) -> &str {
        &self.key_string
    }

    /// The canonical cache key qualified with an entry name, for single-value
    /// caching.
    pub fn entry_key_string(&self, entry: &str) -> String {
        format!("{}{}{}", self.key_string, ENTRY_SEP, entry)
    }
}

impl PartialEq for LookupKey {
    fn eq(&self, other: &Self) -> bool {
        self.key_string == other.key_string
    }
}

impl Eq for LookupKey {}

impl std::hash::Hash for LookupKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key_string.hash(state);
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of<T: Hash>(v: &T) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_key_string_is_pure_function_of_type_and_org() {
        let a = LookupKey::for_org("workflow", "acme.com");
        let b = LookupKey::for_org("workflow", "acme.com").with_medium(Medium::Db);

        assert_eq!(a.key_string(), "workflow$$acme.com");
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_key_string_default_scope() {
        let a = LookupKey::new("workflow");
        let blank_org = LookupKey::for_org("workflow", "  ");

        assert_eq!(a.key_string(), "workflow$");
        assert_eq!(a, blank_org);
    }

    #[test]
    fn test_entry_key_string() {
        let li = LookupKey::for_org("T", "org");
        assert_eq!(li.entry_key_string("a"), "T$$org#a");
    }

    #[test]
    fn test_distinct_orgs_produce_distinct_keys() {
        let a = LookupKey::for_org("T", "org1");
        let b = LookupKey::for_org("T", "org2");
        assert_ne!(a, b);
    }

    #[test]
    fn test_value_set_preserves_insertion_order_on_replace() {
        let mut vs = ValueSet::new("props");
        vs.put("a", 1);
        vs.put("b", 2);
        vs.put("a", 3);

        assert_eq!(vs.names(), ["a", "b"]);
        assert_eq!(vs.get("a"), Some(&ConfigValue::Int(3)));
        assert_eq!(vs.len(), 2);
    }

    #[test]
    fn test_value_set_tracks_pending_changes() {
        let mut vs = ValueSet::new("props");
        vs.put("a", "one");
        vs.update("b", "two");
        vs.reset_value("a");

        assert!(vs.updated().contains("b"));
        assert!(vs.reset().contains("a"));

        vs.clear_pending();
        assert!(vs.updated().is_empty());
        assert!(vs.reset().is_empty());
    }

    #[test]
    fn test_value_set_remove() {
        let mut vs = ValueSet::new("props");
        vs.put_described("a", 1, "first");
        vs.put("b", 2);
        vs.reset_value("a");
        vs.remove("a");

        assert_eq!(vs.names(), ["b"]);
        assert!(vs.get("a").is_none());
        assert!(vs.description("a").is_none());
        assert!(!vs.reset().contains("a"));
    }
}
