//! Configuration type registry and adapter constructor registry.
//!
//! Each kind of configuration data (workflow templates, application
//! properties, notification definitions, ...) is one [`ConfigType`] naming,
//! per storage medium, the adapter implementations that read and write it.
//! Adapter implementations are registered by tag in an [`AdapterRegistry`] at
//! startup; no runtime class loading is involved.

use crate::adapter::{ValueReader, ValueWriter};
use crate::types::Medium;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Tag identifying one adapter implementation in the constructor registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdapterId(Cow<'static, str>);

impl AdapterId {
    /// Create an id from a static tag.
    pub const fn from_static(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }

    /// The tag string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry entry describing one configuration type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigType {
    name: String,
    display_name: String,
    default_medium: Medium,
    editable: bool,
    load_all: bool,
    getters: HashMap<Medium, AdapterId>,
    setters: HashMap<Medium, AdapterId>,
}

impl ConfigType {
    /// Create a type with file storage as its default medium.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            default_medium: Medium::File,
            editable: false,
            load_all: false,
            getters: HashMap::new(),
            setters: HashMap::new(),
        }
    }

    /// Set the human-readable name. Blank values fall back to the type name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        if !display_name.trim().is_empty() {
            self.display_name = display_name;
        }
        self
    }

    /// Set the default storage medium used when a lookup gives no hint.
    pub fn with_default_medium(mut self, medium: Medium) -> Self {
        self.default_medium = medium;
        self
    }

    /// Mark the type as editable through configuration UIs.
    pub fn with_editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }

    /// Mark the type as one whose full value set is loaded on any access.
    pub fn with_load_all(mut self, load_all: bool) -> Self {
        self.load_all = load_all;
        self
    }

    /// Bind the reader adapter for a medium.
    pub fn with_getter(mut self, medium: Medium, id: AdapterId) -> Self {
        self.getters.insert(medium, id);
        self
    }

    /// Bind the writer adapter for a medium.
    pub fn with_setter(mut self, medium: Medium, id: AdapterId) -> Self {
        self.setters.insert(medium, id);
        self
    }

    /// The type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The display name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The default storage medium.
    pub fn default_medium(&self) -> Medium {
        self.default_medium
    }

    /// Whether the type is editable.
    pub fn editable(&self) -> bool {
        self.editable
    }

    /// Whether the full value set is loaded on any access.
    pub fn load_all(&self) -> bool {
        self.load_all
    }

    /// The reader adapter bound for a medium, if any.
    pub fn getter(&self, medium: Medium) -> Option<&AdapterId> {
        self.getters.get(&medium)
    }

    /// The writer adapter bound for a medium, if any.
    pub fn setter(&self, medium: Medium) -> Option<&AdapterId> {
        self.setters.get(&medium)
    }
}

/// Immutable map of configuration types, loaded once at startup and replaced
/// wholesale on reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeRegistry {
    types: HashMap<String, ConfigType>,
}

impl TypeRegistry {
    /// Build a registry from type definitions.
    pub fn new(types: impl IntoIterator<Item = ConfigType>) -> Self {
        Self {
            types: types
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
        }
    }

    /// Look up a type by name.
    pub fn get(&self, name: &str) -> Option<&ConfigType> {
        self.types.get(name)
    }

    /// All registered types, keyed by name.
    pub fn types(&self) -> &HashMap<String, ConfigType> {
        &self.types
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

type ReaderCtor = Box<dyn Fn() -> Arc<dyn ValueReader> + Send + Sync>;
type WriterCtor = Box<dyn Fn() -> Arc<dyn ValueWriter> + Send + Sync>;

/// Constructor registry mapping adapter tags to adapter factories.
///
/// Populated once at startup by the embedding application; the dispatch layer
/// instantiates through it and caches the instances.
#[derive(Default)]
pub struct AdapterRegistry {
    readers: HashMap<AdapterId, ReaderCtor>,
    writers: HashMap<AdapterId, WriterCtor>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reader constructor under a tag.
    pub fn register_reader<F>(&mut self, id: AdapterId, ctor: F)
    where
        F: Fn() -> Arc<dyn ValueReader> + Send + Sync + 'static,
    {
        self.readers.insert(id, Box::new(ctor));
    }

    /// Register a writer constructor under a tag.
    pub fn register_writer<F>(&mut self, id: AdapterId, ctor: F)
    where
        F: Fn() -> Arc<dyn ValueWriter> + Send + Sync + 'static,
    {
        self.writers.insert(id, Box::new(ctor));
    }

    /// Instantiate the reader registered under `id`.
    pub fn reader(&self, id: &AdapterId) -> Option<Arc<dyn ValueReader>> {
        self.readers.get(id).map(|ctor| ctor())
    }

    /// Instantiate the writer registered under `id`.
    pub fn writer(&self, id: &AdapterId) -> Option<Arc<dyn ValueWriter>> {
        self.writers.get(id).map(|ctor| ctor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryAdapter;

    const FILE_PROPS: AdapterId = AdapterId::from_static("file-props");

    #[test]
    fn test_config_type_defaults() {
        let ty = ConfigType::new("workflow");
        assert_eq!(ty.display_name(), "workflow");
        assert_eq!(ty.default_medium(), Medium::File);
        assert!(!ty.editable());
        assert!(ty.getter(Medium::File).is_none());
    }

    #[test]
    fn test_config_type_blank_display_name_falls_back() {
        let ty = ConfigType::new("workflow").with_display_name("  ");
        assert_eq!(ty.display_name(), "workflow");
    }

    #[test]
    fn test_type_registry_lookup() {
        let registry = TypeRegistry::new([
            ConfigType::new("workflow").with_getter(Medium::File, FILE_PROPS),
            ConfigType::new("props").with_default_medium(Medium::Db),
        ]);

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get("props").unwrap().default_medium(),
            Medium::Db
        );
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_adapter_registry_constructs_instances() {
        let mut registry = AdapterRegistry::new();
        let backing = Arc::new(MemoryAdapter::new());
        let cloned = backing.clone();
        registry.register_reader(FILE_PROPS, move || cloned.clone());

        assert!(registry.reader(&FILE_PROPS).is_some());
        assert!(registry.reader(&AdapterId::from_static("other")).is_none());
        assert!(registry.writer(&FILE_PROPS).is_none());
    }
}
