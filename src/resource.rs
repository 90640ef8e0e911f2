//! The external collaborator interface a domain object must satisfy to be
//! stored and reconstructed by the registry. The registry never interprets
//! payload contents; it only needs the four hooks below, plus a JSON-shaped
//! view of the object for the codec to walk.

use std::collections::HashSet;

use crate::id::Id;

/// A resource object as the registry sees it: a docstring, a mutable
/// persistent-ID slot, an optional set of shadow-attribute names to ignore,
/// and a JSON-shaped body the codec can walk for embedded references.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Resource {
    pub doc: String,
    pub persistent_id: Option<Id>,
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub ignore_shadow_attr: HashSet<String>,
    pub body: serde_json::Value,
}

impl Resource {
    pub fn new(doc: impl Into<String>, body: serde_json::Value) -> Self {
        Resource {
            doc: doc.into(),
            persistent_id: None,
            ignore_shadow_attr: HashSet::new(),
            body,
        }
    }

    /// Mirrors `ResourceFinder.check_docstring`: a resource with no
    /// docstring, or one that is empty, fails the docstring gate.
    pub fn has_docstring(&self) -> bool {
        !self.doc.trim().is_empty()
    }

    pub fn ignores(&self, attr: &str) -> bool {
        self.ignore_shadow_attr.contains(attr)
    }
}

/// Hook for container resources (Item relation): given an item key
/// (the item's own persistent ID, or the value of its `mapAttr`), return the
/// mapped target value, and optionally an alternate "edges" view of the
/// same container for `getEdges` relations.
pub trait ItemLookup {
    fn lookup_item(&self, key: &str) -> Option<serde_json::Value>;
    fn edges(&self) -> Option<&dyn ItemLookup> {
        None
    }
}

/// Treats a JSON object as a container keyed by its own fields, so the
/// Resolver can materialize Item shadow attributes over a plain resolved
/// body without requiring callers to supply a domain-specific container
/// type. The core still doesn't interpret payloads beyond this: a resource
/// that isn't itself a container only fails item lookups, it's never forced
/// into one.
impl ItemLookup for serde_json::Value {
    fn lookup_item(&self, key: &str) -> Option<serde_json::Value> {
        match self {
            serde_json::Value::Object(map) => map.get(key).cloned(),
            _ => None,
        }
    }
}

/// A simple in-memory container, useful for tests and for small lookup
/// tables that don't warrant their own domain type.
#[derive(Debug, Clone, Default)]
pub struct MapContainer {
    pub entries: std::collections::HashMap<String, serde_json::Value>,
}

impl ItemLookup for MapContainer {
    fn lookup_item(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.get(key).cloned()
    }
}
