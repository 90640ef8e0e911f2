//! Shadow-attribute materialization: there is no way to install a
//! descriptor onto a class at runtime here, so each resolved resource
//! instance carries its own [`ShadowAttrs`] extension map instead, populated
//! by the Resolver from the schema index and consulted before falling back
//! to the resource's own body.

use std::collections::HashMap;

use crate::error::{RegistryError, Result};
use crate::id::Id;
use crate::resource::ItemLookup;
use crate::schema::RelationDescriptor;

/// Per-instance extension map standing in for class-wide attribute
/// installation. One of these is kept per resolved resource.
#[derive(Debug, Clone, Default)]
pub struct ShadowAttrs {
    bindings: HashMap<String, RelationDescriptor>,
    cache: HashMap<String, serde_json::Value>,
}

impl ShadowAttrs {
    /// Install `descriptor` under `attr`. Idempotent: re-binding the same
    /// name to an identical descriptor is a no-op; binding to a different
    /// descriptor is a [`RegistryError::DuplicateBinding`].
    pub fn bind(&mut self, attr: &str, descriptor: RelationDescriptor) -> Result<()> {
        match self.bindings.get(attr) {
            Some(existing) if existing == &descriptor => Ok(()),
            Some(_) => Err(RegistryError::DuplicateBinding {
                attr: attr.to_string(),
            }),
            None => {
                self.bindings.insert(attr.to_string(), descriptor);
                Ok(())
            }
        }
    }

    pub fn descriptor(&self, attr: &str) -> Option<&RelationDescriptor> {
        self.bindings.get(attr)
    }

    pub fn is_bound(&self, attr: &str) -> bool {
        self.bindings.contains_key(attr)
    }

    /// The cached value from a prior access, if any. A second access of the
    /// same one-time shadow attribute must hit this instead of resolving
    /// again.
    pub fn cached(&self, attr: &str) -> Option<&serde_json::Value> {
        self.cache.get(attr)
    }

    pub fn cache(&mut self, attr: &str, value: serde_json::Value) {
        self.cache.insert(attr.to_string(), value);
    }
}

/// Look up `item_key` in `container`, honoring `invert` (swap which side
/// plays container vs. item), `get_edges` (use the container's edges facet
/// instead of itself), and `target_attr` (project a field off the found
/// value rather than returning it whole). The resolver has already resolved
/// `targetID` to `container` and chosen `item_key` per `mapAttr` before
/// calling in.
pub fn materialize_item(
    descriptor: &RelationDescriptor,
    container: &dyn ItemLookup,
    item_key: &str,
) -> Result<serde_json::Value> {
    let (get_edges, target_attr) = match descriptor {
        RelationDescriptor::Item {
            get_edges, target_attr, ..
        } => (get_edges.unwrap_or(false), target_attr.clone()),
        _ => {
            return Err(RegistryError::SchemaMissing {
                id: Id::new(item_key),
                attr: "item".to_string(),
            })
        }
    };

    let lookup_target: &dyn ItemLookup = if get_edges {
        container.edges().unwrap_or(container)
    } else {
        container
    };

    let found = lookup_target
        .lookup_item(item_key)
        .ok_or_else(|| RegistryError::SchemaMissing {
            id: Id::new(item_key),
            attr: "item".to_string(),
        })?;

    match target_attr {
        Some(attr) => found
            .get(&attr)
            .cloned()
            .ok_or_else(|| RegistryError::SchemaMissing {
                id: Id::new(item_key),
                attr,
            }),
        None => Ok(found),
    }
}

/// The key a resolver should look `item_key`/`item_fields` up under: either
/// the item's own ID, or the value of `mapAttr` on the item when the
/// descriptor names one.
pub fn item_lookup_key(
    descriptor: &RelationDescriptor,
    item_key: &str,
    item_fields: &serde_json::Value,
) -> String {
    if let RelationDescriptor::Item {
        map_attr: Some(field),
        ..
    } = descriptor
    {
        if let Some(mapped) = item_fields.get(field).and_then(|v| v.as_str()) {
            return mapped.to_string();
        }
    }
    item_key.to_string()
}
