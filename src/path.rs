//! Dotted-name path proxies: sugar over the Resolver for attribute-style
//! traversal (`Bio.seq.Swissprot` reads as
//! `root.child("seq").child("Swissprot")`), holding an explicitly shared
//! handle instead of reaching for a module-level singleton.
//!
//! `Resolver`'s cache and shadow maps need exclusive access per call, so the
//! shared handle is `Arc<Mutex<Resolver>>` rather than a bare `Arc`; nothing
//! here spawns concurrent resolutions, the lock only serializes calls made
//! through different proxy handles to the same resolver.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::id::Id;
use crate::resolver::Resolver;
use crate::resource::Resource;

pub type SharedResolver = Arc<Mutex<Resolver>>;

/// A dotted resource name that hasn't been resolved yet. Building one never
/// touches the registry; only [`ResourcePath::get`] does.
#[derive(Clone)]
pub struct ResourcePath {
    resolver: SharedResolver,
    id: Id,
}

impl ResourcePath {
    pub fn new(resolver: SharedResolver, root: impl Into<String>) -> Self {
        ResourcePath {
            resolver,
            id: Id::new(root.into()),
        }
    }

    /// Extend the dotted path by one segment, the way `Bio.seq` extends to
    /// `Bio.seq.Swissprot` under repeated attribute access.
    pub fn child(&self, segment: &str) -> ResourcePath {
        ResourcePath {
            resolver: self.resolver.clone(),
            id: self.id.with_suffix(segment),
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Resolve the accumulated dotted ID, walking the full path in order.
    pub async fn get(&self) -> Result<Resource> {
        self.resolver.lock().await.resolve(&self.id, None).await
    }

    /// Resolve restricted to a single named layer.
    pub async fn get_from_layer(&self, layer: &str) -> Result<Resource> {
        self.resolver.lock().await.resolve(&self.id, Some(layer)).await
    }

    /// Schema-bound attribute access on the resolved resource.
    pub fn schema(&self) -> SchemaPath {
        SchemaPath::new(self.resolver.clone(), self.id.clone())
    }
}

/// A fixed-layer view, for client code that wants to pin lookups to one
/// named Store (e.g. always `MySQL`) rather than walking the whole path.
#[derive(Clone)]
pub struct ResourceLayer {
    resolver: SharedResolver,
    layer: String,
}

impl ResourceLayer {
    pub fn new(resolver: SharedResolver, layer: impl Into<String>) -> Self {
        ResourceLayer {
            resolver,
            layer: layer.into(),
        }
    }

    pub fn path(&self, id: impl Into<String>) -> ResourcePath {
        ResourcePath::new(self.resolver.clone(), id.into())
    }

    pub async fn get(&self, id: &str) -> Result<Resource> {
        self.resolver
            .lock()
            .await
            .resolve(&Id::new(id), Some(&self.layer))
            .await
    }
}

/// Sugar over [`Resolver::get_attr`] / [`Resolver::get_item_attr`] for a
/// single resource's schema-bound attributes.
#[derive(Clone)]
pub struct SchemaPath {
    resolver: SharedResolver,
    owner: Id,
}

impl SchemaPath {
    pub fn new(resolver: SharedResolver, owner: Id) -> Self {
        SchemaPath { resolver, owner }
    }

    /// One-time (Direct/Inverse) shadow attribute access.
    pub async fn attr(&self, name: &str) -> Result<Value> {
        self.resolver.lock().await.get_attr(&self.owner, name).await
    }

    /// Item-kind shadow attribute access, from the perspective of an item
    /// identified by `item_key` (or `item_fields`'s `mapAttr` field).
    pub async fn item_attr(&self, item_key: &str, item_fields: &Value, name: &str) -> Result<Value> {
        self.resolver
            .lock()
            .await
            .get_item_attr(&self.owner, item_key, item_fields, name)
            .await
    }
}
