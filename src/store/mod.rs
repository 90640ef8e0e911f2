//! Back-end contract: a Store is any component providing the operations
//! below over one logical resource database. Three variants exist: local
//! KV, SQL, remote RPC, wrapped here behind a single trait object so the
//! Resolver's path can hold a heterogeneous, ordered list of them.

pub mod kv;
pub mod rpc;
pub mod sql;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{RegistryError, Result};
use crate::id::Id;

/// Metadata recorded alongside a resource's serialized payload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResourceMeta {
    pub doc: String,
    pub creator: Option<String>,
    pub created_at: DateTime<Utc>,
    pub size: usize,
}

/// Arguments to `put`, distinct from `ResourceMeta` because `location_key`
/// disambiguates storage, it isn't part of the resource's recorded facts.
#[derive(Debug, Clone)]
pub struct PutMeta {
    pub doc: String,
    pub creator: Option<String>,
    pub location_key: String,
}

/// A relation-descriptor payload keyed by attribute name, as stored under
/// `SCHEMA.<id>`.
pub type SchemaEntry = HashMap<String, serde_json::Value>;

#[async_trait]
pub trait Store: Send + Sync {
    /// First hit across known location keys wins; `Ok(None)` is a miss,
    /// distinct from an `Err` I/O failure.
    async fn get(&self, id: &Id) -> Result<Option<(Vec<u8>, ResourceMeta)>>;

    /// Replaces any prior `(id, locationKey)` row; records the ID's root
    /// prefix on first use.
    async fn put(&self, id: &Id, payload: &[u8], meta: PutMeta) -> Result<()>;

    async fn delete(&self, id: &Id) -> Result<()>;

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<Id>>;
    async fn list_prefix_with_meta(&self, prefix: &str) -> Result<Vec<(Id, ResourceMeta)>>;

    async fn get_schema(&self, id: &Id) -> Result<Option<SchemaEntry>>;
    async fn put_schema(&self, id: &Id, attr: &str, descriptor: serde_json::Value) -> Result<()>;
    async fn del_schema(&self, id: &Id, attr: &str) -> Result<()>;

    /// Add a directed edge to the schema graph: `source` --edge_id--> `target`.
    /// Default no-op for stores that don't carry a schema graph (e.g. a
    /// read-only RPC store).
    async fn add_schema_edge(&self, _source: &Id, _target: &Id, _edge_id: &Id) -> Result<()> {
        Ok(())
    }

    /// All outgoing edges from `source`, as `(target, edge_id)` pairs.
    async fn schema_edges_from(&self, _source: &Id) -> Result<Vec<(Id, Id)>> {
        Ok(Vec::new())
    }

    /// Remove and return every edge incident to `node` (outgoing or
    /// incoming), for a node-removal cascade.
    async fn remove_schema_edges(&self, _node: &Id) -> Result<Vec<(Id, Id, Id)>> {
        Ok(Vec::new())
    }

    /// Bulk-register remotely-served resources under an alternate location
    /// key; returns the count successfully registered.
    async fn register_services(
        &self,
        location_key: &str,
        services: HashMap<Id, (ResourceMeta, Vec<u8>)>,
    ) -> Result<usize>;

    /// The layer name this Store declares for auto-registration, if any.
    fn layer_name(&self) -> Option<String>;

    fn is_read_only(&self) -> bool {
        false
    }
}

/// Non-`-` attributes must carry a `targetID`; `-`-prefixed names are
/// graph-structural entries (e.g. `-schemaEdge`) and are exempt.
pub fn validate_schema_attr(attr: &str, descriptor: &serde_json::Value) -> Result<()> {
    if attr.starts_with('-') {
        return Ok(());
    }
    match descriptor.get("targetID") {
        Some(serde_json::Value::String(_)) => Ok(()),
        _ => Err(RegistryError::SchemaMissing {
            id: Id::new(""),
            attr: attr.to_string(),
        }),
    }
}

/// Uniform "immutable store" failure, raised by every mutating op on a
/// read-only backend (notably the RPC client).
pub fn immutable_store_error() -> RegistryError {
    RegistryError::ImmutableStore(
        "this store is read-only; give a user-editable store as the first entry in the path"
            .to_string(),
    )
}
