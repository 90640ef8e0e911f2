//! The orchestrator: path discovery, the in-memory resource cache, schema
//! lookup, and shadow-attribute binding all meet here. One long-lived
//! component owns the set of backend handles, with a scoped guard around
//! re-entrant work (see `gazette::journal::append`'s guard-wrapped retry
//! loop for the shape the cursor stack below generalizes).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::warn;

use crate::codec::{self, ReferenceResolver};
use crate::config::{self, AutoLayer, PathEntry};
use crate::error::{RegistryError, Result};
use crate::id::Id;
use crate::resource::Resource;
use crate::schema::{self, RelationDescriptor};
use crate::shadow::{self, ShadowAttrs};
use crate::store::kv::LocalKvStore;
use crate::store::rpc::RpcStore;
use crate::store::sql::SqlStore;
use crate::store::Store;

/// Opaque marker pushed for the duration of a SQL store's load, standing in
/// for a reused-connection handle. `sqlx`'s pool already multiplexes
/// connections safely, so nothing but the stack discipline itself needs
/// reproducing here. See `DESIGN.md`.
struct SqlCursorToken;

/// Owns a clone of the shared stack rather than borrowing it from
/// `Resolver`, so holding a guard across a recursive `&mut self` call (the
/// nested codec load) doesn't fight the borrow checker over a field that's
/// logically disjoint but reached through the same `self`. `Arc<Mutex<_>>`
/// rather than `Rc<RefCell<_>>` so the guard, and therefore `Resolver`
/// itself, stays `Send`; the lock is only ever held for the duration of a
/// single push or pop, never across an `.await`.
struct CursorGuard {
    stack: Arc<Mutex<Vec<SqlCursorToken>>>,
}

impl CursorGuard {
    fn push(stack: &Arc<Mutex<Vec<SqlCursorToken>>>) -> Self {
        stack.lock().unwrap().push(SqlCursorToken);
        CursorGuard { stack: stack.clone() }
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.stack.lock().unwrap().pop();
    }
}

/// Process-wide singleton in spirit, constructible per process but passed
/// explicitly rather than looked up globally.
pub struct Resolver {
    path: Vec<Arc<dyn Store>>,
    layers: HashMap<String, usize>,
    cache: HashMap<Id, Resource>,
    in_flight: HashSet<Id>,
    shadow: HashMap<Id, ShadowAttrs>,
    cursor_stack: Arc<Mutex<Vec<SqlCursorToken>>>,
}

impl Resolver {
    /// Build an empty resolver with no path; mainly useful for tests that
    /// assemble their own `Store`s via [`Resolver::push_store`].
    pub fn empty() -> Self {
        Resolver {
            path: Vec::new(),
            layers: HashMap::new(),
            cache: HashMap::new(),
            in_flight: HashSet::new(),
            shadow: HashMap::new(),
            cursor_stack: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Discover the path from `REGISTRY_PATH` (or its default) and open
    /// every entry. Errors opening an individual entry are logged and that
    /// entry is dropped from the path rather than failing construction.
    pub async fn from_env() -> Result<Self> {
        let entries = config::read_path_entries()?;
        let mut resolver = Resolver::empty();
        for (layer, entry) in entries {
            match Resolver::open_entry(&entry, layer).await {
                Ok(store) => {
                    // A store may declare its own layer name (RPC's
                    // `getName()`, SQL's `PYGRLAYERNAME` row); that wins
                    // over the scheme-based default.
                    let name = store
                        .layer_name()
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| layer.name().to_string());
                    resolver.push_store(&name, store);
                }
                Err(e) => warn!(%e, ?entry, "dropping unopenable path entry"),
            }
        }
        Ok(resolver)
    }

    async fn open_entry(entry: &PathEntry, layer: AutoLayer) -> Result<Arc<dyn Store>> {
        match entry {
            PathEntry::Http(url) => Ok(Arc::new(RpcStore::connect(url).await?)),
            PathEntry::MySql(db_dot_table) => {
                let url = std::env::var("REGISTRY_MYSQL_URL").unwrap_or_default();
                Ok(Arc::new(SqlStore::connect(&url, db_dot_table, None).await?))
            }
            PathEntry::LocalPath(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| RegistryError::StoreIo(e.to_string()))?;
                Ok(Arc::new(LocalKvStore::open(std::path::Path::new(dir), layer.name())?))
            }
        }
    }

    /// Append `store` to the path, auto-registering `layer` if that name
    /// isn't already claimed (duplicates are ignored with a warning).
    pub fn push_store(&mut self, layer: &str, store: Arc<dyn Store>) {
        let idx = self.path.len();
        if !layer.is_empty() {
            if self.layers.contains_key(layer) {
                warn!(layer, "layer name already claimed; ignoring duplicate");
            } else {
                self.layers.insert(layer.to_string(), idx);
            }
        }
        self.path.push(store);
    }

    fn candidate_indices(&self, layer: Option<&str>) -> Vec<usize> {
        match layer {
            Some(name) => self.layers.get(name).cloned().into_iter().collect(),
            None => (0..self.path.len()).collect(),
        }
    }

    /// Resolve `id`, restricted to `layer` if given: cache hit, then cycle
    /// check, then a first-hit scan down the path.
    pub async fn resolve(&mut self, id: &Id, layer: Option<&str>) -> Result<Resource> {
        if let Some(cached) = self.cache.get(id) {
            return Ok(cached.clone());
        }
        if self.in_flight.contains(id) {
            // Cycle. `serde_json::Value` has no object identity to share
            // between the two sides of a cycle, so the best this
            // representation can do is hand back a stub carrying just the
            // ID rather than a value that later mutates in place to match
            // the in-flight object (documented in `DESIGN.md`).
            return Ok(Resource {
                doc: String::new(),
                persistent_id: Some(id.clone()),
                ignore_shadow_attr: Default::default(),
                body: Value::Null,
            });
        }

        self.in_flight.insert(id.clone());
        let result = self.resolve_uncached(id, layer).await;
        self.in_flight.remove(id);

        let mut resource = result?;
        resource.persistent_id = Some(id.clone());
        self.cache.insert(id.clone(), resource.clone());
        self.apply_schema(id).await?;
        Ok(resource)
    }

    async fn resolve_uncached(&mut self, id: &Id, layer: Option<&str>) -> Result<Resource> {
        for idx in self.candidate_indices(layer) {
            let store = self.path[idx].clone();
            let _cursor = CursorGuard::push(&self.cursor_stack);
            let hit = match store.get(id).await {
                Ok(Some(hit)) => hit,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%e, %id, "store I/O error during resolve, trying next store");
                    continue;
                }
            };
            let (payload, meta) = hit;
            match codec::load(&payload, self).await {
                Ok(mut resource) => {
                    resource.doc = meta.doc;
                    return Ok(resource);
                }
                Err(RegistryError::MissingDependency { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(RegistryError::MissingResource { id: id.clone() })
    }

    /// A single `put`, gated on the object carrying a real docstring.
    pub async fn put(&mut self, id: &Id, mut resource: Resource, layer: Option<&str>) -> Result<()> {
        if !resource.has_docstring() {
            return Err(RegistryError::MissingDocstring);
        }
        resource.persistent_id = Some(id.clone());
        let bytes = codec::dump(&resource)?;
        let store = self.select_write_store(layer)?;
        store
            .put(
                id,
                &bytes,
                crate::store::PutMeta {
                    doc: resource.doc.clone(),
                    creator: None,
                    location_key: layer.unwrap_or("here").to_string(),
                },
            )
            .await?;
        self.cache.insert(id.clone(), resource);
        Ok(())
    }

    /// Batch save: pre-assign every entry's persistent ID before writing any
    /// of them, so intra-batch cross-references
    /// (embedded via [`codec::embed`] ahead of time by the caller) already
    /// carry the ID they'll serialize as.
    pub async fn put_all(&mut self, entries: Vec<(Id, Resource)>, layer: Option<&str>) -> Result<()> {
        let mut prepared = entries;
        for (id, resource) in prepared.iter_mut() {
            resource.persistent_id = Some(id.clone());
        }
        for (id, resource) in prepared {
            self.put(&id, resource, layer).await?;
        }
        Ok(())
    }

    fn select_write_store(&self, layer: Option<&str>) -> Result<Arc<dyn Store>> {
        let idx = match layer {
            Some(name) => *self
                .layers
                .get(name)
                .ok_or_else(|| RegistryError::MissingResource { id: Id::new(name) })?,
            None => 0,
        };
        let store = self
            .path
            .get(idx)
            .cloned()
            .ok_or(RegistryError::EmptyPath)?;
        if store.is_read_only() {
            return Err(crate::store::immutable_store_error());
        }
        Ok(store)
    }

    /// Delete `id`, cascading into its schema entries.
    pub async fn delete(&mut self, id: &Id, layer: Option<&str>) -> Result<()> {
        let store = self.select_write_store(layer)?;
        store.delete(id).await?;
        schema::delete_node(store.as_ref(), id).await?;
        self.cache.remove(id);
        self.shadow.remove(id);
        Ok(())
    }

    /// Bind a relation descriptor for `attr` on `source` (wraps
    /// [`schema::bind`] plus this resolver's own idempotency check so a
    /// resource's already-installed shadow attributes stay consistent).
    pub async fn bind_schema(
        &mut self,
        source: &Id,
        attr: &str,
        edge_id: &Id,
        descriptor: RelationDescriptor,
    ) -> Result<()> {
        let store = self.select_write_store(None)?;
        schema::bind(store.as_ref(), source, attr, edge_id, descriptor.clone()).await?;
        self.shadow.entry(source.clone()).or_default().bind(attr, descriptor)
    }

    /// After a fresh resolution, install shadow attributes from the first
    /// store in the path that has a schema entry for `id` (first-hit,
    /// mirroring `get`'s own precedence).
    async fn apply_schema(&mut self, id: &Id) -> Result<()> {
        let ignores = self
            .cache
            .get(id)
            .map(|r| r.ignore_shadow_attr.clone())
            .unwrap_or_default();

        for idx in 0..self.path.len() {
            let store = self.path[idx].clone();
            let entry = match store.get_schema(id).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(_) => continue,
            };
            for (attr, raw) in entry {
                if attr.starts_with('-') || ignores.contains(&attr) {
                    continue;
                }
                let descriptor: RelationDescriptor = match serde_json::from_value(raw) {
                    Ok(d) => d,
                    Err(_) => continue,
                };
                self.shadow
                    .entry(id.clone())
                    .or_default()
                    .bind(&attr, descriptor)?;
            }
            break;
        }
        Ok(())
    }

    /// Access a one-time shadow attribute (Direct or Inverse descriptor):
    /// resolved once, then served from the instance's cache on every
    /// subsequent access.
    pub async fn get_attr(&mut self, id: &Id, attr: &str) -> Result<Value> {
        if let Some(value) = self.shadow.get(id).and_then(|s| s.cached(attr)) {
            return Ok(value.clone());
        }
        let descriptor = self
            .shadow
            .get(id)
            .and_then(|s| s.descriptor(attr).cloned())
            .ok_or_else(|| RegistryError::SchemaMissing {
                id: id.clone(),
                attr: attr.to_string(),
            })?;

        let value = match &descriptor {
            RelationDescriptor::Direct { target_id } | RelationDescriptor::Inverse { target_id } => {
                self.resolve(target_id, None).await?.body
            }
            _ => {
                return Err(RegistryError::SchemaMissing {
                    id: id.clone(),
                    attr: attr.to_string(),
                })
            }
        };
        self.shadow.entry(id.clone()).or_default().cache(attr, value.clone());
        Ok(value)
    }

    /// Unary invert: the resource at the other end of `id`'s `inverseDB`
    /// binding. An Inverse relation's defining invariant is that inverting
    /// twice returns to the start, so calling this on the result is
    /// expected to resolve back to `id` itself.
    pub async fn invert(&mut self, id: &Id) -> Result<Resource> {
        let target_id = self
            .shadow
            .get(id)
            .and_then(|s| s.descriptor("inverseDB"))
            .and_then(|d| match d {
                RelationDescriptor::Inverse { target_id } => Some(target_id.clone()),
                _ => None,
            })
            .ok_or_else(|| RegistryError::SchemaMissing {
                id: id.clone(),
                attr: "inverseDB".to_string(),
            })?;
        self.resolve(&target_id, None).await
    }

    /// Access an Item-kind shadow attribute from the perspective of an item
    /// belonging to `owner_id`'s container: resolve the container named by
    /// the descriptor (or, when `invert` is set, `owner_id` itself), then
    /// look `item_key`/`item_fields` up within it.
    pub async fn get_item_attr(
        &mut self,
        owner_id: &Id,
        item_key: &str,
        item_fields: &Value,
        attr: &str,
    ) -> Result<Value> {
        let descriptor = self
            .shadow
            .get(owner_id)
            .and_then(|s| s.descriptor(attr).cloned())
            .ok_or_else(|| RegistryError::SchemaMissing {
                id: owner_id.clone(),
                attr: attr.to_string(),
            })?;

        let target_id = match &descriptor {
            RelationDescriptor::Item { target_id, invert, .. } => {
                if invert.unwrap_or(false) {
                    owner_id.clone()
                } else {
                    target_id.clone()
                }
            }
            _ => {
                return Err(RegistryError::SchemaMissing {
                    id: owner_id.clone(),
                    attr: attr.to_string(),
                })
            }
        };

        let container = self.resolve(&target_id, None).await?;
        let key = shadow::item_lookup_key(&descriptor, item_key, item_fields);
        shadow::materialize_item(&descriptor, &container.body, &key)
    }
}

impl ReferenceResolver for Resolver {
    fn resolve<'a>(&'a mut self, id: &'a Id) -> BoxFuture<'a, Result<Resource>> {
        Box::pin(async move { self.resolve(id, None).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::LocalKvStore;
    use serde_json::json;
    use tempfile::tempdir;

    async fn resolver_with_store(dir: &std::path::Path, layer: &str) -> Resolver {
        let mut resolver = Resolver::empty();
        let store = LocalKvStore::open(dir, layer).unwrap();
        resolver.push_store(layer, Arc::new(store));
        resolver
    }

    #[tokio::test]
    async fn put_then_resolve_sets_persistent_id_and_doc() {
        let dir = tempdir().unwrap();
        let mut resolver = resolver_with_store(dir.path(), "here").await;
        let id = Id::new("T.one");
        let resource = Resource::new("a trivial resource", json!({"value": 1}));
        resolver.put(&id, resource, None).await.unwrap();

        let resolved = resolver.resolve(&id, None).await.unwrap();
        assert_eq!(resolved.persistent_id, Some(id));
        assert_eq!(resolved.doc, "a trivial resource");
        assert_eq!(resolved.body, json!({"value": 1}));
    }

    #[tokio::test]
    async fn resolve_is_cached_across_calls() {
        let dir = tempdir().unwrap();
        let mut resolver = resolver_with_store(dir.path(), "here").await;
        let id = Id::new("T.one");
        resolver
            .put(&id, Resource::new("doc", json!({"v": 1})), None)
            .await
            .unwrap();

        let first = resolver.resolve(&id, None).await.unwrap();
        let second = resolver.resolve(&id, None).await.unwrap();
        assert_eq!(first.body, second.body);
    }

    #[tokio::test]
    async fn put_without_docstring_is_rejected() {
        let dir = tempdir().unwrap();
        let mut resolver = resolver_with_store(dir.path(), "here").await;
        let id = Id::new("T.nod");
        let err = resolver
            .put(&id, Resource::new("", json!({})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingDocstring));
        assert!(resolver.resolve(&id, None).await.is_err());
    }

    #[tokio::test]
    async fn path_order_wins_on_conflicting_ids() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let mut resolver = Resolver::empty();
        resolver.push_store("a", Arc::new(LocalKvStore::open(dir_a.path(), "a").unwrap()));
        resolver.push_store("b", Arc::new(LocalKvStore::open(dir_b.path(), "b").unwrap()));

        let id = Id::new("X.y");
        resolver.put(&id, Resource::new("from a", json!("a")), Some("a")).await.unwrap();
        resolver.put(&id, Resource::new("from b", json!("b")), Some("b")).await.unwrap();

        // Force a miss in the cache to exercise path order rather than the
        // cache short-circuit.
        resolver.cache.remove(&id);
        let resolved = resolver.resolve(&id, None).await.unwrap();
        assert_eq!(resolved.body, json!("a"));
    }

    #[tokio::test]
    async fn direct_shadow_attribute_resolves_and_caches() {
        let dir = tempdir().unwrap();
        let mut resolver = resolver_with_store(dir.path(), "here").await;
        let one = Id::new("T.one");
        let two = Id::new("T.two");
        resolver
            .put(&two, Resource::new("doc two", json!({"name": "two"})), None)
            .await
            .unwrap();
        resolver
            .put(&one, Resource::new("doc one", json!({"name": "one"})), None)
            .await
            .unwrap();
        resolver
            .bind_schema(
                &one,
                "partner",
                &Id::new("T.one.partner"),
                RelationDescriptor::Direct { target_id: two.clone() },
            )
            .await
            .unwrap();

        resolver.resolve(&one, None).await.unwrap();
        let value = resolver.get_attr(&one, "partner").await.unwrap();
        assert_eq!(value, json!({"name": "two"}));
        let cached = resolver.get_attr(&one, "partner").await.unwrap();
        assert_eq!(cached, value);
    }

    #[tokio::test]
    async fn invert_resolves_the_other_side_and_back_again() {
        let dir = tempdir().unwrap();
        let mut resolver = resolver_with_store(dir.path(), "here").await;
        let a = Id::new("A");
        let b = Id::new("B");
        resolver
            .put(&a, Resource::new("doc a", json!({"name": "a"})), None)
            .await
            .unwrap();
        resolver
            .put(&b, Resource::new("doc b", json!({"name": "b"})), None)
            .await
            .unwrap();
        resolver
            .bind_schema(
                &a,
                "inverseDB",
                &Id::new("A.B.inverse"),
                RelationDescriptor::Inverse { target_id: b.clone() },
            )
            .await
            .unwrap();

        resolver.resolve(&a, None).await.unwrap();
        let inverted = resolver.invert(&a).await.unwrap();
        assert_eq!(inverted.persistent_id, Some(b.clone()));
        assert_eq!(inverted.body, json!({"name": "b"}));

        resolver.resolve(&b, None).await.unwrap();
        let back = resolver.invert(&b).await.unwrap();
        assert_eq!(back.persistent_id, Some(a));
    }
}
