//! Local KV Store: one `.registry_data` database per directory,
//! opened at Resolver construction and kept open for the process lifetime.
//!
//! `sled` takes an exclusive lock on its database directory for the life of
//! the process that opened it, so cross-process write coordination falls out
//! of that for free (see `DESIGN.md` for the adaptation this simplifies
//! away). A `tokio::sync::Mutex` still serializes mutating calls within this
//! process, keeping one mutation in flight at a time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{validate_schema_attr, PutMeta, ResourceMeta, SchemaEntry, Store};
use crate::error::Result;
use crate::id::Id;

const DB_DIR_NAME: &str = ".registry_data";
const KEY_VERSION: &str = "0version";
const KEY_ROOTS: &str = "0root";
const VERSION: (u16, u16, u16) = (0, 1, 0);
const EDGE_PREFIX: &str = "__edges__.";

pub struct LocalKvStore {
    db: sled::Db,
    layer: String,
    write_lock: Mutex<()>,
    #[allow(dead_code)]
    dbpath: PathBuf,
}

impl LocalKvStore {
    /// Open (or create) the dotfile database under `dir`, declaring `layer`
    /// as this store's auto-registration name (`here`, `my`, `system`, ...).
    pub fn open(dir: &Path, layer: impl Into<String>) -> Result<Self> {
        let dbpath = dir.join(DB_DIR_NAME);
        let db = sled::open(&dbpath)?;
        if !db.contains_key(KEY_VERSION)? {
            db.insert(KEY_VERSION, serde_json::to_vec(&VERSION).unwrap())?;
            db.insert(KEY_ROOTS, serde_json::to_vec(&Vec::<String>::new()).unwrap())?;
        }
        Ok(LocalKvStore {
            db,
            layer: layer.into(),
            write_lock: Mutex::new(()),
            dbpath,
        })
    }

    fn doc_key(id: &Id) -> String {
        format!("__doc__.{id}")
    }

    fn roots(&self) -> Result<Vec<String>> {
        match self.db.get(KEY_ROOTS)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Root-name tracking is append-only: deleting the last `r.*` resource
    /// does not remove `r` (preserved open question, see `DESIGN.md`).
    fn record_root(&self, root: &str) -> Result<()> {
        let mut roots = self.roots()?;
        if !roots.iter().any(|r| r == root) {
            roots.push(root.to_string());
            self.db.insert(KEY_ROOTS, serde_json::to_vec(&roots).unwrap())?;
        }
        Ok(())
    }

    fn edge_key(source: &Id) -> String {
        format!("{EDGE_PREFIX}{source}")
    }

    fn read_edge_list(&self, key: &str) -> Result<Vec<(Id, Id)>> {
        match self.db.get(key)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Store for LocalKvStore {
    async fn get(&self, id: &Id) -> Result<Option<(Vec<u8>, ResourceMeta)>> {
        let payload = match self.db.get(id.as_str())? {
            Some(v) => v,
            None => return Ok(None),
        };
        let meta = match self.db.get(Self::doc_key(id))? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => ResourceMeta {
                doc: String::new(),
                creator: None,
                created_at: chrono::Utc::now(),
                size: payload.len(),
            },
        };
        Ok(Some((payload.to_vec(), meta)))
    }

    async fn put(&self, id: &Id, payload: &[u8], meta: PutMeta) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let resource_meta = ResourceMeta {
            doc: meta.doc,
            creator: meta.creator,
            created_at: chrono::Utc::now(),
            size: payload.len(),
        };
        self.db.insert(id.as_str(), payload)?;
        self.db
            .insert(Self::doc_key(id), serde_json::to_vec(&resource_meta).unwrap())?;
        self.record_root(id.root())?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn delete(&self, id: &Id) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let removed = self.db.remove(id.as_str())?;
        self.db.remove(Self::doc_key(id))?;
        self.db.flush_async().await?;
        if removed.is_none() {
            return Err(crate::error::RegistryError::MissingResource { id: id.clone() });
        }
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<Id>> {
        Ok(self
            .db
            .scan_prefix(prefix.as_bytes())
            .keys()
            .filter_map(|k| k.ok())
            .filter_map(|k| String::from_utf8(k.to_vec()).ok())
            .filter(|k| !k.starts_with("__doc__.") && !Id::new(k.clone()).is_reserved())
            .map(Id::new)
            .collect())
    }

    async fn list_prefix_with_meta(&self, prefix: &str) -> Result<Vec<(Id, ResourceMeta)>> {
        let mut out = Vec::new();
        for id in self.list_prefix(prefix).await? {
            if let Some((_, meta)) = self.get(&id).await? {
                out.push((id, meta));
            }
        }
        Ok(out)
    }

    async fn get_schema(&self, id: &Id) -> Result<Option<SchemaEntry>> {
        match self.db.get(id.schema_key().as_str())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_schema(&self, id: &Id, attr: &str, descriptor: serde_json::Value) -> Result<()> {
        validate_schema_attr(attr, &descriptor)?;
        let _guard = self.write_lock.lock().await;
        let key = id.schema_key();
        let mut entry: SchemaEntry = match self.db.get(key.as_str())? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => HashMap::new(),
        };
        entry.insert(attr.to_string(), descriptor);
        self.db.insert(key.as_str(), serde_json::to_vec(&entry).unwrap())?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn del_schema(&self, id: &Id, attr: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = id.schema_key();
        if let Some(bytes) = self.db.get(key.as_str())? {
            let mut entry: SchemaEntry = serde_json::from_slice(&bytes)?;
            entry.remove(attr);
            self.db.insert(key.as_str(), serde_json::to_vec(&entry).unwrap())?;
            self.db.flush_async().await?;
        }
        Ok(())
    }

    async fn register_services(
        &self,
        _location_key: &str,
        services: HashMap<Id, (ResourceMeta, Vec<u8>)>,
    ) -> Result<usize> {
        let mut n = 0;
        for (id, (meta, payload)) in services {
            self.put(
                &id,
                &payload,
                PutMeta {
                    doc: meta.doc,
                    creator: meta.creator,
                    location_key: _location_key.to_string(),
                },
            )
            .await?;
            n += 1;
        }
        Ok(n)
    }

    fn layer_name(&self) -> Option<String> {
        Some(self.layer.clone())
    }

    async fn add_schema_edge(&self, source: &Id, target: &Id, edge_id: &Id) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = Self::edge_key(source);
        let mut edges = self.read_edge_list(&key)?;
        if !edges.iter().any(|(t, _)| t == target) {
            edges.push((target.clone(), edge_id.clone()));
            self.db.insert(key, serde_json::to_vec(&edges).unwrap())?;
            self.db.flush_async().await?;
        }
        Ok(())
    }

    async fn schema_edges_from(&self, source: &Id) -> Result<Vec<(Id, Id)>> {
        self.read_edge_list(&Self::edge_key(source))
    }

    async fn remove_schema_edges(&self, node: &Id) -> Result<Vec<(Id, Id, Id)>> {
        let _guard = self.write_lock.lock().await;
        let mut removed = Vec::new();

        let own_key = Self::edge_key(node);
        for (target, edge_id) in self.read_edge_list(&own_key)? {
            removed.push((node.clone(), target, edge_id));
        }
        self.db.remove(own_key.as_str())?;

        for key in self.db.scan_prefix(EDGE_PREFIX.as_bytes()).keys() {
            let key = key?;
            let key_str = String::from_utf8_lossy(&key).to_string();
            if key_str == own_key {
                continue;
            }
            let source = Id::new(key_str.trim_start_matches(EDGE_PREFIX).to_string());
            let edges = self.read_edge_list(&key_str)?;
            let (incoming, remaining): (Vec<_>, Vec<_>) =
                edges.into_iter().partition(|(t, _)| t == node);
            if !incoming.is_empty() {
                for (target, edge_id) in incoming {
                    removed.push((source.clone(), target, edge_id));
                }
                self.db
                    .insert(key_str, serde_json::to_vec(&remaining).unwrap())?;
            }
        }
        self.db.flush_async().await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = LocalKvStore::open(dir.path(), "here").unwrap();
        let id = Id::new("T.one");
        store
            .put(
                &id,
                b"payload",
                PutMeta {
                    doc: "a trivial resource".into(),
                    creator: None,
                    location_key: dir.path().display().to_string(),
                },
            )
            .await
            .unwrap();

        let (payload, meta) = store.get(&id).await.unwrap().unwrap();
        assert_eq!(payload, b"payload");
        assert_eq!(meta.doc, "a trivial resource");
    }

    #[tokio::test]
    async fn root_name_is_recorded_and_append_only() {
        let dir = tempdir().unwrap();
        let store = LocalKvStore::open(dir.path(), "here").unwrap();
        let id = Id::new("T.one");
        store
            .put(
                &id,
                b"x",
                PutMeta {
                    doc: "doc".into(),
                    creator: None,
                    location_key: "x".into(),
                },
            )
            .await
            .unwrap();
        assert!(store.roots().unwrap().iter().any(|r| r == "T"));

        store.delete(&id).await.unwrap();
        // Root tracking is append-only: deleting the last T.* entry does
        // not remove "T" from the root set.
        assert!(store.roots().unwrap().iter().any(|r| r == "T"));
    }

    #[tokio::test]
    async fn missing_get_is_none_not_an_error() {
        let dir = tempdir().unwrap();
        let store = LocalKvStore::open(dir.path(), "here").unwrap();
        assert!(store.get(&Id::new("Nope")).await.unwrap().is_none());
    }
}
