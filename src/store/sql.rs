//! SQL Store: one table per resource database, columns
//! `(pygr_id, location, docstring, user, creation_time, pickle_size,
//! info_blob, objdata)` unique on `(pygr_id, location)`, with a paired
//! `<tbl>_schema` table holding the schema graph. Schema entries are stored
//! as rows in the main table keyed by `SCHEMA.<id>`, `location` holding the
//! attribute name and `objdata` the serialized descriptor.
//!
//! Uses `sqlx`'s runtime query API (not the `query!` macro) since this
//! crate has no `DATABASE_URL` / offline query cache available at build
//! time.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySqlPool, Row};

use super::{immutable_store_error, validate_schema_attr, PutMeta, ResourceMeta, SchemaEntry, Store};
use crate::error::{RegistryError, Result};
use crate::id::Id;

const VERSION: &str = "0.1.0";

pub struct SqlStore {
    pool: MySqlPool,
    table: String,
    read_only: bool,
    layer: RwLock<Option<String>>,
}

impl SqlStore {
    /// Connect to `db.tbl` (the `mysql:db.tbl` path-entry form) and ensure
    /// the resource table exists, stamping a version row and, if
    /// `create_layer` is given, a `PYGRLAYERNAME` row on first creation.
    pub async fn connect(url: &str, db_dot_table: &str, create_layer: Option<&str>) -> Result<Self> {
        let pool = MySqlPoolOptions::new().max_connections(5).connect(url).await?;
        let table = db_dot_table.replace('.', "_");

        let store = SqlStore {
            pool,
            table,
            read_only: false,
            layer: RwLock::new(None),
        };

        if let Some(layer) = create_layer {
            store.create_table(layer).await?;
        } else {
            store.load_layer_name().await?;
        }
        Ok(store)
    }

    /// Wrap an already-connected store as read-only, as the remote RPC
    /// surface does for a read-only server's backing database.
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    async fn create_table(&self, layer: &str) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                pygr_id VARCHAR(255) NOT NULL,
                location VARCHAR(255) NOT NULL,
                docstring VARCHAR(255),
                user VARCHAR(255),
                creation_time DATETIME,
                pickle_size INT,
                info_blob TEXT,
                objdata TEXT NOT NULL,
                UNIQUE(pygr_id, location)
            )",
            self.table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                source_id VARCHAR(255) NOT NULL,
                target_id VARCHAR(255) NOT NULL,
                edge_id VARCHAR(255) NOT NULL,
                UNIQUE(source_id, target_id)
            )",
            self.schema_table()
        ))
        .execute(&self.pool)
        .await?;

        self.replace_row("PYGRLAYERNAME", layer, None, "").await?;
        self.replace_row("0version", "init", None, VERSION).await?;
        *self.layer.write().unwrap() = Some(layer.to_string());
        Ok(())
    }

    /// Name of the paired table holding the schema graph's adjacency rows,
    /// distinct from the `SCHEMA.<id>` attribute-binding rows in the main
    /// table.
    fn schema_table(&self) -> String {
        format!("{}_schema", self.table)
    }

    async fn replace_row(
        &self,
        pygr_id: &str,
        location: &str,
        docstring: Option<&str>,
        objdata: &str,
    ) -> Result<()> {
        sqlx::query(&format!(
            "REPLACE INTO {} (pygr_id, location, docstring, objdata) VALUES (?, ?, ?, ?)",
            self.table
        ))
        .bind(pygr_id)
        .bind(location)
        .bind(docstring)
        .bind(objdata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_layer_name(&self) -> Result<()> {
        let row = sqlx::query(&format!(
            "SELECT location FROM {} WHERE pygr_id = ?",
            self.table
        ))
        .bind("PYGRLAYERNAME")
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = row {
            let name: String = row.try_get("location")?;
            *self.layer.write().unwrap() = Some(name);
        }
        Ok(())
    }

    async fn record_root(&self, root: &str) -> Result<()> {
        let exists = sqlx::query(&format!(
            "SELECT 1 FROM {} WHERE pygr_id = ? AND location = ?",
            self.table
        ))
        .bind("0root")
        .bind(root)
        .fetch_optional(&self.pool)
        .await?;
        if exists.is_none() {
            self.replace_row("0root", root, None, "").await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn get(&self, id: &Id) -> Result<Option<(Vec<u8>, ResourceMeta)>> {
        let rows = sqlx::query(&format!(
            "SELECT location, objdata, docstring, user, creation_time FROM {} WHERE pygr_id = ?",
            self.table
        ))
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        // First location wins; iteration order across location keys is
        // otherwise unspecified.
        for row in rows {
            let objdata: String = row.try_get("objdata")?;
            let doc: Option<String> = row.try_get("docstring")?;
            let creator: Option<String> = row.try_get("user")?;
            let created_at: Option<chrono::NaiveDateTime> = row.try_get("creation_time")?;
            let payload = objdata.into_bytes();
            let meta = ResourceMeta {
                doc: doc.unwrap_or_default(),
                creator,
                created_at: created_at.map(|t| t.and_utc()).unwrap_or_else(Utc::now),
                size: payload.len(),
            };
            return Ok(Some((payload, meta)));
        }
        Ok(None)
    }

    async fn put(&self, id: &Id, payload: &[u8], meta: PutMeta) -> Result<()> {
        if self.read_only {
            return Err(immutable_store_error());
        }
        let objdata = String::from_utf8_lossy(payload).to_string();
        sqlx::query(&format!(
            "REPLACE INTO {} (pygr_id, location, docstring, user, creation_time, pickle_size, objdata)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.table
        ))
        .bind(id.as_str())
        .bind(&meta.location_key)
        .bind(&meta.doc)
        .bind(&meta.creator)
        .bind(Utc::now().naive_utc())
        .bind(payload.len() as i32)
        .bind(&objdata)
        .execute(&self.pool)
        .await?;
        self.record_root(id.root()).await?;
        Ok(())
    }

    async fn delete(&self, id: &Id) -> Result<()> {
        if self.read_only {
            return Err(immutable_store_error());
        }
        let result = sqlx::query(&format!("DELETE FROM {} WHERE pygr_id = ?", self.table))
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::MissingResource { id: id.clone() });
        }
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<Id>> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT pygr_id FROM {} WHERE pygr_id LIKE ?",
            self.table
        ))
        .bind(format!("{prefix}%"))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.try_get::<String, _>("pygr_id").ok())
            .map(Id::new)
            .filter(|id| !id.is_reserved())
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
        let rows = sqlx::query(&format!(
            "SELECT location, objdata FROM {} WHERE pygr_id = ?",
            self.table
        ))
        .bind(id.schema_key().as_str())
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut entry = SchemaEntry::new();
        for row in rows {
            let attr: String = row.try_get("location")?;
            let objdata: String = row.try_get("objdata")?;
            entry.insert(attr, serde_json::from_str(&objdata)?);
        }
        Ok(Some(entry))
    }

    async fn put_schema(&self, id: &Id, attr: &str, descriptor: serde_json::Value) -> Result<()> {
        if self.read_only {
            return Err(immutable_store_error());
        }
        validate_schema_attr(attr, &descriptor)?;
        let objdata = serde_json::to_string(&descriptor)?;
        self.replace_row(id.schema_key().as_str(), attr, None, &objdata)
            .await
    }

    async fn del_schema(&self, id: &Id, attr: &str) -> Result<()> {
        if self.read_only {
            return Err(immutable_store_error());
        }
        sqlx::query(&format!(
            "DELETE FROM {} WHERE pygr_id = ? AND location = ?",
            self.table
        ))
        .bind(id.schema_key().as_str())
        .bind(attr)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn register_services(
        &self,
        location_key: &str,
        services: HashMap<Id, (ResourceMeta, Vec<u8>)>,
    ) -> Result<usize> {
        if self.read_only {
            return Err(immutable_store_error());
        }
        let mut n = 0;
        for (id, (meta, payload)) in services {
            self.put(
                &id,
                &payload,
                PutMeta {
                    doc: meta.doc,
                    creator: meta.creator,
                    location_key: location_key.to_string(),
                },
            )
            .await?;
            n += 1;
        }
        Ok(n)
    }

    async fn add_schema_edge(&self, source: &Id, target: &Id, edge_id: &Id) -> Result<()> {
        if self.read_only {
            return Err(immutable_store_error());
        }
        sqlx::query(&format!(
            "REPLACE INTO {} (source_id, target_id, edge_id) VALUES (?, ?, ?)",
            self.schema_table()
        ))
        .bind(source.as_str())
        .bind(target.as_str())
        .bind(edge_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn schema_edges_from(&self, source: &Id) -> Result<Vec<(Id, Id)>> {
        let rows = sqlx::query(&format!(
            "SELECT target_id, edge_id FROM {} WHERE source_id = ?",
            self.schema_table()
        ))
        .bind(source.as_str())
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let target: String = row.try_get("target_id")?;
            let edge: String = row.try_get("edge_id")?;
            out.push((Id::new(target), Id::new(edge)));
        }
        Ok(out)
    }

    async fn remove_schema_edges(&self, node: &Id) -> Result<Vec<(Id, Id, Id)>> {
        if self.read_only {
            return Err(immutable_store_error());
        }
        let rows = sqlx::query(&format!(
            "SELECT source_id, target_id, edge_id FROM {} WHERE source_id = ? OR target_id = ?",
            self.schema_table()
        ))
        .bind(node.as_str())
        .bind(node.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut removed = Vec::with_capacity(rows.len());
        for row in &rows {
            let source: String = row.try_get("source_id")?;
            let target: String = row.try_get("target_id")?;
            let edge: String = row.try_get("edge_id")?;
            removed.push((Id::new(source), Id::new(target), Id::new(edge)));
        }

        sqlx::query(&format!(
            "DELETE FROM {} WHERE source_id = ? OR target_id = ?",
            self.schema_table()
        ))
        .bind(node.as_str())
        .bind(node.as_str())
        .execute(&self.pool)
        .await?;

        Ok(removed)
    }

    fn layer_name(&self) -> Option<String> {
        self.layer.read().unwrap().clone()
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
