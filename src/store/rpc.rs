//! Remote RPC Store: a thin HTTP/JSON client over `getResource`,
//! `registerServer`, `delResource`, `getName`, `dir`, `get_version`. Writes
//! are always rejected: give a user-editable store as the first entry in the
//! path instead. The RPC surface a Store can expose is read-only by
//! construction.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;

use super::{immutable_store_error, PutMeta, ResourceMeta, SchemaEntry, Store};
use crate::error::Result;
use crate::id::Id;

/// One pooled client shared by every `RpcStore` in the process, rather than
/// one per connection. `reqwest::Client` is already cheap to clone (an `Arc`
/// around its connection pool internally), so there's nothing to gain from
/// building a fresh one per remote layer.
static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

pub struct RpcStore {
    client: reqwest::Client,
    base_url: String,
    layer: String,
}

#[derive(Deserialize)]
struct GetResourceResponse {
    #[serde(default)]
    doc: String,
    #[serde(default)]
    locations: HashMap<String, String>,
}

#[derive(Deserialize)]
struct DirEntry {
    doc: String,
}

impl RpcStore {
    /// Connect to `base_url` and fetch the server's declared layer name
    /// (`getName`), auto-registering as layer `remote` the way the Resolver
    /// does for `http://` path entries.
    pub async fn connect(base_url: &str) -> Result<Self> {
        let client = HTTP_CLIENT.clone();
        let layer: String = client
            .get(format!("{base_url}/name"))
            .send()
            .await?
            .json()
            .await?;
        Ok(RpcStore {
            client,
            base_url: base_url.to_string(),
            layer,
        })
    }
}

#[async_trait]
impl Store for RpcStore {
    async fn get(&self, id: &Id) -> Result<Option<(Vec<u8>, ResourceMeta)>> {
        let resp = self
            .client
            .post(format!("{}/resource/{}", self.base_url, id))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: GetResourceResponse = resp.json().await?;
        // First location wins; the server's own iteration order decides
        // which one we see.
        match body.locations.into_values().next() {
            Some(payload) => Ok(Some((
                payload.into_bytes(),
                ResourceMeta {
                    doc: body.doc,
                    creator: None,
                    created_at: chrono::Utc::now(),
                    size: 0,
                },
            ))),
            None => Ok(None),
        }
    }

    async fn put(&self, _id: &Id, _payload: &[u8], _meta: PutMeta) -> Result<()> {
        Err(immutable_store_error())
    }

    async fn delete(&self, _id: &Id) -> Result<()> {
        Err(immutable_store_error())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<Id>> {
        let names: Vec<String> = self
            .client
            .get(format!("{}/dir", self.base_url))
            .query(&[("prefix", prefix), ("asDict", "false")])
            .send()
            .await?
            .json()
            .await?;
        Ok(names.into_iter().map(Id::new).collect())
    }

    async fn list_prefix_with_meta(&self, prefix: &str) -> Result<Vec<(Id, ResourceMeta)>> {
        let entries: HashMap<String, DirEntry> = self
            .client
            .get(format!("{}/dir", self.base_url))
            .query(&[("prefix", prefix), ("asDict", "true")])
            .send()
            .await?
            .json()
            .await?;
        Ok(entries
            .into_iter()
            .map(|(id, entry)| {
                (
                    Id::new(id),
                    ResourceMeta {
                        doc: entry.doc,
                        creator: None,
                        created_at: chrono::Utc::now(),
                        size: 0,
                    },
                )
            })
            .collect())
    }

    async fn get_schema(&self, id: &Id) -> Result<Option<SchemaEntry>> {
        let resp = self
            .client
            .post(format!("{}/resource/{}", self.base_url, id.schema_key()))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: GetResourceResponse = resp.json().await?;
        // Return the first schema dict iterated across location keys;
        // left implementation-defined, same as `get`.
        match body.locations.into_values().next() {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put_schema(&self, _id: &Id, _attr: &str, _descriptor: serde_json::Value) -> Result<()> {
        Err(immutable_store_error())
    }

    async fn del_schema(&self, _id: &Id, _attr: &str) -> Result<()> {
        Err(immutable_store_error())
    }

    async fn register_services(
        &self,
        location_key: &str,
        services: HashMap<Id, (ResourceMeta, Vec<u8>)>,
    ) -> Result<usize> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            location_key: &'a str,
            services: HashMap<String, (ResourceMeta, String)>,
        }
        let services = services
            .into_iter()
            .map(|(id, (meta, payload))| (id.to_string(), (meta, String::from_utf8_lossy(&payload).to_string())))
            .collect();
        let n: usize = self
            .client
            .post(format!("{}/register", self.base_url))
            .json(&Req {
                location_key,
                services,
            })
            .send()
            .await?
            .json()
            .await?;
        Ok(n)
    }

    fn layer_name(&self) -> Option<String> {
        Some(self.layer.clone())
    }

    fn is_read_only(&self) -> bool {
        true
    }
}
