//! Persistent-ID serialization: serialize an object graph such that
//! any node bearing a persistent ID is replaced in the byte stream by the
//! symbolic token `PYGR_ID:<id>`, except for the root, which is always
//! emitted in full. Serialization IS the act of assigning the root's ID.
//!
//! Every node owns its `persistent_id` slot directly, so there's no need for
//! a side table mapping object identity to an eventual ID: batch save
//! (`Resolver::put_all`) pre-assigns `persistent_id` on every member of the
//! batch before dumping any of them, so by the time `dump` runs, "does this
//! node have an ID" is just `node.persistent_id.is_some()`.

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::error::{RegistryError, Result};
use crate::id::Id;
use crate::resource::Resource;

pub const REF_PREFIX: &str = "PYGR_ID:";
const NODE_MARKER: &str = "$resource";

/// Serialize `root`. Embedded nodes (objects shaped like an embedded
/// `Resource`, see [`embed`]) that carry a persistent ID are replaced by a
/// `PYGR_ID:<id>` token; the root itself is always emitted in full.
pub fn dump(root: &Resource) -> Result<Vec<u8>> {
    let body = dump_value(&root.body, true);
    serde_json::to_vec(&body).map_err(RegistryError::from)
}

fn dump_value(value: &Value, is_root: bool) -> Value {
    match value {
        Value::Object(map) => match as_embedded_node(map) {
            Some((persistent_id, body)) => {
                if !is_root {
                    if let Some(id) = &persistent_id {
                        return Value::String(format!("{REF_PREFIX}{id}"));
                    }
                }
                embed_raw(persistent_id, dump_value(body, false))
            }
            None => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), dump_value(v, false)))
                    .collect(),
            ),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| dump_value(v, false)).collect()),
        other => other.clone(),
    }
}

/// Wrap a value as an embedded resource node, optionally carrying its own
/// persistent ID so repeated references to the same non-root node still
/// serialize identically (identity-preserving within one dump).
pub fn embed(persistent_id: Option<Id>, body: Value) -> Value {
    embed_raw(persistent_id.map(|id| id.to_string()), body)
}

fn embed_raw(persistent_id: Option<String>, body: Value) -> Value {
    let mut map = Map::new();
    map.insert(NODE_MARKER.to_string(), Value::Bool(true));
    map.insert(
        "persistent_id".to_string(),
        persistent_id.map_or(Value::Null, Value::String),
    );
    map.insert("body".to_string(), body);
    Value::Object(map)
}

fn as_embedded_node(map: &Map<String, Value>) -> Option<(Option<String>, &Value)> {
    if !matches!(map.get(NODE_MARKER), Some(Value::Bool(true))) {
        return None;
    }
    let body = map.get("body")?;
    let persistent_id = match map.get("persistent_id") {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    Some((persistent_id, body))
}

/// Callback the codec invokes when it encounters a `PYGR_ID:<id>` token
/// while loading. Implemented by the Resolver so recursive loads re-enter
/// resolution. `Send` is a supertrait so `&mut dyn ReferenceResolver` itself
/// is `Send`, which `load_value`'s boxed future needs to coerce to.
pub trait ReferenceResolver: Send {
    fn resolve<'a>(&'a mut self, id: &'a Id) -> BoxFuture<'a, Result<Resource>>;
}

/// Deserialize `bytes`, splicing in the result of `resolver.resolve(id)` for
/// every `PYGR_ID:<id>` token encountered. Unknown tokens and resolver
/// failures propagate as [`RegistryError::MissingDependency`] /
/// [`RegistryError::UnknownReference`].
pub async fn load(bytes: &[u8], resolver: &mut dyn ReferenceResolver) -> Result<Resource> {
    let value: Value = serde_json::from_slice(bytes)?;
    let body = load_value(value, resolver).await?;
    Ok(Resource::new(String::new(), body))
}

fn load_value<'a>(
    value: Value,
    resolver: &'a mut dyn ReferenceResolver,
) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        match value {
            Value::String(s) => {
                if let Some(id_str) = s.strip_prefix(REF_PREFIX) {
                    let id = Id::new(id_str);
                    let resolved = resolver
                        .resolve(&id)
                        .await
                        .map_err(|_| RegistryError::MissingDependency { id })?;
                    Ok(resolved.body)
                } else {
                    Ok(Value::String(s))
                }
            }
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, load_value(v, resolver).await?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(load_value(item, resolver).await?);
                }
                Ok(Value::Array(out))
            }
            other => Ok(other),
        }
    })
}
