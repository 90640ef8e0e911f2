//! Schema graph and relation descriptors: a directed graph over resource
//! IDs, persisted inside a Store's schema-entry mechanism, whose edges are
//! themselves schema entries keyed under `SCHEMA.<edgeID>` at the reserved
//! attribute `-schemaEdge`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::id::Id;
use crate::store::Store;

/// Reserved attribute name under which a compound relation's own descriptor
/// is stored, distinguishing a graph-structural entry from a client-visible
/// shadow attribute.
pub const SCHEMA_EDGE_ATTR: &str = "-schemaEdge";

/// Declarative relation kinds. Serialized with `targetID` spelled exactly as
/// the wire format requires, so a descriptor doubles as the JSON payload
/// `Store::put_schema` expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RelationDescriptor {
    Direct {
        #[serde(rename = "targetID")]
        target_id: Id,
    },
    Item {
        #[serde(rename = "targetID")]
        target_id: Id,
        #[serde(default = "default_true")]
        item_rule: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invert: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        get_edges: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map_attr: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_attr: Option<String>,
    },
    Inverse {
        #[serde(rename = "targetID")]
        target_id: Id,
    },
    OneToMany {
        source_db: Id,
        target_db: Id,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edge_db: Option<Id>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bind_attrs: Option<(String, String, String)>,
    },
    ManyToMany {
        source_db: Id,
        target_db: Id,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edge_db: Option<Id>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bind_attrs: Option<(String, String, String)>,
    },
}

fn default_true() -> bool {
    true
}

impl RelationDescriptor {
    /// The resource this descriptor ultimately points at, used as the
    /// schema graph edge's target node.
    fn target(&self) -> &Id {
        match self {
            RelationDescriptor::Direct { target_id } => target_id,
            RelationDescriptor::Item { target_id, .. } => target_id,
            RelationDescriptor::Inverse { target_id } => target_id,
            RelationDescriptor::OneToMany { target_db, .. } => target_db,
            RelationDescriptor::ManyToMany { target_db, .. } => target_db,
        }
    }

    fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Write `descriptor` into `store` as attribute `attr` of `source`, and
/// record the edge it represents in the schema graph. `edge_id` names the
/// descriptor for graph-edge purposes.
///
/// OneToMany/ManyToMany are compound: the rule itself has no `targetID` of
/// its own, so it is never written under `attr`/`source`. It lives only as
/// `edge_id`'s `-schemaEdge` entry, with `sourceDB`/`targetDB`/`edgeDB`
/// Direct sub-bindings recorded under `edge_id`, and (when `bindAttrs` is
/// given) three Item sub-bindings pointing back at `edge_id` from
/// `source_db`/`target_db`/`edge_db`.
pub async fn bind(
    store: &dyn Store,
    source: &Id,
    attr: &str,
    edge_id: &Id,
    descriptor: RelationDescriptor,
) -> Result<()> {
    match &descriptor {
        RelationDescriptor::Inverse { target_id } => {
            let target = target_id.clone();
            write_one(store, source, attr, edge_id, &descriptor).await?;
            let reverse = RelationDescriptor::Inverse {
                target_id: source.clone(),
            };
            write_one(store, &target, "inverseDB", edge_id, &reverse).await?;
        }
        RelationDescriptor::OneToMany {
            source_db,
            target_db,
            edge_db,
            bind_attrs,
        }
        | RelationDescriptor::ManyToMany {
            source_db,
            target_db,
            edge_db,
            bind_attrs,
        } => {
            // The compound rule is never stored under `attr` on `source` (it
            // carries no `targetID` of its own and would fail schema
            // validation); it lives only as the edge node's `-schemaEdge`
            // entry, with the schema graph edge drawn straight from
            // `source_db` to `target_db`.
            store.add_schema_edge(source_db, target_db, edge_id).await?;
            store
                .put_schema(edge_id, SCHEMA_EDGE_ATTR, descriptor.to_value()?)
                .await?;

            write_one(
                store,
                edge_id,
                "sourceDB",
                edge_id,
                &RelationDescriptor::Direct {
                    target_id: source_db.clone(),
                },
            )
            .await?;
            write_one(
                store,
                edge_id,
                "targetDB",
                edge_id,
                &RelationDescriptor::Direct {
                    target_id: target_db.clone(),
                },
            )
            .await?;
            if let Some(edge_db_id) = edge_db {
                write_one(
                    store,
                    edge_id,
                    "edgeDB",
                    edge_id,
                    &RelationDescriptor::Direct {
                        target_id: edge_db_id.clone(),
                    },
                )
                .await?;
            }

            if let Some((source_attr, target_attr, edge_attr)) = bind_attrs {
                write_one(
                    store,
                    source_db,
                    source_attr,
                    edge_id,
                    &RelationDescriptor::Item {
                        target_id: edge_id.clone(),
                        item_rule: true,
                        invert: None,
                        get_edges: None,
                        map_attr: None,
                        target_attr: None,
                    },
                )
                .await?;
                write_one(
                    store,
                    target_db,
                    target_attr,
                    edge_id,
                    &RelationDescriptor::Item {
                        target_id: edge_id.clone(),
                        item_rule: true,
                        invert: Some(true),
                        get_edges: None,
                        map_attr: None,
                        target_attr: None,
                    },
                )
                .await?;
                if let Some(edge_db_id) = edge_db {
                    write_one(
                        store,
                        edge_db_id,
                        edge_attr,
                        edge_id,
                        &RelationDescriptor::Item {
                            target_id: edge_id.clone(),
                            item_rule: true,
                            invert: None,
                            get_edges: Some(true),
                            map_attr: None,
                            target_attr: None,
                        },
                    )
                    .await?;
                }
            }
        }
        _ => write_one(store, source, attr, edge_id, &descriptor).await?,
    }
    Ok(())
}

async fn write_one(
    store: &dyn Store,
    source: &Id,
    attr: &str,
    edge_id: &Id,
    descriptor: &RelationDescriptor,
) -> Result<()> {
    store.put_schema(source, attr, descriptor.to_value()?).await?;
    store.add_schema_edge(source, descriptor.target(), edge_id).await?;
    Ok(())
}

/// Remove `id`'s node from the schema graph and every incident edge, asking
/// the owning descriptor to undo whatever attribute binding it installed.
/// Only the Inverse side of the reverse direction gets undone; see `undo`
/// below for why that's deliberate rather than an oversight.
pub async fn delete_node(store: &dyn Store, id: &Id) -> Result<()> {
    let incident = store.remove_schema_edges(id).await?;
    for (source, target, _edge_id) in incident {
        if let Some(entry) = store.get_schema(&source).await? {
            for (attr, raw) in entry {
                let Ok(descriptor) = serde_json::from_value::<RelationDescriptor>(raw) else {
                    continue;
                };
                if descriptor.target() == &target || descriptor.target() == id {
                    undo(store, &source, &attr, &descriptor).await?;
                }
            }
        }
    }
    Ok(())
}

/// Undo a single attribute binding as part of a node-removal cascade.
/// Inverse relations additionally clear the `inverseDB` attribute their
/// partner holds; other kinds only clear their own forward entry. A fuller
/// reverse-cascade for Direct/Item/OneToMany/ManyToMany bindings is left
/// undone deliberately (see `DESIGN.md`), not an oversight here.
async fn undo(store: &dyn Store, source: &Id, attr: &str, descriptor: &RelationDescriptor) -> Result<()> {
    store.del_schema(source, attr).await?;
    if let RelationDescriptor::Inverse { target_id } = descriptor {
        store.del_schema(target_id, "inverseDB").await.ok();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::LocalKvStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn direct_binding_round_trips_through_schema() {
        let dir = tempdir().unwrap();
        let store = LocalKvStore::open(dir.path(), "here").unwrap();
        let source = Id::new("T.one");
        let target = Id::new("T.two");
        bind(
            &store,
            &source,
            "partner",
            &Id::new("T.one.partner"),
            RelationDescriptor::Direct {
                target_id: target.clone(),
            },
        )
        .await
        .unwrap();

        let entry = store.get_schema(&source).await.unwrap().unwrap();
        let descriptor: RelationDescriptor =
            serde_json::from_value(entry.get("partner").unwrap().clone()).unwrap();
        assert_eq!(descriptor, RelationDescriptor::Direct { target_id: target });
    }

    #[tokio::test]
    async fn inverse_binding_is_symmetric() {
        let dir = tempdir().unwrap();
        let store = LocalKvStore::open(dir.path(), "here").unwrap();
        let a = Id::new("A");
        let b = Id::new("B");
        bind(
            &store,
            &a,
            "inverseDB",
            &Id::new("A.B.inverse"),
            RelationDescriptor::Inverse { target_id: b.clone() },
        )
        .await
        .unwrap();

        let a_entry = store.get_schema(&a).await.unwrap().unwrap();
        let b_entry = store.get_schema(&b).await.unwrap().unwrap();
        let a_side: RelationDescriptor =
            serde_json::from_value(a_entry.get("inverseDB").unwrap().clone()).unwrap();
        let b_side: RelationDescriptor =
            serde_json::from_value(b_entry.get("inverseDB").unwrap().clone()).unwrap();
        assert_eq!(a_side, RelationDescriptor::Inverse { target_id: b });
        assert_eq!(b_side, RelationDescriptor::Inverse { target_id: a });
    }

    #[tokio::test]
    async fn delete_node_cascades_inverse_partner() {
        let dir = tempdir().unwrap();
        let store = LocalKvStore::open(dir.path(), "here").unwrap();
        let a = Id::new("A");
        let b = Id::new("B");
        bind(
            &store,
            &a,
            "inverseDB",
            &Id::new("A.B.inverse"),
            RelationDescriptor::Inverse { target_id: b.clone() },
        )
        .await
        .unwrap();

        delete_node(&store, &a).await.unwrap();

        let b_entry = store.get_schema(&b).await.unwrap().unwrap();
        assert!(!b_entry.contains_key("inverseDB"));
    }

    #[tokio::test]
    async fn many_to_many_binding_never_writes_the_compound_rule_under_attr() {
        let dir = tempdir().unwrap();
        let store = LocalKvStore::open(dir.path(), "here").unwrap();
        let source = Id::new("Bio.seq");
        let source_db = Id::new("Bio.seq.db");
        let target_db = Id::new("Bio.annot.db");
        let edge_id = Id::new("Bio.seq.annot");

        bind(
            &store,
            &source,
            "annot",
            &edge_id,
            RelationDescriptor::ManyToMany {
                source_db: source_db.clone(),
                target_db: target_db.clone(),
                edge_db: None,
                bind_attrs: Some(("annot".to_string(), "seq".to_string(), "edges".to_string())),
            },
        )
        .await
        .unwrap();

        // The compound rule carries no targetID and must not land under the
        // caller's own attr: validate_schema_attr would reject it.
        if let Some(entry) = store.get_schema(&source).await.unwrap() {
            assert!(!entry.contains_key("annot"));
        }

        let edge_entry = store.get_schema(&edge_id).await.unwrap().unwrap();
        let edge_rule: RelationDescriptor =
            serde_json::from_value(edge_entry.get(SCHEMA_EDGE_ATTR).unwrap().clone()).unwrap();
        assert_eq!(
            edge_rule,
            RelationDescriptor::ManyToMany {
                source_db: source_db.clone(),
                target_db: target_db.clone(),
                edge_db: None,
                bind_attrs: Some(("annot".to_string(), "seq".to_string(), "edges".to_string())),
            }
        );

        let source_db_entry: RelationDescriptor =
            serde_json::from_value(edge_entry.get("sourceDB").unwrap().clone()).unwrap();
        assert_eq!(
            source_db_entry,
            RelationDescriptor::Direct {
                target_id: source_db.clone()
            }
        );

        let item_entry = store.get_schema(&source_db).await.unwrap().unwrap();
        let item_binding: RelationDescriptor =
            serde_json::from_value(item_entry.get("annot").unwrap().clone()).unwrap();
        assert_eq!(
            item_binding,
            RelationDescriptor::Item {
                target_id: edge_id.clone(),
                item_rule: true,
                invert: None,
                get_edges: None,
                map_attr: None,
                target_attr: None,
            }
        );
    }
}
