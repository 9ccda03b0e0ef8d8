use crate::document::Document;
use crate::store::{DocumentStore, DocumentStream, Filter, TimeRange};
use crate::Result;
use async_trait::async_trait;
use futures::stream;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Embedded in-process store. Collections are plain vectors in insertion
/// order; filters are evaluated in Rust. Used by the test harness and as
/// the `type = "memory"` store configuration.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn find(&self, collection: &str, _range: TimeRange, filter: &Filter) -> DocumentStream {
        let matched: Vec<Result<Document>> = self
            .collections
            .read()
            .expect("memory store lock poisoned")
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| filter.matches(d))
                    .cloned()
                    .map(Ok)
                    .collect()
            })
            .unwrap_or_default();
        Box::pin(stream::iter(matched))
    }

    async fn list_collection_names(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .collections
            .read()
            .expect("memory store lock poisoned")
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn insert(&self, collection: &str, _at_ms: i64, document: Document) -> Result<()> {
        self.collections
            .write()
            .expect("memory store lock poisoned")
            .entry(collection.to_string())
            .or_default()
            .push(document);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CompareOp;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_find_preserves_insertion_order() {
        let store = MemoryStore::new();
        for (id, at) in [("b", 2000), ("a", 1000), ("c", 3000)] {
            store
                .insert(
                    "sip_call_index",
                    at,
                    Document::from_value(json!({"call_id": id, "created_at": at})).unwrap(),
                )
                .await
                .unwrap();
        }

        let docs: Vec<_> = store
            .find("sip_call_index", TimeRange::all(), &Filter::all())
            .collect()
            .await;
        let ids: Vec<_> = docs
            .into_iter()
            .map(|d| d.unwrap().get_str("call_id").unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_find_applies_filter() {
        let store = MemoryStore::new();
        store
            .insert(
                "sip_call_index",
                1000,
                Document::from_value(json!({"call_id": "a", "caller": "x"})).unwrap(),
            )
            .await
            .unwrap();
        store
            .insert(
                "sip_call_index",
                1000,
                Document::from_value(json!({"call_id": "b", "caller": "y"})).unwrap(),
            )
            .await
            .unwrap();

        let filter = Filter::all().add(Filter::cmp("caller", CompareOp::Eq, json!("y")));
        let docs: Vec<_> = store
            .find("sip_call_index", TimeRange::all(), &filter)
            .collect()
            .await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].as_ref().unwrap().get_str("call_id"), Some("b"));
    }

    #[tokio::test]
    async fn test_list_collection_names() {
        let store = MemoryStore::new();
        for name in ["attributes_sip", "attributes_rtp", "sip_call_index"] {
            store
                .insert(name, 0, Document::default())
                .await
                .unwrap();
        }
        let names = store.list_collection_names("attributes").await.unwrap();
        assert_eq!(names, vec!["attributes_rtp", "attributes_sip"]);
    }
}
