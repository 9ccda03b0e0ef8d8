use crate::document::Document;
use crate::store::{DocumentStore, Filter, TimeRange, ATTRIBUTES_PREFIX};
use crate::Result;
use futures::StreamExt;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
}

/// Descriptor of a known, queryable attribute.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: AttributeKind,
    #[serde(default)]
    pub options: Option<Vec<String>>,
}

/// Known attribute names and their types, loaded from the
/// `attributes`-prefixed collections.
#[derive(Debug, Default)]
pub struct AttributeCatalog {
    attributes: HashMap<String, AttributeDescriptor>,
}

impl AttributeCatalog {
    pub fn empty() -> Self {
        AttributeCatalog::default()
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = AttributeDescriptor>) -> Self {
        AttributeCatalog {
            attributes: descriptors
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
        }
    }

    pub async fn load(store: &dyn DocumentStore) -> Result<Self> {
        let mut attributes = HashMap::new();
        for collection in store.list_collection_names(ATTRIBUTES_PREFIX).await? {
            let mut docs = store.find(&collection, TimeRange::all(), &Filter::all());
            while let Some(item) = docs.next().await {
                let doc: Document = item?;
                match serde_json::from_value::<AttributeDescriptor>(doc.into_value()) {
                    Ok(descriptor) => {
                        attributes.insert(descriptor.name.clone(), descriptor);
                    }
                    Err(err) => {
                        warn!(collection, "skipping undecodable attribute descriptor: {}", err);
                    }
                }
            }
        }
        Ok(AttributeCatalog { attributes })
    }

    pub fn lookup(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.get(name)
    }

    pub fn kind_of(&self, name: &str) -> AttributeKind {
        self.lookup(name).map(|d| d.kind).unwrap_or_default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

static CACHE: Lazy<RwLock<Option<Arc<AttributeCatalog>>>> = Lazy::new(|| RwLock::new(None));

/// Process-wide cached catalog, populated on first use and never
/// invalidated within a process lifetime; call [`refresh`] to repopulate.
pub async fn cached(store: &dyn DocumentStore) -> Result<Arc<AttributeCatalog>> {
    if let Some(catalog) = CACHE.read().expect("catalog cache poisoned").clone() {
        return Ok(catalog);
    }
    refresh(store).await
}

/// Reload the catalog from the store and replace the cached copy.
pub async fn refresh(store: &dyn DocumentStore) -> Result<Arc<AttributeCatalog>> {
    let catalog = Arc::new(AttributeCatalog::load(store).await?);
    *CACHE.write().expect("catalog cache poisoned") = Some(catalog.clone());
    Ok(catalog)
}
