pub mod memory;
pub mod sqlite;

use crate::config::StoreConfig;
use crate::document::Document;
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Logical collection holding SIP call legs.
pub const SIP_CALL_INDEX: &str = "sip_call_index";
/// Logical collections holding periodic media reports.
pub const RTPR_RTP_INDEX: &str = "rtpr_rtp_index";
pub const RTPR_RTCP_INDEX: &str = "rtpr_rtcp_index";
/// Prefix of the collections holding attribute descriptors.
pub const ATTRIBUTES_PREFIX: &str = "attributes";

pub type DocumentStream = Pin<Box<dyn Stream<Item = Result<Document>> + Send>>;

/// Time partition hint, milliseconds since epoch, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        TimeRange { start, end }
    }

    pub fn all() -> Self {
        TimeRange {
            start: i64::MIN,
            end: i64::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    In,
}

/// Filter expression pushed down to the store. Built the same way
/// throughout the crate: start from `all()`/`any()` and `add` terms.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All(Vec<Filter>),
    Any(Vec<Filter>),
    Cmp {
        field: String,
        op: CompareOp,
        value: Value,
    },
}

impl Filter {
    pub fn all() -> Self {
        Filter::All(Vec::new())
    }

    pub fn any() -> Self {
        Filter::Any(Vec::new())
    }

    pub fn cmp(field: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Filter::Cmp {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn add(mut self, filter: Filter) -> Self {
        match &mut self {
            Filter::All(terms) | Filter::Any(terms) => {
                terms.push(filter);
                self
            }
            Filter::Cmp { .. } => Filter::All(vec![self, filter]),
        }
    }

    /// In-memory evaluation; mirrors the SQL compilation in the sqlite
    /// adapter. An empty conjunction matches everything, an empty
    /// disjunction matches nothing.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All(terms) => terms.iter().all(|t| t.matches(doc)),
            Filter::Any(terms) => terms.iter().any(|t| t.matches(doc)),
            Filter::Cmp { field, op, value } => {
                let actual = doc.get(field);
                match op {
                    CompareOp::Eq => actual.is_some_and(|a| values_equal(a, value)),
                    CompareOp::Ne => actual.is_some_and(|a| !values_equal(a, value)),
                    CompareOp::Gt => ordering(actual, value) == Some(std::cmp::Ordering::Greater),
                    CompareOp::Lt => ordering(actual, value) == Some(std::cmp::Ordering::Less),
                    CompareOp::Ge => matches!(
                        ordering(actual, value),
                        Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                    ),
                    CompareOp::Le => matches!(
                        ordering(actual, value),
                        Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                    ),
                    CompareOp::Contains => actual
                        .and_then(Value::as_str)
                        .zip(value.as_str())
                        .is_some_and(|(a, needle)| a.contains(needle)),
                    CompareOp::In => value.as_array().is_some_and(|candidates| {
                        actual.is_some_and(|a| candidates.iter().any(|c| values_equal(a, c)))
                    }),
                }
            }
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn ordering(actual: Option<&Value>, value: &Value) -> Option<std::cmp::Ordering> {
    let actual = actual?;
    if let (Some(l), Some(r)) = (actual.as_f64(), value.as_f64()) {
        l.partial_cmp(&r)
    } else if let (Some(l), Some(r)) = (actual.as_str(), value.as_str()) {
        Some(l.cmp(r))
    } else {
        None
    }
}

/// Abstract view of the document store. Implementations may shard a
/// logical collection across time-partitioned physical collections; `find`
/// concatenates the shards overlapping the range in ascending insertion
/// order per shard. Failures surface as a terminal `Err` on the stream.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn find(&self, collection: &str, range: TimeRange, filter: &Filter) -> DocumentStream;

    async fn list_collection_names(&self, prefix: &str) -> Result<Vec<String>>;

    async fn insert(&self, collection: &str, at_ms: i64, document: Document) -> Result<()>;
}

/// Create a store from configuration.
pub fn create_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match config {
        StoreConfig::Sqlite { root } => {
            Ok(Arc::new(SqliteStore::new(root)?) as Arc<dyn DocumentStore>)
        }
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new()) as Arc<dyn DocumentStore>),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_filter_comparisons() {
        let record = doc(json!({"mos": 3.5, "state": "answered", "jitter": 12}));

        let lt = Filter::cmp("mos", CompareOp::Lt, json!(4));
        assert!(lt.matches(&record));
        let gt = Filter::cmp("jitter", CompareOp::Gt, json!(20));
        assert!(!gt.matches(&record));

        let eq = Filter::cmp("state", CompareOp::Eq, json!("answered"));
        assert!(eq.matches(&record));
        let ne = Filter::cmp("state", CompareOp::Ne, json!("ringing"));
        assert!(ne.matches(&record));
    }

    #[test]
    fn test_filter_missing_field_never_matches() {
        let record = doc(json!({"state": "answered"}));
        assert!(!Filter::cmp("mos", CompareOp::Lt, json!(4)).matches(&record));
        assert!(!Filter::cmp("mos", CompareOp::Ne, json!(4)).matches(&record));
    }

    #[test]
    fn test_filter_contains_and_in() {
        let record = doc(json!({"caller": "alice@pbx.example.com", "call_id": "a1"}));
        assert!(Filter::cmp("caller", CompareOp::Contains, json!("pbx")).matches(&record));
        assert!(!Filter::cmp("caller", CompareOp::Contains, json!("bob")).matches(&record));
        assert!(Filter::cmp("call_id", CompareOp::In, json!(["a1", "b2"])).matches(&record));
        assert!(!Filter::cmp("call_id", CompareOp::In, json!([])).matches(&record));
    }

    #[test]
    fn test_filter_composition() {
        let record = doc(json!({"caller": "x", "callee": "y", "created_at": 1500}));
        let filter = Filter::all()
            .add(Filter::cmp("caller", CompareOp::Eq, json!("x")))
            .add(Filter::cmp("created_at", CompareOp::Ge, json!(1000)))
            .add(Filter::cmp("created_at", CompareOp::Le, json!(2000)));
        assert!(filter.matches(&record));

        let none = Filter::any();
        assert!(!none.matches(&record));
        let either = Filter::any()
            .add(Filter::cmp("caller", CompareOp::Eq, json!("z")))
            .add(Filter::cmp("callee", CompareOp::Eq, json!("y")));
        assert!(either.matches(&record));
    }
}
