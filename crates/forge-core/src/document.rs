//! Document snapshots and the payloads the cache stores.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document read from the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id within its collection.
    pub id: String,
    /// Document fields.
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Look up a field by dotted path (`"metadata.symbol"`).
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.data, |value, segment| value.get(segment))
    }
}

/// What a cache entry holds: one document lookup or a query result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum CachedValue {
    /// Result of a document read; `None` when the document does not exist.
    Document(Option<Document>),
    /// Ordered result of a query.
    Documents(Vec<Document>),
}

impl CachedValue {
    /// Payload of a document read, if this value is one.
    pub fn into_document(self) -> Option<Option<Document>> {
        match self {
            CachedValue::Document(doc) => Some(doc),
            CachedValue::Documents(_) => None,
        }
    }

    /// Payload of a query read, if this value is one.
    pub fn into_documents(self) -> Option<Vec<Document>> {
        match self {
            CachedValue::Documents(docs) => Some(docs),
            CachedValue::Document(_) => None,
        }
    }
}
