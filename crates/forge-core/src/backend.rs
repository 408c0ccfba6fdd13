//! Remote document store interface.

use crate::document::{CachedValue, Document};
use crate::error::Result;
use crate::query::QueryConstraint;
use crate::subscription::{SubscriptionHandle, SubscriptionSink};
use async_trait::async_trait;

/// What a realtime listener watches.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionTarget {
    /// A single document; pushes `CachedValue::Document`.
    Document { collection: String, id: String },
    /// A query; pushes `CachedValue::Documents`.
    Query {
        collection: String,
        constraints: Vec<QueryConstraint>,
    },
}

impl SubscriptionTarget {
    pub fn collection(&self) -> &str {
        match self {
            SubscriptionTarget::Document { collection, .. }
            | SubscriptionTarget::Query { collection, .. } => collection,
        }
    }

    /// Whether a write to `collection/id` changes what this target watches.
    pub fn is_affected_by(&self, collection: &str, id: &str) -> bool {
        match self {
            SubscriptionTarget::Document {
                collection: watched,
                id: watched_id,
            } => watched == collection && watched_id == id,
            SubscriptionTarget::Query {
                collection: watched,
                ..
            } => watched == collection,
        }
    }
}

/// Remote document store the cache fronts.
///
/// Errors are passed to callers unchanged once retries are exhausted.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Read one document. `Ok(None)` if it does not exist.
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Run a query over a collection.
    async fn execute_query(
        &self,
        collection: &str,
        constraints: &[QueryConstraint],
    ) -> Result<Vec<Document>>;

    /// Attach a push listener for `target`.
    ///
    /// An error returned here is a setup failure. Failures after setup go
    /// through [`SubscriptionSink::report_error`].
    fn subscribe(
        &self,
        target: SubscriptionTarget,
        sink: SubscriptionSink<CachedValue>,
    ) -> Result<SubscriptionHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_target_only_affected_by_its_document() {
        let target = SubscriptionTarget::Document {
            collection: "tokens".into(),
            id: "t1".into(),
        };
        assert!(target.is_affected_by("tokens", "t1"));
        assert!(!target.is_affected_by("tokens", "t2"));
        assert!(!target.is_affected_by("users", "t1"));
    }

    #[test]
    fn test_query_target_affected_by_any_document_of_collection() {
        let target = SubscriptionTarget::Query {
            collection: "tokens".into(),
            constraints: Vec::new(),
        };
        assert!(target.is_affected_by("tokens", "anything"));
        assert!(!target.is_affected_by("users", "t1"));
    }
}
