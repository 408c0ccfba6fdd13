//! Deterministic cache keys.

use crate::config::CacheDefaults;
use crate::error::Result;
use crate::query::QueryConstraint;
use sha2::{Digest, Sha256};
use std::fmt;

/// Key identifying one cached document or query result.
///
/// Every key of a collection starts with `"{collection}/"`, which is what
/// collection-wide invalidation matches on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a single document: `"{collection}/{id}"`.
    pub fn document(collection: &str, id: &str) -> Self {
        Self(format!(
            "{}{}{}",
            collection,
            CacheDefaults::KEY_SEPARATOR,
            id
        ))
    }

    /// Key for a query: `"{collection}/query:{sha256 of the constraints}"`.
    ///
    /// Constraint order matters, since it changes the query.
    pub fn query(collection: &str, constraints: &[QueryConstraint]) -> Result<Self> {
        let serialized = serde_json::to_vec(constraints)?;
        let digest = hex::encode(Sha256::digest(&serialized));
        Ok(Self(format!(
            "{}{}{}{}",
            collection,
            CacheDefaults::KEY_SEPARATOR,
            CacheDefaults::QUERY_KEY_MARKER,
            digest
        )))
    }

    /// Prefix shared by every key of `collection`.
    pub fn collection_prefix(collection: &str) -> String {
        format!("{}{}", collection, CacheDefaults::KEY_SEPARATOR)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
