//! Fixture loading for the in-memory document store.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokenforge_core::config::CacheDefaults;
use tokenforge_core::{ForgeError, MemoryBackend, Result};

/// On-disk fixture: `{ "collections": { name: { id: data } } }`.
#[derive(Debug, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub collections: HashMap<String, BTreeMap<String, Value>>,
}

impl Fixture {
    /// Parse and validate a fixture from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let fixture: Fixture = serde_json::from_str(text)?;
        fixture.validate()?;
        Ok(fixture)
    }

    /// Read a fixture file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ForgeError::io_with_path(e, path))?;
        Self::from_json(&text)
    }

    /// Collection names and ids become cache key segments, so neither may
    /// be empty or contain the key separator.
    fn validate(&self) -> Result<()> {
        for (collection, docs) in &self.collections {
            check_collection(collection)?;
            for id in docs.keys() {
                check_id(id)?;
            }
        }
        Ok(())
    }

    pub fn document_count(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    pub fn into_backend(self) -> MemoryBackend {
        MemoryBackend::from_collections(self.collections)
    }
}

/// Check a collection name used as a cache key segment.
pub fn check_collection(collection: &str) -> Result<()> {
    check_segment("collection", collection)
}

/// Check a document id. Ids shaped like query keys are rejected so a
/// document and a query never share a cache entry.
pub fn check_id(id: &str) -> Result<()> {
    check_segment("id", id)?;
    if id.starts_with(CacheDefaults::QUERY_KEY_MARKER) {
        return Err(ForgeError::Validation {
            field: "id".to_string(),
            message: format!(
                "{:?} must not start with {:?}",
                id,
                CacheDefaults::QUERY_KEY_MARKER
            ),
        });
    }
    Ok(())
}

fn check_segment(field: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('/') {
        return Err(ForgeError::Validation {
            field: field.to_string(),
            message: format!("{:?} must be non-empty and must not contain '/'", value),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokenforge_core::DocumentBackend;

    #[tokio::test]
    async fn test_load_fixture_file() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        write!(
            file,
            r#"{{ "collections": {{ "tokens": {{ "t1": {{ "symbol": "TFG" }} }} }} }}"#
        )
        .unwrap();

        let fixture = Fixture::load(file.path()).unwrap();
        assert_eq!(fixture.document_count(), 1);

        let backend = fixture.into_backend();
        let doc = backend.get_document("tokens", "t1").await.unwrap().unwrap();
        assert_eq!(doc.data["symbol"], "TFG");
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Fixture::load("/nonexistent/fixture.json").unwrap_err();
        assert!(matches!(err, ForgeError::Io { path: Some(_), .. }));
    }

    #[test]
    fn test_empty_fixture() {
        let fixture = Fixture::from_json("{}").unwrap();
        assert_eq!(fixture.document_count(), 0);
    }

    #[test]
    fn test_rejects_query_shaped_id() {
        let err = Fixture::from_json(r#"{ "collections": { "tokens": { "query:abc": {} } } }"#)
            .unwrap_err();
        assert!(matches!(err, ForgeError::Validation { ref field, .. } if field == "id"));
        assert!(check_id("t1").is_ok());
        assert!(check_id("").is_err());
    }

    #[test]
    fn test_rejects_separator_in_collection() {
        let err = Fixture::from_json(r#"{ "collections": { "a/b": {} } }"#).unwrap_err();
        assert!(matches!(err, ForgeError::Validation { ref field, .. } if field == "collection"));
    }
}
