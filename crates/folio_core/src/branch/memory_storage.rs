//! In-memory storage implementation for testing.
//!
//! This provides a simple in-memory implementation of [`MetadataStorage`]
//! for use in unit tests and development.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::storage::{MetadataStorage, StorageResult};

/// In-memory metadata storage for testing.
///
/// Thread-safe via `RwLock`, but data is lost when dropped. Clones share
/// the same underlying map.
#[derive(Debug, Default, Clone)]
pub struct MemoryMetadataStorage {
    /// Document id -> stored metadata value
    documents: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl MemoryMetadataStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStorage for MemoryMetadataStorage {
    fn load_metadata(&self, document_id: &str) -> StorageResult<Option<serde_json::Value>> {
        let documents = self.documents.read().unwrap();
        Ok(documents.get(document_id).cloned())
    }

    fn save_metadata(&self, document_id: &str, metadata: &serde_json::Value) -> StorageResult<()> {
        let mut documents = self.documents.write().unwrap();
        documents.insert(document_id.to_string(), metadata.clone());
        Ok(())
    }

    fn delete_metadata(&self, document_id: &str) -> StorageResult<()> {
        let mut documents = self.documents.write().unwrap();
        documents.remove(document_id);
        Ok(())
    }

    fn list_documents(&self) -> StorageResult<Vec<String>> {
        let documents = self.documents.read().unwrap();
        let mut ids: Vec<String> = documents.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_and_load() {
        let storage = MemoryMetadataStorage::new();
        let value = json!({ "activeBranch": "main" });

        storage.save_metadata("doc-1", &value).unwrap();
        assert_eq!(storage.load_metadata("doc-1").unwrap(), Some(value));
    }

    #[test]
    fn test_load_missing() {
        let storage = MemoryMetadataStorage::new();
        assert_eq!(storage.load_metadata("nope").unwrap(), None);
    }

    #[test]
    fn test_delete_and_list() {
        let storage = MemoryMetadataStorage::new();
        storage.save_metadata("b", &json!({})).unwrap();
        storage.save_metadata("a", &json!({})).unwrap();

        assert_eq!(storage.list_documents().unwrap(), vec!["a", "b"]);

        storage.delete_metadata("a").unwrap();
        storage.delete_metadata("missing").unwrap();
        assert_eq!(storage.list_documents().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_clones_share_state() {
        let storage = MemoryMetadataStorage::new();
        let other = storage.clone();
        storage.save_metadata("doc", &json!({})).unwrap();

        assert!(other.load_metadata("doc").unwrap().is_some());
    }
}
