//! JSON-file storage: one `<document_id>.json` per document in a directory.

use std::path::{Path, PathBuf};

use super::storage::{MetadataStorage, StorageResult};
use crate::error::FolioError;

const EXTENSION: &str = "json";

/// Stores each document's metadata as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    root: PathBuf,
}

impl JsonFileStorage {
    /// Use `root` as the storage directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| FolioError::FileWrite {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// The storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, document_id: &str) -> StorageResult<PathBuf> {
        let valid = !document_id.is_empty()
            && document_id != "."
            && document_id != ".."
            && !document_id.contains(['/', '\\']);
        if !valid {
            return Err(FolioError::Persist {
                document_id: document_id.to_string(),
                message: "document id is not a valid file name".to_string(),
            });
        }
        Ok(self.root.join(format!("{}.{}", document_id, EXTENSION)))
    }
}

impl MetadataStorage for JsonFileStorage {
    fn load_metadata(&self, document_id: &str) -> StorageResult<Option<serde_json::Value>> {
        let path = self.path_for(document_id)?;
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(FolioError::FileRead { path, source }),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save_metadata(&self, document_id: &str, metadata: &serde_json::Value) -> StorageResult<()> {
        let path = self.path_for(document_id)?;
        let contents = serde_json::to_string_pretty(metadata)?;
        std::fs::write(&path, contents).map_err(|source| FolioError::FileWrite { path, source })
    }

    fn delete_metadata(&self, document_id: &str) -> StorageResult<()> {
        let path = self.path_for(document_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(FolioError::FileWrite { path, source }),
        }
    }

    fn list_documents(&self) -> StorageResult<Vec<String>> {
        let entries = std::fs::read_dir(&self.root).map_err(|source| FolioError::FileRead {
            path: self.root.clone(),
            source,
        })?;

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path().join("meta")).unwrap();
        let value = json!({ "branches": {}, "activeBranch": "main" });

        storage.save_metadata("doc-1", &value).unwrap();

        assert!(dir.path().join("meta").join("doc-1.json").exists());
        assert_eq!(storage.load_metadata("doc-1").unwrap(), Some(value));
        assert_eq!(storage.list_documents().unwrap(), vec!["doc-1"]);
    }

    #[test]
    fn test_missing_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path()).unwrap();

        assert_eq!(storage.load_metadata("absent").unwrap(), None);
        storage.delete_metadata("absent").unwrap();

        storage.save_metadata("doc", &json!({})).unwrap();
        storage.delete_metadata("doc").unwrap();
        assert!(storage.list_documents().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path()).unwrap();

        for id in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                storage.save_metadata(id, &json!({})),
                Err(FolioError::Persist { .. })
            ));
        }
    }

    #[test]
    fn test_corrupt_file_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("doc.json"), "{ not json").unwrap();

        assert!(matches!(
            storage.load_metadata("doc"),
            Err(FolioError::Json(_))
        ));
    }
}
