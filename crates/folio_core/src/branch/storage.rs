//! Storage abstraction for branch metadata.
//!
//! This module defines the [`MetadataStorage`] trait: the persistence
//! collaborator that holds each document's [`BranchesMetadata`] as JSON.
//! The value is opaque to storage; decoding (including the absent and
//! malformed cases) happens in [`BranchesMetadata::from_value`].
//!
//! [`BranchesMetadata`]: super::BranchesMetadata
//! [`BranchesMetadata::from_value`]: super::BranchesMetadata::from_value

use crate::error::FolioError;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, FolioError>;

/// Backend that persists per-document branch metadata.
pub trait MetadataStorage: Send + Sync {
    /// Load the stored metadata value for a document.
    ///
    /// Returns `None` if nothing has been stored yet.
    fn load_metadata(&self, document_id: &str) -> StorageResult<Option<serde_json::Value>>;

    /// Store the metadata value for a document, replacing any previous value.
    fn save_metadata(&self, document_id: &str, metadata: &serde_json::Value) -> StorageResult<()>;

    /// Remove a document's metadata. Removing an unknown document is not an error.
    fn delete_metadata(&self, document_id: &str) -> StorageResult<()>;

    /// List ids of all documents with stored metadata.
    fn list_documents(&self) -> StorageResult<Vec<String>>;
}
