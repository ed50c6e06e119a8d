use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Unified error type for folio operations
#[derive(Debug, Error)]
pub enum FolioError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // Snapshot errors
    #[error("Failed to decode snapshot: {0}")]
    SnapshotDecode(String),

    #[error("Failed to apply snapshot: {0}")]
    SnapshotApply(String),

    #[error("Invalid base64 snapshot: {0}")]
    Base64(#[from] base64::DecodeError),

    // Metadata errors
    #[error("Metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // Branch errors
    #[error("Branch '{0}' does not exist")]
    BranchNotFound(String),

    #[error("Branch '{0}' already exists")]
    BranchAlreadyExists(String),

    #[error("Cannot delete the '{0}' branch")]
    ProtectedBranch(String),

    #[error("Invalid branch name: '{0}'")]
    InvalidBranchName(String),

    #[error("Branch '{branch}' is held by {consumers} other consumer(s)")]
    BranchInUse { branch: String, consumers: usize },

    #[error("No recent snapshot at index {0}")]
    SnapshotNotFound(usize),

    // Replica registry errors
    #[error("No live replica for document '{document_id}' on branch '{branch}'")]
    ReplicaNotAcquired { document_id: String, branch: String },

    // Persistence errors
    #[error("Failed to persist '{document_id}': {message}")]
    Persist {
        document_id: String,
        message: String,
    },
}

/// Result type alias for folio operations
pub type Result<T> = std::result::Result<T, FolioError>;

/// A serializable representation of FolioError for IPC
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
    /// Associated branch name (if applicable)
    pub branch: Option<String>,
}

impl From<&FolioError> for SerializableError {
    fn from(err: &FolioError) -> Self {
        let kind = match err {
            FolioError::Io(_) => "Io",
            FolioError::FileRead { .. } => "FileRead",
            FolioError::FileWrite { .. } => "FileWrite",
            FolioError::SnapshotDecode(_) => "SnapshotDecode",
            FolioError::SnapshotApply(_) => "SnapshotApply",
            FolioError::Base64(_) => "Base64",
            FolioError::Json(_) => "Json",
            FolioError::ConfigParse(_) => "ConfigParse",
            FolioError::ConfigSerialize(_) => "ConfigSerialize",
            FolioError::BranchNotFound(_) => "BranchNotFound",
            FolioError::BranchAlreadyExists(_) => "BranchAlreadyExists",
            FolioError::ProtectedBranch(_) => "ProtectedBranch",
            FolioError::InvalidBranchName(_) => "InvalidBranchName",
            FolioError::BranchInUse { .. } => "BranchInUse",
            FolioError::SnapshotNotFound(_) => "SnapshotNotFound",
            FolioError::ReplicaNotAcquired { .. } => "ReplicaNotAcquired",
            FolioError::Persist { .. } => "Persist",
        }
        .to_string();

        let branch = match err {
            FolioError::BranchNotFound(name)
            | FolioError::BranchAlreadyExists(name)
            | FolioError::ProtectedBranch(name)
            | FolioError::InvalidBranchName(name) => Some(name.clone()),
            FolioError::ReplicaNotAcquired { branch, .. }
            | FolioError::BranchInUse { branch, .. } => Some(branch.clone()),
            _ => None,
        };

        Self {
            kind,
            message: err.to_string(),
            branch,
        }
    }
}

impl From<FolioError> for SerializableError {
    fn from(err: FolioError) -> Self {
        SerializableError::from(&err)
    }
}

impl FolioError {
    /// Convert to a serializable representation for IPC
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }

    /// Whether this error comes from a malformed or unappliable snapshot.
    ///
    /// The sync coordinator treats these as non-fatal: the replica keeps its
    /// prior state and the next change notification retries.
    pub fn is_snapshot_error(&self) -> bool {
        matches!(
            self,
            FolioError::SnapshotDecode(_) | FolioError::SnapshotApply(_) | FolioError::Base64(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializable_carries_branch() {
        let err = FolioError::ProtectedBranch("main".to_string());
        let ser = err.to_serializable();
        assert_eq!(ser.kind, "ProtectedBranch");
        assert_eq!(ser.branch.as_deref(), Some("main"));
        assert_eq!(ser.message, "Cannot delete the 'main' branch");
    }

    #[test]
    fn test_snapshot_errors_are_flagged() {
        assert!(FolioError::SnapshotDecode("bad".into()).is_snapshot_error());
        assert!(!FolioError::BranchNotFound("x".into()).is_snapshot_error());
    }
}
