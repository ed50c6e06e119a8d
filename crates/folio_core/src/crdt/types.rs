//! Core types shared by the replica registry and the sync coordinator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one live replica: a document on a particular branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaKey {
    /// Owning document id
    pub document_id: String,
    /// Branch name within the document
    pub branch: String,
}

impl ReplicaKey {
    /// Build a key for `document_id` on `branch`.
    pub fn new(document_id: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            branch: branch.into(),
        }
    }
}

impl fmt::Display for ReplicaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.document_id, self.branch)
    }
}

/// Origin of a change applied to a live replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOrigin {
    /// Edit made through the local editing surface
    Local,

    /// Snapshot received from persistence or another peer
    Remote,
}

impl fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOrigin::Local => write!(f, "local"),
            UpdateOrigin::Remote => write!(f, "remote"),
        }
    }
}

/// Debounce state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No pending export
    Idle,

    /// Local edits not yet exported. `timer_running` is false after a failed
    /// export: the key stays dirty until the next edit or flush retries.
    Dirty {
        /// Whether a debounce deadline is scheduled
        timer_running: bool,
    },
}

/// What happened when a remote snapshot was offered to a live replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Snapshot imported into the replica
    Applied,

    /// Snapshot equals the last one this replica exported; nothing to do
    Unchanged,

    /// Empty snapshot, or an import for this key is already in progress
    Skipped,

    /// Snapshot could not be decoded; the replica kept its prior state
    Rejected,
}
