//! Persisted branch metadata for one document.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::Result;

/// Name of the branch every document implicitly has.
pub const DEFAULT_BRANCH: &str = "main";

/// One branch: its current snapshot and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct BranchData {
    /// Base64-encoded snapshot bytes (empty string = no state)
    pub snapshot: String,
    /// Creation time, milliseconds since the Unix epoch
    pub created_at: i64,
    /// Last snapshot update, milliseconds since the Unix epoch
    pub updated_at: i64,
}

impl BranchData {
    /// A new branch holding `snapshot`, stamped with the current time.
    pub fn new(snapshot: &[u8]) -> Self {
        let now = now_millis();
        Self {
            snapshot: encode_snapshot(snapshot),
            created_at: now,
            updated_at: now,
        }
    }

    /// Decoded snapshot bytes.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        decode_snapshot_string(&self.snapshot)
    }
}

/// An entry of the recent-snapshot audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SnapshotRecord {
    /// Branch the snapshot was saved to
    pub branch: String,
    /// Base64-encoded snapshot bytes
    pub snapshot: String,
    /// Save time, milliseconds since the Unix epoch
    pub saved_at: i64,
}

/// All branches of a document plus the active-branch pointer.
///
/// `"main"` always exists conceptually: an empty `branches` map means the
/// document has only the implied main branch with no stored state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct BranchesMetadata {
    /// Branch name -> branch data
    #[serde(default)]
    pub branches: BTreeMap<String, BranchData>,

    /// Active branch, `None` meaning `"main"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub active_branch: Option<String>,

    /// Recently saved snapshots, oldest first
    #[serde(default)]
    pub recent_snapshots: Vec<SnapshotRecord>,
}

/// Stored metadata as read from persistence.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredMetadata {
    /// Nothing stored yet
    Absent,
    /// Stored value that does not have the metadata shape
    Malformed(String),
    /// Well-formed metadata
    Present(BranchesMetadata),
}

impl StoredMetadata {
    /// Classify a stored JSON value.
    pub fn decode(value: Option<&serde_json::Value>) -> Self {
        match value {
            None | Some(serde_json::Value::Null) => StoredMetadata::Absent,
            Some(value) => match BranchesMetadata::deserialize(value) {
                Ok(metadata) => StoredMetadata::Present(metadata),
                Err(e) => StoredMetadata::Malformed(e.to_string()),
            },
        }
    }

    /// The metadata, with absent and malformed values becoming the default.
    pub fn into_metadata(self) -> BranchesMetadata {
        match self {
            StoredMetadata::Present(metadata) => metadata,
            StoredMetadata::Absent => BranchesMetadata::default(),
            StoredMetadata::Malformed(reason) => {
                log::warn!("Ignoring malformed branch metadata: {}", reason);
                BranchesMetadata::default()
            }
        }
    }
}

impl BranchesMetadata {
    /// Decode stored metadata; absent or malformed input yields the default.
    pub fn from_value(value: Option<&serde_json::Value>) -> Self {
        StoredMetadata::decode(value).into_metadata()
    }

    /// Encode as a JSON value for persistence.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// The active branch name.
    pub fn active_branch(&self) -> &str {
        self.active_branch.as_deref().unwrap_or(DEFAULT_BRANCH)
    }

    /// Whether `name` is a branch, counting the implied main branch.
    pub fn contains(&self, name: &str) -> bool {
        name == DEFAULT_BRANCH || self.branches.contains_key(name)
    }

    /// Branch names in order, always including `"main"`.
    pub fn branch_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.branches.keys().cloned().collect();
        if !self.branches.contains_key(DEFAULT_BRANCH) {
            names.insert(0, DEFAULT_BRANCH.to_string());
        }
        names
    }

    /// Decoded snapshot of `name`; empty if the branch has no stored state.
    pub fn snapshot_of(&self, name: &str) -> Result<Vec<u8>> {
        match self.branches.get(name) {
            Some(data) => data.snapshot_bytes(),
            None => Ok(Vec::new()),
        }
    }
}

/// Encode snapshot bytes for storage.
pub fn encode_snapshot(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a stored snapshot string.
pub fn decode_snapshot_string(encoded: &str) -> Result<Vec<u8>> {
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    Ok(BASE64.decode(encoded)?)
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
