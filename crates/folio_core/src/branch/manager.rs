//! Branch operations for live documents.
//!
//! This module provides `BranchManager`, the consumer layer over the pure
//! store functions. It loads metadata from a [`MetadataStorage`], applies an
//! operation, persists the result, and keeps the live replicas held through
//! the [`SnapshotSyncCoordinator`] consistent with it.
//!
//! # Responsibilities
//!
//! - Open/close a document on its active branch
//! - Create, rename, delete, switch and merge branches
//! - Route debounced exports into branch metadata ([`MetadataSink`])
//! - Route remote snapshots into the live replica
//! - Diff a branch against the document being edited
//!
//! # Usage
//!
//! ```ignore
//! let manager = BranchManager::new(storage, registry, Arc::new(SystemClock), config);
//!
//! let replica = manager.open("doc-1")?;
//! let name = manager.create_branch("doc-1", "Try new intro", Some("main"))?;
//! let replica = manager.switch_branch("doc-1", &name)?;
//! let diff = manager.compare_with("doc-1", "main", &replica.doc().to_block_tree())?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::metadata::BranchesMetadata;
use super::naming::{generate_unique_branch_name, sanitize_branch_name};
use super::storage::MetadataStorage;
use super::store;
use crate::config::FolioConfig;
use crate::crdt::{
    ApplyOutcome, Clock, LiveReplica, ReplicaKey, ReplicaRegistry, SnapshotSink,
    SnapshotSyncCoordinator, decode_snapshot,
};
use crate::diff::{DiffResult, diff_documents};
use crate::document::Block;
use crate::error::{FolioError, Result};

/// Snapshot sink that writes exports into the owning document's metadata.
pub struct MetadataSink {
    storage: Arc<dyn MetadataStorage>,
    recent_limit: usize,
}

impl MetadataSink {
    /// Write exports into `storage`, keeping `recent_limit` audit entries.
    pub fn new(storage: Arc<dyn MetadataStorage>, recent_limit: usize) -> Self {
        Self {
            storage,
            recent_limit,
        }
    }
}

impl SnapshotSink for MetadataSink {
    fn persist_snapshot(&self, key: &ReplicaKey, snapshot: &[u8]) -> Result<()> {
        let stored = self.storage.load_metadata(&key.document_id)?;
        let metadata = BranchesMetadata::from_value(stored.as_ref());
        let updated = store::update_branch_snapshot(&metadata, &key.branch, snapshot);
        let updated = store::trim_recent_snapshots(&updated, self.recent_limit);
        self.storage
            .save_metadata(&key.document_id, &updated.to_value()?)
    }
}

/// Branch operations over stored metadata and live replicas.
pub struct BranchManager {
    storage: Arc<dyn MetadataStorage>,
    coordinator: Arc<SnapshotSyncCoordinator>,
    /// Document id -> branch this manager holds an acquisition for
    open: Mutex<HashMap<String, String>>,
}

impl BranchManager {
    /// Create a manager whose coordinator exports into `storage`.
    pub fn new(
        storage: Arc<dyn MetadataStorage>,
        registry: Arc<ReplicaRegistry>,
        clock: Arc<dyn Clock>,
        config: FolioConfig,
    ) -> Self {
        let sink = Arc::new(MetadataSink::new(
            Arc::clone(&storage),
            config.recent_snapshot_limit,
        ));
        let coordinator = Arc::new(SnapshotSyncCoordinator::from_config(
            &config, registry, clock, sink,
        ));
        Self::with_coordinator(storage, coordinator)
    }

    /// Create a manager around an existing coordinator.
    ///
    /// The coordinator's sink should write into the same `storage`.
    pub fn with_coordinator(
        storage: Arc<dyn MetadataStorage>,
        coordinator: Arc<SnapshotSyncCoordinator>,
    ) -> Self {
        Self {
            storage,
            coordinator,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// The sync coordinator (drive `run_due` from the host loop).
    pub fn coordinator(&self) -> &Arc<SnapshotSyncCoordinator> {
        &self.coordinator
    }

    // ==================== Metadata ====================

    /// Load a document's branch metadata (default if none is stored).
    pub fn metadata(&self, document_id: &str) -> Result<BranchesMetadata> {
        let stored = self.storage.load_metadata(document_id)?;
        Ok(BranchesMetadata::from_value(stored.as_ref()))
    }

    fn persist(&self, document_id: &str, metadata: &BranchesMetadata) -> Result<()> {
        self.storage.save_metadata(document_id, &metadata.to_value()?)
    }

    /// Branch names of a document, always including `"main"`.
    pub fn list_branches(&self, document_id: &str) -> Result<Vec<String>> {
        Ok(self.metadata(document_id)?.branch_names())
    }

    /// The document's active branch.
    pub fn active_branch(&self, document_id: &str) -> Result<String> {
        Ok(self.metadata(document_id)?.active_branch().to_string())
    }

    /// The branch this manager has open for `document_id`, if any.
    pub fn open_branch(&self, document_id: &str) -> Option<String> {
        self.open.lock().unwrap().get(document_id).cloned()
    }

    // ==================== Open / Close ====================

    /// Open the document on its active branch.
    ///
    /// Opening an already open document returns the live replica.
    pub fn open(&self, document_id: &str) -> Result<Arc<LiveReplica>> {
        if let Some(branch) = self.open_branch(document_id) {
            let key = ReplicaKey::new(document_id, branch);
            if let Some(replica) = self.coordinator.registry().get(&key) {
                return Ok(replica);
            }
        }

        let metadata = self.metadata(document_id)?;
        let branch = metadata.active_branch().to_string();
        self.acquire(document_id, &metadata, &branch)
    }

    /// Flush and release the document's live replica.
    pub fn close(&self, document_id: &str) -> Result<()> {
        let Some(branch) = self.open_branch(document_id) else {
            return Ok(());
        };
        let key = ReplicaKey::new(document_id, branch);

        self.coordinator.flush(&key)?;
        self.coordinator.release(&key);
        self.open.lock().unwrap().remove(document_id);

        log::debug!("[BranchManager] Closed {}", key);
        Ok(())
    }

    fn acquire(
        &self,
        document_id: &str,
        metadata: &BranchesMetadata,
        branch: &str,
    ) -> Result<Arc<LiveReplica>> {
        let seed = match metadata.snapshot_of(branch) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!(
                    "[BranchManager] Stored snapshot for {}@{} is unreadable: {}",
                    document_id,
                    branch,
                    e
                );
                None
            }
        };

        let key = ReplicaKey::new(document_id, branch);
        let replica = self.coordinator.acquire(&key, seed.as_deref())?;
        self.open
            .lock()
            .unwrap()
            .insert(document_id.to_string(), branch.to_string());

        log::debug!("[BranchManager] Opened {}", key);
        Ok(replica)
    }

    /// Export pending edits of `branch` if this manager has it open.
    fn flush_if_open(&self, document_id: &str, branch: &str) -> Result<()> {
        if self.open_branch(document_id).as_deref() == Some(branch) {
            self.coordinator
                .flush(&ReplicaKey::new(document_id, branch))?;
        }
        Ok(())
    }

    // ==================== Branch operations ====================

    /// Create a branch from `proposed`, made unique, copying `from`'s state.
    ///
    /// Returns the name actually used.
    pub fn create_branch(
        &self,
        document_id: &str,
        proposed: &str,
        from: Option<&str>,
    ) -> Result<String> {
        if let Some(from) = from {
            self.flush_if_open(document_id, from)?;
        }

        let metadata = self.metadata(document_id)?;
        if let Some(from) = from
            && !metadata.contains(from)
        {
            return Err(FolioError::BranchNotFound(from.to_string()));
        }

        let name = generate_unique_branch_name(&metadata, proposed);
        let updated = store::create_branch(&metadata, &name, from, None)?;
        self.persist(document_id, &updated)?;

        log::info!(
            "[BranchManager] Created branch '{}' for {} (from {:?})",
            name,
            document_id,
            from
        );
        Ok(name)
    }

    /// Rename a branch, moving its live replica along.
    ///
    /// `to` is sanitized like a proposed branch name; the name actually used
    /// is returned. Renaming onto an existing branch fails.
    pub fn rename_branch(&self, document_id: &str, from: &str, to: &str) -> Result<String> {
        let sanitized = sanitize_branch_name(to);
        if sanitized.is_empty() {
            return Err(FolioError::InvalidBranchName(to.to_string()));
        }
        let to = sanitized;
        self.flush_if_open(document_id, from)?;

        let metadata = self.metadata(document_id)?;
        let updated = store::rename_branch(&metadata, from, &to)?;
        if updated == metadata {
            return Ok(to);
        }
        self.persist(document_id, &updated)?;

        if self.open_branch(document_id).as_deref() == Some(from) {
            self.coordinator.rename(
                &ReplicaKey::new(document_id, from),
                &ReplicaKey::new(document_id, to.as_str()),
            )?;
            self.open
                .lock()
                .unwrap()
                .insert(document_id.to_string(), to.clone());
        }

        log::info!(
            "[BranchManager] Renamed branch '{}' to '{}' for {}",
            from,
            to,
            document_id
        );
        Ok(to)
    }

    /// Delete a branch. If it was open, the document reopens on the new active branch.
    ///
    /// Fails with `BranchInUse` while anyone besides this manager holds the
    /// branch's live replica.
    pub fn delete_branch(&self, document_id: &str, name: &str) -> Result<()> {
        let key = ReplicaKey::new(document_id, name);
        let is_open = self.open_branch(document_id).as_deref() == Some(name);
        let others = self
            .coordinator
            .registry()
            .ref_count(&key)
            .saturating_sub(usize::from(is_open));
        if others > 0 {
            return Err(FolioError::BranchInUse {
                branch: name.to_string(),
                consumers: others,
            });
        }

        let metadata = self.metadata(document_id)?;
        let updated = store::delete_branch(&metadata, name)?;
        self.persist(document_id, &updated)?;

        if is_open {
            // The branch is gone; its pending edits have nowhere to go.
            self.coordinator.evict(&key);
            self.open.lock().unwrap().remove(document_id);
            self.acquire(document_id, &updated, updated.active_branch())?;
        }

        log::info!("[BranchManager] Deleted branch '{}' for {}", name, document_id);
        Ok(())
    }

    /// Make `name` the active branch, moving the live replica to it.
    ///
    /// Pending edits on the outgoing branch are flushed first.
    pub fn switch_branch(&self, document_id: &str, name: &str) -> Result<Arc<LiveReplica>> {
        if !self.metadata(document_id)?.contains(name) {
            return Err(FolioError::BranchNotFound(name.to_string()));
        }

        let outgoing = self.open_branch(document_id);
        if let Some(outgoing) = &outgoing {
            self.coordinator
                .flush(&ReplicaKey::new(document_id, outgoing.as_str()))?;
        }

        // Reload: the flush may have written the outgoing snapshot.
        let metadata = self.metadata(document_id)?;
        let updated = store::set_active_branch(&metadata, name)?;
        self.persist(document_id, &updated)?;

        if let Some(outgoing) = outgoing {
            if outgoing == name {
                return self.open(document_id);
            }
            self.coordinator
                .release(&ReplicaKey::new(document_id, outgoing.as_str()));
            self.open.lock().unwrap().remove(document_id);
        }

        log::info!(
            "[BranchManager] Switched {} to branch '{}'",
            document_id,
            name
        );
        self.acquire(document_id, &updated, name)
    }

    /// Merge `source` into `target`.
    ///
    /// The merged state is stored in `target`; if `target` is open its live
    /// replica imports it.
    pub fn merge_branch(&self, document_id: &str, source: &str, target: &str) -> Result<()> {
        self.flush_if_open(document_id, source)?;
        self.flush_if_open(document_id, target)?;

        let metadata = self.metadata(document_id)?;
        let updated = store::merge_branches(&metadata, source, target)?;
        self.persist(document_id, &updated)?;

        if self.open_branch(document_id).as_deref() == Some(target) {
            let merged = updated.snapshot_of(target)?;
            self.coordinator
                .apply_remote(&ReplicaKey::new(document_id, target), Some(&merged))?;
        }

        log::info!(
            "[BranchManager] Merged branch '{}' into '{}' for {}",
            source,
            target,
            document_id
        );
        Ok(())
    }

    /// Restore the recent-snapshot entry at `index` as its branch's state.
    ///
    /// If that branch has a live replica, its content is rewritten in place
    /// for every holder; unexported edits on it are discarded.
    pub fn restore_snapshot(&self, document_id: &str, index: usize) -> Result<()> {
        let metadata = self.metadata(document_id)?;
        let updated = store::restore_recent_snapshot(&metadata, index)?;
        self.persist(document_id, &updated)?;

        let Some(branch) = metadata.recent_snapshots.get(index).map(|r| r.branch.clone()) else {
            return Ok(());
        };
        let key = ReplicaKey::new(document_id, branch.as_str());
        if self.coordinator.registry().is_live(&key) {
            let restored = updated.snapshot_of(&branch)?;
            self.coordinator.reset(&key, &restored)?;
        }

        log::info!(
            "[BranchManager] Restored snapshot {} of branch '{}' for {}",
            index,
            branch,
            document_id
        );
        Ok(())
    }

    // ==================== Sync ====================

    /// Offer a snapshot from persistence/sync to the open document.
    ///
    /// Undecodable snapshots are logged and reported as `Rejected`; the live
    /// replica keeps its state. Closed documents skip the snapshot.
    pub fn handle_remote_snapshot(
        &self,
        document_id: &str,
        snapshot: Option<&[u8]>,
    ) -> Result<ApplyOutcome> {
        let Some(branch) = self.open_branch(document_id) else {
            return Ok(ApplyOutcome::Skipped);
        };
        let key = ReplicaKey::new(document_id, branch);

        match self.coordinator.apply_remote(&key, snapshot) {
            Err(e) if e.is_snapshot_error() => {
                log::warn!(
                    "[BranchManager] Ignoring remote snapshot for {}: {}",
                    key,
                    e
                );
                Ok(ApplyOutcome::Rejected)
            }
            other => other,
        }
    }

    // ==================== Compare ====================

    /// Content of `branch`: the live replica if open, else its stored snapshot.
    pub fn branch_tree(&self, document_id: &str, branch: &str) -> Result<Block> {
        let metadata = self.metadata(document_id)?;
        if !metadata.contains(branch) {
            return Err(FolioError::BranchNotFound(branch.to_string()));
        }

        if let Some(replica) = self
            .coordinator
            .registry()
            .get(&ReplicaKey::new(document_id, branch))
        {
            return Ok(replica.doc().to_block_tree());
        }
        decode_snapshot(&metadata.snapshot_of(branch)?)
    }

    /// Diff `branch` (left) against `current` (right).
    pub fn compare_with(
        &self,
        document_id: &str,
        branch: &str,
        current: &Block,
    ) -> Result<DiffResult> {
        let left = self.branch_tree(document_id, branch)?;
        Ok(diff_documents(&left, current))
    }

    /// Diff two branches of the same document.
    pub fn compare_branches(&self, document_id: &str, left: &str, right: &str) -> Result<DiffResult> {
        let left = self.branch_tree(document_id, left)?;
        let right = self.branch_tree(document_id, right)?;
        Ok(diff_documents(&left, &right))
    }

    // ==================== Teardown ====================

    /// Flush every pending export and drop all live replicas.
    ///
    /// Returns the number of snapshots exported.
    pub fn shutdown(&self) -> usize {
        let exported = self.coordinator.flush_all();
        let held: Vec<(String, String)> = self.open.lock().unwrap().drain().collect();
        for (document_id, branch) in held {
            self.coordinator
                .release(&ReplicaKey::new(document_id, branch));
        }
        self.coordinator.clear();

        log::info!("[BranchManager] Shut down ({} exported)", exported);
        exported
    }
}

impl std::fmt::Debug for BranchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchManager")
            .field("coordinator", &self.coordinator)
            .field("open", &*self.open.lock().unwrap())
            .finish_non_exhaustive()
    }
}
