//! Registry of live replicas, one per (document, branch).
//!
//! This module provides `ReplicaRegistry`, which owns every live
//! [`BlockDoc`] of an editing session. Entries are reference counted:
//! concurrent consumers of the same branch share one replica, and the replica
//! is dropped when the last consumer releases it.
//!
//! The registry is an explicit object owned by the session, not a global.
//! Call [`ReplicaRegistry::clear`] on session teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::block_doc::BlockDoc;
use super::types::{ReplicaKey, UpdateOrigin};
use crate::error::{FolioError, Result};

/// A live, shared replica and its sync bookkeeping.
pub struct LiveReplica {
    key: RwLock<ReplicaKey>,
    doc: BlockDoc,
    /// Last snapshot exported from (or imported into) this replica
    last_saved_snapshot: RwLock<Option<Vec<u8>>>,
    /// Set while a remote snapshot is being imported
    applying_remote: Arc<AtomicBool>,
    subscription: Mutex<Option<yrs::Subscription>>,
}

impl LiveReplica {
    fn new(key: ReplicaKey, doc: BlockDoc, last_saved_snapshot: Option<Vec<u8>>) -> Self {
        Self {
            key: RwLock::new(key),
            doc,
            last_saved_snapshot: RwLock::new(last_saved_snapshot),
            applying_remote: Arc::new(AtomicBool::new(false)),
            subscription: Mutex::new(None),
        }
    }

    /// The key this replica is registered under.
    pub fn key(&self) -> ReplicaKey {
        self.key.read().unwrap().clone()
    }

    /// The replicated document.
    pub fn doc(&self) -> &BlockDoc {
        &self.doc
    }

    /// Last snapshot exported from or imported into this replica.
    pub fn last_saved_snapshot(&self) -> Option<Vec<u8>> {
        self.last_saved_snapshot.read().unwrap().clone()
    }

    /// Record the snapshot most recently exchanged with persistence.
    pub fn set_last_saved_snapshot(&self, snapshot: Vec<u8>) {
        *self.last_saved_snapshot.write().unwrap() = Some(snapshot);
    }

    /// Whether a remote import is in progress.
    pub fn is_applying_remote(&self) -> bool {
        self.applying_remote.load(Ordering::SeqCst)
    }

    /// Enter the remote-apply section.
    ///
    /// Returns `None` if an import is already running for this replica. The
    /// flag is cleared when the guard drops.
    pub fn begin_remote_apply(&self) -> Option<RemoteApplyGuard> {
        self.applying_remote
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RemoteApplyGuard {
                flag: Arc::clone(&self.applying_remote),
            })
    }

    pub(crate) fn applying_remote_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.applying_remote)
    }

    pub(crate) fn set_subscription(&self, subscription: yrs::Subscription) {
        *self.subscription.lock().unwrap() = Some(subscription);
    }

    pub(crate) fn has_subscription(&self) -> bool {
        self.subscription.lock().unwrap().is_some()
    }

    fn set_key(&self, key: ReplicaKey) {
        *self.key.write().unwrap() = key;
    }
}

impl std::fmt::Debug for LiveReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveReplica")
            .field("key", &self.key())
            .field("doc", &self.doc)
            .field("applying_remote", &self.is_applying_remote())
            .finish_non_exhaustive()
    }
}

/// Clears the remote-apply flag on drop.
#[derive(Debug)]
pub struct RemoteApplyGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RemoteApplyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

struct RegistryEntry {
    replica: Arc<LiveReplica>,
    ref_count: usize,
}

/// Reference-counted registry of live replicas.
///
/// # Example
///
/// ```ignore
/// use folio_core::crdt::{ReplicaKey, ReplicaRegistry};
///
/// let registry = ReplicaRegistry::new();
/// let key = ReplicaKey::new("doc-1", "main");
///
/// let a = registry.acquire(&key, None);
/// let b = registry.acquire(&key, None); // same replica
/// registry.release(&key);
/// registry.release(&key); // dropped here
/// ```
#[derive(Default)]
pub struct ReplicaRegistry {
    entries: RwLock<HashMap<ReplicaKey, RegistryEntry>>,
}

impl ReplicaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the replica for `key`, creating it on first use.
    ///
    /// A new replica is seeded from `seed`; a seed that fails to decode is
    /// logged and the replica starts empty. An existing replica ignores `seed`.
    pub fn acquire(&self, key: &ReplicaKey, seed: Option<&[u8]>) -> Arc<LiveReplica> {
        let mut entries = self.entries.write().unwrap();

        if let Some(entry) = entries.get_mut(key) {
            entry.ref_count += 1;
            log::debug!(
                "ReplicaRegistry: acquired {} (ref_count={})",
                key,
                entry.ref_count
            );
            return Arc::clone(&entry.replica);
        }

        let doc = BlockDoc::new();
        let mut last_saved = None;
        if let Some(seed) = seed.filter(|s| !s.is_empty()) {
            match doc.import(seed, UpdateOrigin::Remote) {
                Ok(()) => last_saved = Some(seed.to_vec()),
                Err(e) => log::warn!("ReplicaRegistry: failed to seed {}: {}", key, e),
            }
        }

        let replica = Arc::new(LiveReplica::new(key.clone(), doc, last_saved));
        entries.insert(
            key.clone(),
            RegistryEntry {
                replica: Arc::clone(&replica),
                ref_count: 1,
            },
        );
        log::debug!("ReplicaRegistry: created {}", key);
        replica
    }

    /// Release one acquisition of `key`.
    ///
    /// Returns `true` if this was the last reference and the replica was
    /// dropped. Releasing an unknown key is a no-op.
    pub fn release(&self, key: &ReplicaKey) -> bool {
        let mut entries = self.entries.write().unwrap();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };

        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count == 0 {
            entries.remove(key);
            log::debug!("ReplicaRegistry: destroyed {}", key);
            return true;
        }
        false
    }

    /// Get the live replica for `key` without changing its ref count.
    pub fn get(&self, key: &ReplicaKey) -> Option<Arc<LiveReplica>> {
        let entries = self.entries.read().unwrap();
        entries.get(key).map(|entry| Arc::clone(&entry.replica))
    }

    /// Current ref count of `key` (0 if not live).
    pub fn ref_count(&self, key: &ReplicaKey) -> usize {
        let entries = self.entries.read().unwrap();
        entries.get(key).map_or(0, |entry| entry.ref_count)
    }

    /// Whether `key` has a live replica.
    pub fn is_live(&self, key: &ReplicaKey) -> bool {
        let entries = self.entries.read().unwrap();
        entries.contains_key(key)
    }

    /// All live keys.
    pub fn live_keys(&self) -> Vec<ReplicaKey> {
        let entries = self.entries.read().unwrap();
        entries.keys().cloned().collect()
    }

    /// Number of live replicas.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap();
        entries.len()
    }

    /// Whether no replica is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move a live replica to a new key, keeping its ref count.
    ///
    /// Used when a branch is renamed. No-op if `old` is not live.
    pub fn rename(&self, old: &ReplicaKey, new: &ReplicaKey) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(new) {
            return Err(FolioError::BranchAlreadyExists(new.branch.clone()));
        }
        if let Some(entry) = entries.remove(old) {
            entry.replica.set_key(new.clone());
            entries.insert(new.clone(), entry);
            log::debug!("ReplicaRegistry: renamed {} -> {}", old, new);
        }
        Ok(())
    }

    /// Drop the replica for `key` regardless of its ref count.
    pub fn remove(&self, key: &ReplicaKey) -> Option<Arc<LiveReplica>> {
        let mut entries = self.entries.write().unwrap();
        entries.remove(key).map(|entry| entry.replica)
    }

    /// Drop every live replica (session teardown).
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap();
        entries.clear();
    }
}

impl std::fmt::Debug for ReplicaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap();
        f.debug_struct("ReplicaRegistry")
            .field("live", &entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
