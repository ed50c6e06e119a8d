//! Debounced snapshot sync between live replicas and persistence.
//!
//! This module provides `SnapshotSyncCoordinator`, which sits between the
//! [`ReplicaRegistry`] and whatever stores snapshots (a [`SnapshotSink`]).
//!
//! # Responsibilities
//!
//! - Local edits mark a key dirty and (re)start its debounce deadline
//! - Due keys are exported once per quiet period (`run_due`)
//! - Pending exports are forced out on branch switch or teardown (`flush`)
//! - Remote snapshots are imported without echoing back as local edits
//!
//! The coordinator owns no timer. Hosts with an event loop call
//! [`SnapshotSyncCoordinator::next_deadline`] and
//! [`SnapshotSyncCoordinator::run_due`] themselves; native hosts can use
//! `spawn_debounce_driver` behind the `native-sync` feature.
//!
//! # Usage
//!
//! ```ignore
//! let coordinator = SnapshotSyncCoordinator::new(registry, clock, debounce, sink);
//!
//! let replica = coordinator.acquire(&key, stored_snapshot.as_deref())?;
//! replica.doc().replace_blocks(&edited);   // key is now dirty
//!
//! coordinator.run_due();                    // exports once the debounce elapses
//! coordinator.flush(&key)?;                 // or right away
//! ```

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::block_doc::decode_snapshot;
use super::clock::Clock;
use super::registry::{LiveReplica, ReplicaRegistry};
use super::types::{ApplyOutcome, ReplicaKey, SyncState, UpdateOrigin};
use crate::config::FolioConfig;
use crate::error::{FolioError, Result};

/// Destination for exported snapshots.
pub trait SnapshotSink: Send + Sync {
    /// Persist `snapshot` as the current state of `key`.
    fn persist_snapshot(&self, key: &ReplicaKey, snapshot: &[u8]) -> Result<()>;
}

impl<F> SnapshotSink for F
where
    F: Fn(&ReplicaKey, &[u8]) -> Result<()> + Send + Sync,
{
    fn persist_snapshot(&self, key: &ReplicaKey, snapshot: &[u8]) -> Result<()> {
        self(key, snapshot)
    }
}

/// Dirty keys mapped to their debounce deadline (`None` = no timer running).
type PendingMap = HashMap<ReplicaKey, Option<Instant>>;

/// Debounced export / guarded import for live replicas.
pub struct SnapshotSyncCoordinator {
    registry: Arc<ReplicaRegistry>,
    clock: Arc<dyn Clock>,
    debounce: Duration,
    sink: Arc<dyn SnapshotSink>,
    pending: Arc<Mutex<PendingMap>>,
    #[cfg(feature = "native-sync")]
    wake: Arc<tokio::sync::Notify>,
}

impl SnapshotSyncCoordinator {
    /// Create a coordinator over `registry`.
    pub fn new(
        registry: Arc<ReplicaRegistry>,
        clock: Arc<dyn Clock>,
        debounce: Duration,
        sink: Arc<dyn SnapshotSink>,
    ) -> Self {
        Self {
            registry,
            clock,
            debounce,
            sink,
            pending: Arc::new(Mutex::new(HashMap::new())),
            #[cfg(feature = "native-sync")]
            wake: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Create a coordinator using the debounce interval from `config`.
    pub fn from_config(
        config: &FolioConfig,
        registry: Arc<ReplicaRegistry>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Self {
        Self::new(registry, clock, config.debounce(), sink)
    }

    /// The registry this coordinator drives.
    pub fn registry(&self) -> &Arc<ReplicaRegistry> {
        &self.registry
    }

    /// Debounce interval.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    // ==================== Lifecycle ====================

    /// Acquire the replica for `key` and start tracking its local edits.
    ///
    /// `seed` is only used when the replica is created.
    pub fn acquire(&self, key: &ReplicaKey, seed: Option<&[u8]>) -> Result<Arc<LiveReplica>> {
        let replica = self.registry.acquire(key, seed);
        if !replica.has_subscription() {
            self.install_observer(key, &replica)?;
        }
        Ok(replica)
    }

    /// Release one acquisition of `key`.
    ///
    /// When the replica is destroyed any pending export is dropped; callers
    /// that care flush first. Returns `true` if the replica was destroyed.
    pub fn release(&self, key: &ReplicaKey) -> bool {
        let destroyed = self.registry.release(key);
        if destroyed {
            let was_dirty = self.pending.lock().unwrap().remove(key).is_some();
            if was_dirty {
                log::warn!(
                    "[SyncCoordinator] Released {} with unexported edits",
                    key
                );
            }
        }
        destroyed
    }

    /// Drop the replica for `key` regardless of ref count, discarding pending edits.
    ///
    /// Other holders keep a detached replica whose edits are never exported.
    pub fn evict(&self, key: &ReplicaKey) {
        let holders = self.registry.ref_count(key);
        if holders > 1 {
            log::warn!(
                "[SyncCoordinator] Evicting {} with {} live references",
                key,
                holders
            );
        }
        self.registry.remove(key);
        self.pending.lock().unwrap().remove(key);
    }

    /// Move a live replica (and its pending state) to a new key.
    pub fn rename(&self, old: &ReplicaKey, new: &ReplicaKey) -> Result<()> {
        self.registry.rename(old, new)?;

        {
            let mut pending = self.pending.lock().unwrap();
            if let Some(deadline) = pending.remove(old) {
                pending.insert(new.clone(), deadline);
            }
        }

        if let Some(replica) = self.registry.get(new) {
            // The old observer captured the old key.
            self.install_observer(new, &replica)?;
        }
        Ok(())
    }

    /// Drop all pending state and every live replica.
    pub fn clear(&self) {
        self.pending.lock().unwrap().clear();
        self.registry.clear();
        log::debug!("[SyncCoordinator] Cleared");
    }

    fn install_observer(&self, key: &ReplicaKey, replica: &LiveReplica) -> Result<()> {
        let pending = Arc::clone(&self.pending);
        let clock = Arc::clone(&self.clock);
        let debounce = self.debounce;
        let applying_remote = replica.applying_remote_flag();
        let observed_key = key.clone();
        #[cfg(feature = "native-sync")]
        let wake = Arc::clone(&self.wake);

        let subscription = replica.doc().observe_updates(move |_update| {
            if applying_remote.load(Ordering::SeqCst) {
                return;
            }
            let deadline = clock.now() + debounce;
            pending
                .lock()
                .unwrap()
                .insert(observed_key.clone(), Some(deadline));
            #[cfg(feature = "native-sync")]
            wake.notify_one();
        })?;

        replica.set_subscription(subscription);
        Ok(())
    }

    // ==================== Debounce ====================

    /// Mark `key` as having unexported local edits and restart its deadline.
    ///
    /// Edits made through the replica's document already do this; call it
    /// directly for changes the observer cannot see.
    pub fn mark_dirty(&self, key: &ReplicaKey) -> Result<()> {
        if !self.registry.is_live(key) {
            return Err(not_acquired(key));
        }
        let deadline = self.clock.now() + self.debounce;
        self.pending.lock().unwrap().insert(key.clone(), Some(deadline));
        #[cfg(feature = "native-sync")]
        self.wake.notify_one();
        Ok(())
    }

    /// Debounce state of `key`.
    pub fn state(&self, key: &ReplicaKey) -> SyncState {
        match self.pending.lock().unwrap().get(key) {
            None => SyncState::Idle,
            Some(deadline) => SyncState::Dirty {
                timer_running: deadline.is_some(),
            },
        }
    }

    /// Whether `key` has unexported local edits.
    pub fn is_dirty(&self, key: &ReplicaKey) -> bool {
        self.pending.lock().unwrap().contains_key(key)
    }

    /// Earliest scheduled export, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .lock()
            .unwrap()
            .values()
            .filter_map(|deadline| *deadline)
            .min()
    }

    /// Export every key whose debounce deadline has passed.
    ///
    /// Failed exports are logged; the key stays dirty without a timer until
    /// the next edit or flush. Returns the number of successful exports.
    pub fn run_due(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<ReplicaKey> = self
            .pending
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, deadline)| deadline.is_some_and(|d| d <= now))
            .map(|(key, _)| key.clone())
            .collect();

        let mut exported = 0;
        for key in due {
            match self.export(&key) {
                Ok(()) => exported += 1,
                Err(e) => log::error!("[SyncCoordinator] Export of {} failed: {}", key, e),
            }
        }
        exported
    }

    /// Export `key` now if it is dirty.
    ///
    /// Returns `Ok(false)` if there was nothing to export.
    pub fn flush(&self, key: &ReplicaKey) -> Result<bool> {
        if !self.is_dirty(key) {
            return Ok(false);
        }
        self.export(key)?;
        Ok(true)
    }

    /// Export every dirty key now. Failures are logged and skipped.
    ///
    /// Returns the number of successful exports.
    pub fn flush_all(&self) -> usize {
        let dirty: Vec<ReplicaKey> = self.pending.lock().unwrap().keys().cloned().collect();

        let mut exported = 0;
        for key in dirty {
            match self.export(&key) {
                Ok(()) => exported += 1,
                Err(e) => log::error!("[SyncCoordinator] Flush of {} failed: {}", key, e),
            }
        }
        exported
    }

    fn export(&self, key: &ReplicaKey) -> Result<()> {
        // Take the entry first: an edit landing during the export re-inserts it.
        self.pending.lock().unwrap().remove(key);

        let Some(replica) = self.registry.get(key) else {
            return Err(not_acquired(key));
        };

        let snapshot = replica.doc().export();
        replica.set_last_saved_snapshot(snapshot.clone());

        if let Err(e) = self.sink.persist_snapshot(key, &snapshot) {
            self.pending
                .lock()
                .unwrap()
                .entry(key.clone())
                .or_insert(None);
            return Err(e);
        }

        log::debug!(
            "[SyncCoordinator] Exported {} ({} bytes)",
            key,
            snapshot.len()
        );
        Ok(())
    }

    // ==================== Remote ====================

    /// Import a snapshot from persistence or a peer into the live replica.
    ///
    /// Imports never mark the key dirty. A snapshot equal to the last one
    /// exchanged with persistence is not re-imported, and an import already
    /// in progress for `key` causes this one to be skipped.
    pub fn apply_remote(&self, key: &ReplicaKey, snapshot: Option<&[u8]>) -> Result<ApplyOutcome> {
        let replica = self.registry.get(key).ok_or_else(|| not_acquired(key))?;

        let Some(snapshot) = snapshot.filter(|s| !s.is_empty()) else {
            return Ok(ApplyOutcome::Skipped);
        };

        if replica.last_saved_snapshot().as_deref() == Some(snapshot) {
            log::debug!("[SyncCoordinator] Skipping echo for {}", key);
            return Ok(ApplyOutcome::Unchanged);
        }

        let Some(_guard) = replica.begin_remote_apply() else {
            log::debug!("[SyncCoordinator] Import already running for {}", key);
            return Ok(ApplyOutcome::Skipped);
        };

        replica.doc().import(snapshot, UpdateOrigin::Remote)?;
        replica.set_last_saved_snapshot(snapshot.to_vec());

        log::debug!(
            "[SyncCoordinator] Applied remote snapshot to {} ({} bytes)",
            key,
            snapshot.len()
        );
        Ok(ApplyOutcome::Applied)
    }

    /// Replace the content of the live replica for `key` with `snapshot`.
    ///
    /// Unlike [`apply_remote`](Self::apply_remote) this is not a merge: the
    /// shared replica is rewritten in place, so every holder sees the new
    /// content. Pending edits are discarded. A snapshot that fails to decode
    /// leaves the replica untouched.
    pub fn reset(&self, key: &ReplicaKey, snapshot: &[u8]) -> Result<ApplyOutcome> {
        let replica = self.registry.get(key).ok_or_else(|| not_acquired(key))?;
        let tree = decode_snapshot(snapshot)?;

        let Some(_guard) = replica.begin_remote_apply() else {
            log::debug!("[SyncCoordinator] Import already running for {}", key);
            return Ok(ApplyOutcome::Skipped);
        };

        replica.doc().replace_blocks(&tree);
        replica.set_last_saved_snapshot(snapshot.to_vec());
        self.pending.lock().unwrap().remove(key);

        log::debug!(
            "[SyncCoordinator] Reset {} to stored snapshot ({} bytes)",
            key,
            snapshot.len()
        );
        Ok(ApplyOutcome::Applied)
    }

    #[cfg(feature = "native-sync")]
    pub(crate) fn wake_handle(&self) -> Arc<tokio::sync::Notify> {
        Arc::clone(&self.wake)
    }
}

impl std::fmt::Debug for SnapshotSyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotSyncCoordinator")
            .field("registry", &self.registry)
            .field("debounce", &self.debounce)
            .field("pending", &self.pending.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

fn not_acquired(key: &ReplicaKey) -> FolioError {
    FolioError::ReplicaNotAcquired {
        document_id: key.document_id.clone(),
        branch: key.branch.clone(),
    }
}
