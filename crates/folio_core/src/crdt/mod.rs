//! Replicated block documents and their sync with persistence.
//!
//! - [`BlockDoc`]: one CRDT replica holding a block tree
//! - [`ReplicaRegistry`]: ref-counted live replicas keyed by (document, branch)
//! - [`SnapshotSyncCoordinator`]: debounced export and guarded import

mod block_doc;
mod clock;
mod coordinator;
#[cfg(feature = "native-sync")]
mod driver;
mod registry;
mod types;

pub use block_doc::{
    BlockDoc, DOCUMENT_FRAGMENT_NAME, SNAPSHOT_MAGIC, decode_snapshot, merge_snapshots,
};
#[cfg(feature = "native-sync")]
pub use clock::TokioClock;
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{SnapshotSink, SnapshotSyncCoordinator};
#[cfg(feature = "native-sync")]
pub use driver::spawn_debounce_driver;
pub use registry::{LiveReplica, RemoteApplyGuard, ReplicaRegistry};
pub use types::{ApplyOutcome, ReplicaKey, SyncState, UpdateOrigin};
