//! Named branches of a document's replicated state.
//!
//! - [`BranchesMetadata`]: the persisted record (branches, active pointer, audit trail)
//! - [`store`]: pure create/rename/delete/switch/merge functions over it
//! - [`BranchManager`]: applies those functions to stored metadata and live replicas

mod file_storage;
mod manager;
mod memory_storage;
mod metadata;
mod naming;
mod storage;
pub mod store;

pub use file_storage::JsonFileStorage;
pub use manager::{BranchManager, MetadataSink};
pub use memory_storage::MemoryMetadataStorage;
pub use metadata::{
    BranchData, BranchesMetadata, DEFAULT_BRANCH, SnapshotRecord, StoredMetadata,
    decode_snapshot_string, encode_snapshot,
};
pub use naming::{generate_unique_branch_name, sanitize_branch_name};
pub use storage::{MetadataStorage, StorageResult};
pub use store::{
    MAX_RECENT_SNAPSHOTS, create_branch, delete_branch, merge_branch_into, merge_branches,
    rename_branch, restore_recent_snapshot, set_active_branch, trim_recent_snapshots,
    update_branch_snapshot,
};
