//! Pure branch operations over [`BranchesMetadata`].
//!
//! Every function takes the current metadata by reference and returns the
//! updated value; nothing is persisted here. Callers save the result.

use super::metadata::{
    BranchData, BranchesMetadata, DEFAULT_BRANCH, SnapshotRecord, encode_snapshot, now_millis,
};
use super::naming::sanitize_branch_name;
use crate::crdt::merge_snapshots;
use crate::error::{FolioError, Result};

/// Cap on the recent-snapshot audit trail.
pub const MAX_RECENT_SNAPSHOTS: usize = 10;

/// Add a branch named `name`.
///
/// The new branch starts from `from`'s snapshot when that branch has stored
/// state, else from `initial`, else empty.
pub fn create_branch(
    metadata: &BranchesMetadata,
    name: &str,
    from: Option<&str>,
    initial: Option<&[u8]>,
) -> Result<BranchesMetadata> {
    if sanitize_branch_name(name).is_empty() {
        return Err(FolioError::InvalidBranchName(name.to_string()));
    }
    if metadata.contains(name) {
        return Err(FolioError::BranchAlreadyExists(name.to_string()));
    }

    let now = now_millis();
    let snapshot = match from.and_then(|source| metadata.branches.get(source)) {
        Some(source) => source.snapshot.clone(),
        None => encode_snapshot(initial.unwrap_or_default()),
    };

    let mut next = metadata.clone();
    next.branches.insert(
        name.to_string(),
        BranchData {
            snapshot,
            created_at: now,
            updated_at: now,
        },
    );
    Ok(next)
}

/// Move branch `from` to `to`, following the active pointer.
///
/// No-op when the names are equal or `from` has no stored entry.
pub fn rename_branch(metadata: &BranchesMetadata, from: &str, to: &str) -> Result<BranchesMetadata> {
    if from == to || !metadata.branches.contains_key(from) {
        return Ok(metadata.clone());
    }
    if sanitize_branch_name(to).is_empty() {
        return Err(FolioError::InvalidBranchName(to.to_string()));
    }
    if metadata.contains(to) {
        return Err(FolioError::BranchAlreadyExists(to.to_string()));
    }

    let mut next = metadata.clone();
    if let Some(data) = next.branches.remove(from) {
        next.branches.insert(to.to_string(), data);
    }
    if next.active_branch.as_deref() == Some(from) {
        next.active_branch = Some(to.to_string());
    }
    for record in next.recent_snapshots.iter_mut().filter(|r| r.branch == from) {
        record.branch = to.to_string();
    }
    Ok(next)
}

/// Remove branch `name`.
///
/// The default branch cannot be deleted. If `name` was active, the active
/// pointer moves to `"main"` when it has an entry, else to the smallest
/// remaining name, else back to the implied main.
pub fn delete_branch(metadata: &BranchesMetadata, name: &str) -> Result<BranchesMetadata> {
    if name == DEFAULT_BRANCH {
        return Err(FolioError::ProtectedBranch(name.to_string()));
    }
    if !metadata.branches.contains_key(name) {
        return Ok(metadata.clone());
    }

    let mut next = metadata.clone();
    next.branches.remove(name);

    if next.active_branch.as_deref() == Some(name) {
        next.active_branch = if next.branches.contains_key(DEFAULT_BRANCH) {
            Some(DEFAULT_BRANCH.to_string())
        } else {
            next.branches.keys().next().cloned()
        };
    }
    Ok(next)
}

/// Point the active branch at `name`.
pub fn set_active_branch(metadata: &BranchesMetadata, name: &str) -> Result<BranchesMetadata> {
    if !metadata.contains(name) {
        return Err(FolioError::BranchNotFound(name.to_string()));
    }
    let mut next = metadata.clone();
    next.active_branch = Some(name.to_string());
    Ok(next)
}

/// Store `snapshot` as the current state of `name`, creating the branch if needed.
///
/// Also records the save in the recent-snapshot trail.
pub fn update_branch_snapshot(
    metadata: &BranchesMetadata,
    name: &str,
    snapshot: &[u8],
) -> BranchesMetadata {
    let now = now_millis();
    let encoded = encode_snapshot(snapshot);

    let mut next = metadata.clone();
    next.branches
        .entry(name.to_string())
        .and_modify(|data| {
            data.snapshot = encoded.clone();
            data.updated_at = now;
        })
        .or_insert_with(|| BranchData {
            snapshot: encoded.clone(),
            created_at: now,
            updated_at: now,
        });

    next.recent_snapshots.push(SnapshotRecord {
        branch: name.to_string(),
        snapshot: encoded,
        saved_at: now,
    });
    truncate_recent(&mut next, MAX_RECENT_SNAPSHOTS);
    next
}

/// Keep only the newest `limit` entries of the recent-snapshot trail.
pub fn trim_recent_snapshots(metadata: &BranchesMetadata, limit: usize) -> BranchesMetadata {
    let mut next = metadata.clone();
    truncate_recent(&mut next, limit);
    next
}

fn truncate_recent(metadata: &mut BranchesMetadata, limit: usize) {
    let len = metadata.recent_snapshots.len();
    if len > limit {
        metadata.recent_snapshots.drain(..len - limit);
    }
}

/// Merge two snapshots into one holding both histories.
pub fn merge_branch_into(target: &[u8], source: &[u8]) -> Result<Vec<u8>> {
    merge_snapshots(target, source)
}

/// Fold branch `source` into branch `target` and store the result in `target`.
pub fn merge_branches(
    metadata: &BranchesMetadata,
    source: &str,
    target: &str,
) -> Result<BranchesMetadata> {
    for name in [source, target] {
        if !metadata.contains(name) {
            return Err(FolioError::BranchNotFound(name.to_string()));
        }
    }

    let merged = merge_branch_into(&metadata.snapshot_of(target)?, &metadata.snapshot_of(source)?)?;
    Ok(update_branch_snapshot(metadata, target, &merged))
}

/// Make the recent-snapshot entry at `index` its branch's current state again.
pub fn restore_recent_snapshot(metadata: &BranchesMetadata, index: usize) -> Result<BranchesMetadata> {
    let record = metadata
        .recent_snapshots
        .get(index)
        .ok_or(FolioError::SnapshotNotFound(index))?;
    let bytes = super::metadata::decode_snapshot_string(&record.snapshot)?;
    Ok(update_branch_snapshot(metadata, &record.branch, &bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{BlockDoc, decode_snapshot};
    use crate::document::Block;

    fn snapshot_with(text: &str) -> Vec<u8> {
        let doc = BlockDoc::new();
        doc.replace_blocks(&Block::doc(vec![Block::paragraph(text)]));
        doc.export()
    }

    fn with_main(bytes: &[u8]) -> BranchesMetadata {
        update_branch_snapshot(&BranchesMetadata::default(), "main", bytes)
    }

    #[test]
    fn test_create_copies_source_snapshot() {
        let md = with_main(&[1, 2, 3]);
        let md = create_branch(&md, "feature", Some("main"), Some(&[9])).unwrap();

        assert_eq!(md.snapshot_of("feature").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_create_falls_back_to_initial_then_empty() {
        let md = BranchesMetadata::default();

        let md = create_branch(&md, "a", Some("missing"), Some(&[7])).unwrap();
        assert_eq!(md.snapshot_of("a").unwrap(), vec![7]);

        let md = create_branch(&md, "b", None, None).unwrap();
        assert!(md.snapshot_of("b").unwrap().is_empty());
    }

    #[test]
    fn test_create_rejects_duplicates() {
        let md = create_branch(&BranchesMetadata::default(), "feature", None, None).unwrap();

        assert!(matches!(
            create_branch(&md, "feature", None, None),
            Err(FolioError::BranchAlreadyExists(_))
        ));
        assert!(matches!(
            create_branch(&md, "main", None, None),
            Err(FolioError::BranchAlreadyExists(_))
        ));
        assert!(matches!(
            create_branch(&md, "  ", None, None),
            Err(FolioError::InvalidBranchName(_))
        ));
    }

    #[test]
    fn test_create_leaves_input_untouched() {
        let md = BranchesMetadata::default();
        let _ = create_branch(&md, "feature", None, None).unwrap();
        assert!(md.branches.is_empty());
    }

    #[test]
    fn test_rename_moves_entry_and_active_pointer() {
        let md = create_branch(&with_main(&[1]), "draft", Some("main"), None).unwrap();
        let md = set_active_branch(&md, "draft").unwrap();
        let md = update_branch_snapshot(&md, "draft", &[2]);

        let md = rename_branch(&md, "draft", "final").unwrap();

        assert!(!md.branches.contains_key("draft"));
        assert_eq!(md.snapshot_of("final").unwrap(), vec![2]);
        assert_eq!(md.active_branch(), "final");
        assert!(md.recent_snapshots.iter().all(|r| r.branch != "draft"));
    }

    #[test]
    fn test_rename_noops() {
        let md = create_branch(&BranchesMetadata::default(), "a", None, None).unwrap();

        assert_eq!(rename_branch(&md, "a", "a").unwrap(), md);
        assert_eq!(rename_branch(&md, "ghost", "b").unwrap(), md);
    }

    #[test]
    fn test_rename_onto_existing_fails() {
        let md = create_branch(&with_main(&[]), "a", None, None).unwrap();
        assert!(matches!(
            rename_branch(&md, "a", "main"),
            Err(FolioError::BranchAlreadyExists(_))
        ));
    }

    #[test]
    fn test_delete_main_is_refused() {
        let md = with_main(&[1]);
        assert!(matches!(
            delete_branch(&md, "main"),
            Err(FolioError::ProtectedBranch(_))
        ));
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let md = with_main(&[1]);
        assert_eq!(delete_branch(&md, "ghost").unwrap(), md);
    }

    #[test]
    fn test_delete_active_falls_back_to_main() {
        let md = create_branch(&with_main(&[]), "zeta", None, None).unwrap();
        let md = create_branch(&md, "alpha", None, None).unwrap();
        let md = set_active_branch(&md, "zeta").unwrap();

        let md = delete_branch(&md, "zeta").unwrap();
        assert_eq!(md.active_branch.as_deref(), Some("main"));
    }

    #[test]
    fn test_delete_active_without_main_picks_smallest() {
        let md = create_branch(&BranchesMetadata::default(), "zeta", None, None).unwrap();
        let md = create_branch(&md, "beta", None, None).unwrap();
        let md = create_branch(&md, "alpha", None, None).unwrap();
        let md = set_active_branch(&md, "beta").unwrap();

        let md = delete_branch(&md, "beta").unwrap();
        assert_eq!(md.active_branch.as_deref(), Some("alpha"));

        let md = set_active_branch(&md, "zeta").unwrap();
        let md = delete_branch(&md, "alpha").unwrap();
        let md = delete_branch(&md, "zeta").unwrap();
        assert_eq!(md.active_branch, None);
        assert_eq!(md.active_branch(), "main");
    }

    #[test]
    fn test_set_active_requires_existing_branch() {
        let md = BranchesMetadata::default();
        assert!(matches!(
            set_active_branch(&md, "nope"),
            Err(FolioError::BranchNotFound(_))
        ));
        assert_eq!(set_active_branch(&md, "main").unwrap().active_branch(), "main");
    }

    #[test]
    fn test_update_creates_and_upserts() {
        let md = update_branch_snapshot(&BranchesMetadata::default(), "notes", &[1]);
        let created = md.branches["notes"].created_at;

        let md = update_branch_snapshot(&md, "notes", &[2]);
        assert_eq!(md.snapshot_of("notes").unwrap(), vec![2]);
        assert_eq!(md.branches["notes"].created_at, created);
        assert!(md.branches["notes"].updated_at >= created);
        assert_eq!(md.recent_snapshots.len(), 2);
    }

    #[test]
    fn test_recent_snapshots_are_capped() {
        let mut md = BranchesMetadata::default();
        for i in 0..15u8 {
            md = update_branch_snapshot(&md, "main", &[i]);
        }

        assert_eq!(md.recent_snapshots.len(), MAX_RECENT_SNAPSHOTS);
        assert_eq!(md.recent_snapshots[0].snapshot, encode_snapshot(&[5]));
        assert_eq!(md.recent_snapshots[9].snapshot, encode_snapshot(&[14]));

        let md = trim_recent_snapshots(&md, 3);
        assert_eq!(md.recent_snapshots.len(), 3);
        assert_eq!(md.recent_snapshots[0].snapshot, encode_snapshot(&[12]));
    }

    #[test]
    fn test_restore_recent_snapshot() {
        let md = update_branch_snapshot(&BranchesMetadata::default(), "main", &[1]);
        let md = update_branch_snapshot(&md, "main", &[2]);

        let md = restore_recent_snapshot(&md, 0).unwrap();
        assert_eq!(md.snapshot_of("main").unwrap(), vec![1]);

        assert!(matches!(
            restore_recent_snapshot(&md, 99),
            Err(FolioError::SnapshotNotFound(99))
        ));
    }

    #[test]
    fn test_merge_branches_writes_target() {
        let md = with_main(&snapshot_with("main text"));
        let md = create_branch(&md, "side", None, Some(&snapshot_with("side text"))).unwrap();

        let md = merge_branches(&md, "side", "main").unwrap();

        let merged = decode_snapshot(&md.snapshot_of("main").unwrap()).unwrap();
        let text = merged.text_content();
        assert!(text.contains("main text"));
        assert!(text.contains("side text"));

        let side = decode_snapshot(&md.snapshot_of("side").unwrap()).unwrap();
        assert_eq!(side.text_content(), "side text");
    }

    #[test]
    fn test_merge_requires_both_branches() {
        let md = with_main(&[]);
        assert!(matches!(
            merge_branches(&md, "ghost", "main"),
            Err(FolioError::BranchNotFound(_))
        ));
    }

    #[test]
    fn test_merge_into_empty_target() {
        let source = snapshot_with("only source");
        let merged = merge_branch_into(&[], &source).unwrap();
        assert_eq!(decode_snapshot(&merged).unwrap().text_content(), "only source");
    }
}
