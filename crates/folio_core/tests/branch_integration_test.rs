//! Integration tests for branch metadata operations and merges

#[cfg(test)]
mod branch_integration_tests {
    use folio_core::branch::{
        BranchesMetadata, create_branch, delete_branch, generate_unique_branch_name,
        merge_branch_into, rename_branch, sanitize_branch_name, set_active_branch,
        update_branch_snapshot,
    };
    use folio_core::crdt::{BlockDoc, decode_snapshot};
    use folio_core::diff::diff_documents;
    use folio_core::document::Block;

    fn snapshot_of(blocks: Vec<Block>) -> Vec<u8> {
        let doc = BlockDoc::new();
        doc.replace_blocks(&Block::doc(blocks));
        doc.export()
    }

    #[test]
    fn test_create_rename_delete_restores_original_branches() {
        let md = update_branch_snapshot(&BranchesMetadata::default(), "main", &[1, 2, 3]);
        let md = create_branch(&md, "notes", None, None).unwrap();
        let md = set_active_branch(&md, "notes").unwrap();
        let original_branches: Vec<String> = md.branches.keys().cloned().collect();

        let md = create_branch(&md, "feature", Some("main"), None).unwrap();
        let md = rename_branch(&md, "feature", "feat2").unwrap();
        let md = delete_branch(&md, "feat2").unwrap();

        let branches: Vec<String> = md.branches.keys().cloned().collect();
        assert_eq!(branches, original_branches);
        assert_eq!(md.active_branch(), "notes");
    }

    #[test]
    fn test_merge_is_order_independent() {
        let base = BlockDoc::new();
        base.replace_blocks(&Block::doc(vec![Block::paragraph("shared")]));

        let left = BlockDoc::from_snapshot(&base.export()).unwrap();
        left.replace_blocks(&Block::doc(vec![
            Block::paragraph("shared"),
            Block::paragraph("left addition"),
        ]));
        let right = BlockDoc::from_snapshot(&base.export()).unwrap();
        right.replace_blocks(&Block::doc(vec![
            Block::heading(1, "Right title"),
            Block::paragraph("shared"),
        ]));

        let a = left.export();
        let b = right.export();
        let ab = decode_snapshot(&merge_branch_into(&a, &b).unwrap()).unwrap();
        let ba = decode_snapshot(&merge_branch_into(&b, &a).unwrap()).unwrap();

        assert_eq!(ab, ba);
        assert!(diff_documents(&ab, &ba).is_identical());

        let text = ab.text_content();
        assert!(text.contains("Right title"));
        assert!(text.contains("left addition"));
        assert_eq!(text.matches("shared").count(), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let a = snapshot_of(vec![Block::paragraph("only once")]);

        let once = merge_branch_into(&a, &a).unwrap();
        let twice = merge_branch_into(&once, &a).unwrap();

        assert_eq!(
            decode_snapshot(&twice).unwrap(),
            decode_snapshot(&a).unwrap()
        );
    }

    #[test]
    fn test_empty_inputs_are_skipped() {
        let a = snapshot_of(vec![Block::paragraph("kept")]);
        let merged = merge_branch_into(&a, &[]).unwrap();
        assert_eq!(decode_snapshot(&merged).unwrap().text_content(), "kept");

        let nothing = merge_branch_into(&[], &[]).unwrap();
        assert!(decode_snapshot(&nothing).unwrap().children.is_empty());
    }

    #[test]
    fn test_branch_names() {
        assert_eq!(sanitize_branch_name("My Cool Branch!"), "my-cool-branch");

        let md = update_branch_snapshot(&BranchesMetadata::default(), "main", &[]);
        assert_eq!(generate_unique_branch_name(&md, "main"), "main-1");

        let md = create_branch(&md, "main-1", None, None).unwrap();
        assert_eq!(generate_unique_branch_name(&md, "main"), "main-2");
    }

    #[test]
    fn test_metadata_survives_json_boundary() {
        let md = update_branch_snapshot(
            &BranchesMetadata::default(),
            "main",
            &snapshot_of(vec![Block::paragraph("persisted")]),
        );
        let md = create_branch(&md, "copy", Some("main"), None).unwrap();

        let json = serde_json::to_string(&md).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let restored = BranchesMetadata::from_value(Some(&value));

        assert_eq!(restored, md);
        let tree = decode_snapshot(&restored.snapshot_of("copy").unwrap()).unwrap();
        assert_eq!(tree.text_content(), "persisted");
    }
}
