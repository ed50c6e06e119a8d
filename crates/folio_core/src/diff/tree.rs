//! Block-level document diff.
//!
//! Blocks are aligned by position (index `i` on the left against index `i` on
//! the right) with a single lookahead step that recognises two adjacent blocks
//! trading places. Cheap, deterministic, and good at the common edits: typing
//! inside a block, appending, deleting from the end, swapping neighbours.

use super::text::diff_text;
use super::{DiffKind, DiffNode, DiffResult, DiffStats};
use crate::document::{Block, Node};

/// Diff two root documents block by block.
///
/// Empty paragraphs/headings are dropped from both sides before alignment so
/// that transient blank lines don't surface as additions or deletions.
pub fn diff_documents(left: &Block, right: &Block) -> DiffResult {
    let left_blocks = comparable_children(left);
    let right_blocks = comparable_children(right);

    let mut nodes = Vec::new();
    let mut stats = DiffStats::default();
    let len = left_blocks.len().max(right_blocks.len());

    let mut i = 0;
    while i < len {
        match (left_blocks.get(i), right_blocks.get(i)) {
            (None, Some(&(right_index, right_block))) => {
                nodes.push(added(right_index, right_block));
                stats.additions += 1;
                i += 1;
            }
            (Some(&(left_index, left_block)), None) => {
                nodes.push(deleted(left_index, left_block));
                stats.deletions += 1;
                i += 1;
            }
            (Some(&(left_index, left_block)), Some(&(right_index, right_block))) => {
                if is_adjacent_swap(&left_blocks, &right_blocks, i) {
                    nodes.push(deleted(left_index, left_block));
                    nodes.push(added(right_index, right_block));
                    stats.deletions += 1;
                    stats.additions += 1;
                    i += 2;
                    continue;
                }

                let mut node = compare_nodes(left_block, right_block);
                node.left_index = Some(left_index);
                node.right_index = Some(right_index);
                if node.kind == DiffKind::Modified {
                    stats.modifications += 1;
                }
                nodes.push(node);
                i += 1;
            }
            (None, None) => break,
        }
    }

    DiffResult { nodes, stats }
}

/// Compare two blocks occupying the same position.
///
/// Marks are ignored: a formatting-only change with identical text is
/// `Unchanged`. Attribute-only changes are `Modified` without text diffs.
pub fn compare_nodes(left: &Block, right: &Block) -> DiffNode {
    if left.kind != right.kind {
        return modified(right, Vec::new());
    }

    let left_text = left.text_content();
    let right_text = right.text_content();

    if left_text == right_text {
        if left.attrs == right.attrs {
            return DiffNode {
                kind: DiffKind::Unchanged,
                node: right.clone(),
                text_diffs: Vec::new(),
                left_index: None,
                right_index: None,
            };
        }
        return modified(right, Vec::new());
    }

    modified(right, diff_text(&left_text, &right_text))
}

/// Direct child blocks paired with their original index, minus empty text blocks.
fn comparable_children(root: &Block) -> Vec<(usize, &Block)> {
    root.children
        .iter()
        .enumerate()
        .filter_map(|(index, child)| match child {
            Node::Block(block) => Some((index, block)),
            Node::Text(_) => None,
        })
        .filter(|(_, block)| !(block.is_text_block() && block.text_content().trim().is_empty()))
        .collect()
}

/// `left[i]`/`right[i]` share a kind but differ in text, and the next pair
/// mirrors them exactly.
fn is_adjacent_swap(left: &[(usize, &Block)], right: &[(usize, &Block)], i: usize) -> bool {
    let (Some(&(_, l0)), Some(&(_, r0))) = (left.get(i), right.get(i)) else {
        return false;
    };
    let (Some(&(_, l1)), Some(&(_, r1))) = (left.get(i + 1), right.get(i + 1)) else {
        return false;
    };

    if l0.kind != r0.kind {
        return false;
    }
    let left_text = l0.text_content();
    let right_text = r0.text_content();
    if left_text == right_text {
        return false;
    }

    l1.kind == r0.kind
        && r1.kind == l0.kind
        && l1.text_content() == right_text
        && r1.text_content() == left_text
}

fn added(index: usize, block: &Block) -> DiffNode {
    DiffNode {
        kind: DiffKind::Added,
        node: block.clone(),
        text_diffs: Vec::new(),
        left_index: None,
        right_index: Some(index),
    }
}

fn deleted(index: usize, block: &Block) -> DiffNode {
    DiffNode {
        kind: DiffKind::Deleted,
        node: block.clone(),
        text_diffs: Vec::new(),
        left_index: Some(index),
        right_index: None,
    }
}

fn modified(block: &Block, text_diffs: Vec<super::TextDiff>) -> DiffNode {
    DiffNode {
        kind: DiffKind::Modified,
        node: block.clone(),
        text_diffs,
        left_index: None,
        right_index: None,
    }
}
