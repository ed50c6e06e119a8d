//! Structural document diffing.
//!
//! - [`diff_text`]: character-level Myers diff with semantic cleanup
//! - [`diff_documents`]: positional block alignment with adjacent-swap detection
//!
//! Both are pure functions; presentation of the result lives in
//! [`crate::presentation`].

mod text;
mod tree;

pub use text::diff_text;
pub use tree::{compare_nodes, diff_documents};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::document::Block;

/// Direction of a character-level edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum TextDiffKind {
    /// Text present only in the destination string
    Insert,
    /// Text present only in the source string
    Delete,
}

/// One insert or delete span of a text diff.
///
/// Offsets are in chars: destination offsets for inserts, source offsets for
/// deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TextDiff {
    /// Start offset (inclusive)
    pub start: usize,
    /// End offset (exclusive)
    pub end: usize,
    /// Insert or delete
    pub kind: TextDiffKind,
    /// The inserted or deleted text
    pub content: String,
}

/// Classification of a block in a document diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum DiffKind {
    /// Present and identical on both sides
    Unchanged,
    /// Only present on the right
    Added,
    /// Only present on the left
    Deleted,
    /// Present on both sides with different content or attributes
    Modified,
}

/// Output unit of a document diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct DiffNode {
    /// How the block changed
    pub kind: DiffKind,

    /// Right-hand block, or the left-hand block for deletions
    pub node: Block,

    /// Character diffs; non-empty only for modified text
    #[serde(default)]
    pub text_diffs: Vec<TextDiff>,

    /// Index of the block among the left document's children
    pub left_index: Option<usize>,

    /// Index of the block among the right document's children
    pub right_index: Option<usize>,
}

/// Per-kind node counts of a document diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DiffStats {
    /// Blocks classified as added
    pub additions: usize,
    /// Blocks classified as deleted
    pub deletions: usize,
    /// Blocks classified as modified
    pub modifications: usize,
}

impl DiffStats {
    /// Total number of changed blocks.
    pub fn total(&self) -> usize {
        self.additions + self.deletions + self.modifications
    }
}

/// Result of [`diff_documents`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DiffResult {
    /// Diff nodes in emission order
    pub nodes: Vec<DiffNode>,
    /// Change counts
    pub stats: DiffStats,
}

impl DiffResult {
    /// Whether both documents compared equal block for block.
    pub fn is_identical(&self) -> bool {
        self.stats.total() == 0
    }
}
