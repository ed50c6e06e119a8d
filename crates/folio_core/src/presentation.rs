//! Mapping diff results onto editor decorations.
//!
//! [`present`] turns a [`DiffResult`] into a flat list of [`Decoration`]s
//! positioned in the right-hand (displayed) document:
//!
//! - `added` → node decoration over the block
//! - `deleted` → widget where the block used to be, carrying the old block
//! - `modified` with text diffs → inline decorations for inserts, widgets
//!   carrying the removed text for deletes
//! - `modified` without text diffs → node decoration
//! - `unchanged` → nothing
//!
//! Positions come from a [`RenderSurface`]. [`DocumentLayout`] provides
//! ProseMirror-compatible positions computed from the block tree itself.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::diff::{DiffKind, DiffNode, DiffResult, TextDiffKind, diff_documents};
use crate::document::{Block, Node};

/// Positions of the displayed document.
pub trait RenderSurface {
    /// `(from, to)` of the top-level child at `index`.
    fn block_span(&self, index: usize) -> Option<(usize, usize)>;

    /// Position of character `offset` of the text content of top-level child
    /// `index`. `offset` may equal the text length (end of text).
    fn text_position(&self, index: usize, offset: usize) -> Option<usize>;

    /// Position just past the last top-level child.
    fn content_end(&self) -> usize;
}

/// Visual class of a decoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum DiffClass {
    /// Whole block added
    BlockAdded,
    /// Block modified without text changes (kind or attributes)
    BlockModified,
    /// Whole block deleted
    BlockDeleted,
    /// Text inserted inside a modified block
    TextInserted,
    /// Text deleted inside a modified block
    TextDeleted,
}

impl DiffClass {
    /// CSS class name for this decoration.
    pub fn css_class(&self) -> &'static str {
        match self {
            DiffClass::BlockAdded => "diff-block-added",
            DiffClass::BlockModified => "diff-block-modified",
            DiffClass::BlockDeleted => "diff-block-deleted",
            DiffClass::TextInserted => "diff-text-inserted",
            DiffClass::TextDeleted => "diff-text-deleted",
        }
    }
}

/// Content shown by a deletion widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum DeletedContent {
    /// A block that no longer exists on the right
    Block(Block),
    /// Text removed from a modified block
    Text(String),
}

/// One visual annotation on the displayed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum Decoration {
    /// Highlight over a whole block
    Node {
        /// Start position
        from: usize,
        /// End position
        to: usize,
        /// Visual class
        class: DiffClass,
    },
    /// Highlight over a text range
    Inline {
        /// Start position
        from: usize,
        /// End position
        to: usize,
        /// Visual class
        class: DiffClass,
    },
    /// Non-editable marker inserted at a position
    Widget {
        /// Insertion position
        pos: usize,
        /// Visual class
        class: DiffClass,
        /// What the marker shows
        deleted: DeletedContent,
    },
}

impl Decoration {
    /// Visual class of this decoration.
    pub fn class(&self) -> DiffClass {
        match self {
            Decoration::Node { class, .. }
            | Decoration::Inline { class, .. }
            | Decoration::Widget { class, .. } => *class,
        }
    }
}

/// Build the decoration set for `result` on `surface`.
///
/// Nodes whose positions the surface cannot resolve are skipped.
pub fn present(result: &DiffResult, surface: &impl RenderSurface) -> Vec<Decoration> {
    let mut decorations = Vec::new();

    for (i, node) in result.nodes.iter().enumerate() {
        match node.kind {
            DiffKind::Unchanged => {}
            DiffKind::Added => {
                if let Some((from, to)) = node.right_index.and_then(|ri| surface.block_span(ri)) {
                    decorations.push(Decoration::Node {
                        from,
                        to,
                        class: DiffClass::BlockAdded,
                    });
                }
            }
            DiffKind::Deleted => {
                let pos = deletion_anchor(&result.nodes[i + 1..], surface);
                decorations.push(Decoration::Widget {
                    pos,
                    class: DiffClass::BlockDeleted,
                    deleted: DeletedContent::Block(node.node.clone()),
                });
            }
            DiffKind::Modified => present_modified(node, surface, &mut decorations),
        }
    }

    decorations
}

/// A deleted block is shown just before the next block that exists on the right.
fn deletion_anchor(following: &[DiffNode], surface: &impl RenderSurface) -> usize {
    following
        .iter()
        .filter_map(|node| node.right_index)
        .find_map(|ri| surface.block_span(ri))
        .map_or_else(|| surface.content_end(), |(from, _)| from)
}

fn present_modified(node: &DiffNode, surface: &impl RenderSurface, out: &mut Vec<Decoration>) {
    let Some(index) = node.right_index else {
        log::debug!("Modified node without a right-hand position; skipping");
        return;
    };

    if node.text_diffs.is_empty() {
        if let Some((from, to)) = surface.block_span(index) {
            out.push(Decoration::Node {
                from,
                to,
                class: DiffClass::BlockModified,
            });
        }
        return;
    }

    // Deletes carry source offsets; shift them by what has been inserted and
    // removed before them to land in the displayed text.
    let mut delta: isize = 0;
    for diff in &node.text_diffs {
        let len = diff.content.chars().count() as isize;
        match diff.kind {
            TextDiffKind::Insert => {
                let from = surface.text_position(index, diff.start);
                let to = surface.text_position(index, diff.end);
                if let (Some(from), Some(to)) = (from, to) {
                    out.push(Decoration::Inline {
                        from,
                        to,
                        class: DiffClass::TextInserted,
                    });
                }
                delta += len;
            }
            TextDiffKind::Delete => {
                let destination = (diff.start as isize + delta).max(0) as usize;
                if let Some(pos) = surface.text_position(index, destination) {
                    out.push(Decoration::Widget {
                        pos,
                        class: DiffClass::TextDeleted,
                        deleted: DeletedContent::Text(diff.content.clone()),
                    });
                }
                delta -= len;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct BlockLayout {
    from: usize,
    to: usize,
    content_start: usize,
    /// Position of each character of the block's text content
    char_positions: Vec<usize>,
}

/// ProseMirror-style positions of a document's top-level children.
///
/// Text counts one position per character, leaf blocks (images, rules,
/// hard breaks) one position, other blocks an opening and a closing token
/// around their content.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLayout {
    blocks: Vec<Option<BlockLayout>>,
    content_end: usize,
}

impl DocumentLayout {
    /// Compute the layout of `doc`'s children.
    pub fn from_doc(doc: &Block) -> Self {
        let mut pos = 0;
        let mut blocks = Vec::with_capacity(doc.children.len());

        for child in &doc.children {
            match child {
                Node::Block(block) => {
                    let from = pos;
                    let mut char_positions = Vec::new();
                    let to = if block.is_leaf() {
                        from + 1
                    } else {
                        layout_children(&block.children, from + 1, &mut char_positions) + 1
                    };
                    blocks.push(Some(BlockLayout {
                        from,
                        to,
                        content_start: from + 1,
                        char_positions,
                    }));
                    pos = to;
                }
                Node::Text(span) => {
                    pos += span.text.chars().count();
                    blocks.push(None);
                }
            }
        }

        Self {
            blocks,
            content_end: pos,
        }
    }
}

fn layout_children(children: &[Node], mut pos: usize, chars: &mut Vec<usize>) -> usize {
    for child in children {
        match child {
            Node::Text(span) => {
                for _ in span.text.chars() {
                    chars.push(pos);
                    pos += 1;
                }
            }
            Node::Block(block) if block.is_leaf() => pos += 1,
            Node::Block(block) => pos = layout_children(&block.children, pos + 1, chars) + 1,
        }
    }
    pos
}

impl RenderSurface for DocumentLayout {
    fn block_span(&self, index: usize) -> Option<(usize, usize)> {
        let layout = self.blocks.get(index)?.as_ref()?;
        Some((layout.from, layout.to))
    }

    fn text_position(&self, index: usize, offset: usize) -> Option<usize> {
        let layout = self.blocks.get(index)?.as_ref()?;
        match layout.char_positions.get(offset) {
            Some(&pos) => Some(pos),
            None if offset == layout.char_positions.len() => Some(
                layout
                    .char_positions
                    .last()
                    .map_or(layout.content_start, |pos| pos + 1),
            ),
            None => None,
        }
    }

    fn content_end(&self) -> usize {
        self.content_end
    }
}

struct CacheEntry {
    left: Block,
    right: Block,
    diff: DiffResult,
    decorations: Vec<Decoration>,
}

/// Decorations for the most recent `(left, right)` pair.
///
/// Recomputes only when either document differs (structurally) from the
/// cached pair.
#[derive(Default)]
pub struct DecorationCache {
    entry: Option<CacheEntry>,
}

impl DecorationCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the cached decorations belong to this pair.
    pub fn is_cached(&self, left: &Block, right: &Block) -> bool {
        self.entry
            .as_ref()
            .is_some_and(|entry| entry.left == *left && entry.right == *right)
    }

    /// Decorations for `right` compared against `left`.
    pub fn decorations(&mut self, left: &Block, right: &Block) -> &[Decoration] {
        &self.refresh(left, right).decorations
    }

    /// Diff of `left` against `right`, from the cache when possible.
    pub fn diff(&mut self, left: &Block, right: &Block) -> &DiffResult {
        &self.refresh(left, right).diff
    }

    /// Drop the cached pair.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    fn refresh(&mut self, left: &Block, right: &Block) -> &CacheEntry {
        if !self.is_cached(left, right) {
            self.entry = None;
        }
        self.entry.get_or_insert_with(|| {
            let diff = diff_documents(left, right);
            let decorations = present(&diff, &DocumentLayout::from_doc(right));
            CacheEntry {
                left: left.clone(),
                right: right.clone(),
                diff,
                decorations,
            }
        })
    }
}

impl std::fmt::Debug for DecorationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecorationCache")
            .field(
                "decorations",
                &self.entry.as_ref().map(|entry| entry.decorations.len()),
            )
            .finish()
    }
}
