//! Replicated rich-text document backed by a Y.Doc.
//!
//! This module provides `BlockDoc`, a Y.Doc whose content lives in a single
//! Y.XmlFragment using the y-prosemirror layout:
//! - each block node is an `XmlElement` (tag = block kind, attributes = attrs)
//! - each run of inline text is an `XmlText` whose formatting attributes are
//!   the marks (`{ bold: true }`, `{ link: { href } }`)
//!
//! The projection works both ways: [`BlockDoc::to_block_tree`] reads the
//! current content as a [`Block`] tree, [`BlockDoc::replace_blocks`] writes an
//! edited tree back as CRDT operations.
//!
//! Exported snapshots are framed before they leave the replica:
//!
//! ```text
//! [magic: 4 bytes "FLS1"] [length: u32 LE] [crc32: u32 LE] [yrs v1 update]
//! ```
//!
//! `import` checks the frame before the payload reaches the yrs decoder, so
//! truncated or bit-flipped snapshots are rejected as decode errors.

use std::collections::HashMap;
use std::sync::Arc;

use yrs::types::Attrs as YAttrs;
use yrs::types::text::YChange;
use yrs::updates::decoder::Decode;
use yrs::{
    Any, Doc, Out, ReadTxn, Text, Transact, TransactionMut, Update, Xml, XmlElementPrelim,
    XmlElementRef, XmlFragment, XmlFragmentRef, XmlOut, XmlTextPrelim, XmlTextRef,
};

use super::types::UpdateOrigin;
use crate::document::{AttrValue, Attrs, Block, Mark, Node, TextSpan, kind};
use crate::error::{FolioError, Result};

/// Name of the Y.XmlFragment holding the document content.
pub const DOCUMENT_FRAGMENT_NAME: &str = "prosemirror";

/// Leading bytes of every exported snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"FLS1";

const FRAME_HEADER_SIZE: usize = 12;

/// Wrap a raw yrs update in the snapshot frame.
fn frame_snapshot(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    framed.extend_from_slice(&SNAPSHOT_MAGIC);
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Validate the snapshot frame and return the yrs update inside it.
fn unframe_snapshot(snapshot: &[u8]) -> Result<&[u8]> {
    if snapshot.len() < FRAME_HEADER_SIZE {
        return Err(FolioError::SnapshotDecode(format!(
            "snapshot too short ({} bytes)",
            snapshot.len()
        )));
    }
    let (header, payload) = snapshot.split_at(FRAME_HEADER_SIZE);
    if header[0..4] != SNAPSHOT_MAGIC {
        return Err(FolioError::SnapshotDecode("missing snapshot header".to_string()));
    }

    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if length != payload.len() {
        return Err(FolioError::SnapshotDecode(format!(
            "snapshot length mismatch: header says {}, got {}",
            length,
            payload.len()
        )));
    }

    let expected_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    let actual_crc = crc32fast::hash(payload);
    if actual_crc != expected_crc {
        return Err(FolioError::SnapshotDecode(format!(
            "snapshot CRC mismatch: expected {:08x}, got {:08x}",
            expected_crc, actual_crc
        )));
    }
    Ok(payload)
}

/// A replicated document whose content projects onto a [`Block`] tree.
///
/// # Example
///
/// ```ignore
/// use folio_core::crdt::BlockDoc;
/// use folio_core::document::Block;
///
/// let doc = BlockDoc::new();
/// doc.replace_blocks(&Block::doc(vec![Block::paragraph("Hello")]));
///
/// let copy = BlockDoc::from_snapshot(&doc.export())?;
/// assert_eq!(copy.to_block_tree().text_content(), "Hello");
/// ```
pub struct BlockDoc {
    doc: Doc,
    fragment: XmlFragmentRef,
}

impl BlockDoc {
    /// Create a new empty replica.
    pub fn new() -> Self {
        let doc = Doc::new();
        let fragment = doc.get_or_insert_xml_fragment(DOCUMENT_FRAGMENT_NAME);
        Self { doc, fragment }
    }

    /// Create a replica seeded with a snapshot.
    ///
    /// An empty byte string yields an empty replica.
    pub fn from_snapshot(snapshot: &[u8]) -> Result<Self> {
        let doc = Self::new();
        doc.import(snapshot, UpdateOrigin::Remote)?;
        Ok(doc)
    }

    // ==================== Import / Export ====================

    /// Merge a snapshot (or incremental update) into this replica.
    ///
    /// Empty input is treated as "no state" and skipped. On a bad frame,
    /// decode or apply failure the replica keeps its prior state.
    pub fn import(&self, snapshot: &[u8], origin: UpdateOrigin) -> Result<()> {
        if snapshot.is_empty() {
            return Ok(());
        }

        let payload = unframe_snapshot(snapshot)?;
        let update = Update::decode_v1(payload)
            .map_err(|e| FolioError::SnapshotDecode(e.to_string()))?;

        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| FolioError::SnapshotApply(e.to_string()))?;

        log::debug!("BlockDoc: imported {} bytes ({})", snapshot.len(), origin);
        Ok(())
    }

    /// Export the full replica state as a framed snapshot.
    pub fn export(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        frame_snapshot(&txn.encode_state_as_update_v1(&Default::default()))
    }

    /// Whether the document has no content.
    pub fn is_empty(&self) -> bool {
        let txn = self.doc.transact();
        self.fragment.len(&txn) == 0
    }

    // ==================== Projection ====================

    /// Materialize the current content as a `"doc"` block tree.
    pub fn to_block_tree(&self) -> Block {
        let txn = self.doc.transact();
        let mut root = Block::new(kind::DOC);
        root.children = read_children(&txn, &self.fragment);
        root
    }

    /// Rewrite the content to match `root`'s children.
    ///
    /// Unchanged leading and trailing blocks are left untouched so their CRDT
    /// identity survives; only the differing middle range is replaced.
    pub fn replace_blocks(&self, root: &Block) {
        let current = self.to_block_tree().children;
        let target = &root.children;

        let common_prefix = current
            .iter()
            .zip(target.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let remaining_current = current.len() - common_prefix;
        let remaining_target = target.len() - common_prefix;
        let common_suffix = current[common_prefix..]
            .iter()
            .rev()
            .zip(target[common_prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .take(remaining_current.min(remaining_target))
            .count();

        let delete_len = remaining_current - common_suffix;
        let insert = &target[common_prefix..target.len() - common_suffix];
        if delete_len == 0 && insert.is_empty() {
            return;
        }

        let mut txn = self.doc.transact_mut();
        if delete_len > 0 {
            self.fragment
                .remove_range(&mut txn, common_prefix as u32, delete_len as u32);
        }
        for (offset, node) in insert.iter().enumerate() {
            insert_node(&mut txn, &self.fragment, (common_prefix + offset) as u32, node);
        }
    }

    // ==================== Observers ====================

    /// Observe every committed change to the replica.
    ///
    /// The callback receives the incremental update bytes. It runs inside the
    /// transaction commit and must not touch this document.
    pub fn observe_updates<F>(&self, callback: F) -> Result<yrs::Subscription>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.doc
            .observe_update_v1(move |_, event| {
                callback(&event.update);
            })
            .map_err(|e| FolioError::SnapshotApply(format!("Failed to observe updates: {e:?}")))
    }
}

impl Default for BlockDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BlockDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let txn = self.doc.transact();
        f.debug_struct("BlockDoc")
            .field("client_id", &self.doc.client_id())
            .field("top_level_nodes", &self.fragment.len(&txn))
            .finish_non_exhaustive()
    }
}

/// Decode a snapshot into a block tree without touching any live replica.
///
/// This is the read-only path used to compare a stored branch against the
/// document being edited.
pub fn decode_snapshot(snapshot: &[u8]) -> Result<Block> {
    Ok(BlockDoc::from_snapshot(snapshot)?.to_block_tree())
}

/// Merge two snapshots into one containing both histories.
///
/// `target` is imported first and `source` second into a fresh replica. The
/// CRDT merge is commutative and idempotent, so the converged content does
/// not depend on which side is newer. Empty inputs are skipped.
pub fn merge_snapshots(target: &[u8], source: &[u8]) -> Result<Vec<u8>> {
    let doc = BlockDoc::new();
    doc.import(target, UpdateOrigin::Remote)?;
    doc.import(source, UpdateOrigin::Remote)?;
    Ok(doc.export())
}

// ==================== Tree -> Y.Xml ====================

fn insert_node<F: XmlFragment>(txn: &mut TransactionMut, parent: &F, index: u32, node: &Node) {
    match node {
        Node::Block(block) => {
            let element = parent.insert(txn, index, XmlElementPrelim::empty(block.kind.as_str()));
            write_block(txn, &element, block);
        }
        Node::Text(span) => {
            let text = parent.insert(txn, index, XmlTextPrelim::new(""));
            write_spans(txn, &text, std::slice::from_ref(span));
        }
    }
}

fn write_block(txn: &mut TransactionMut, element: &XmlElementRef, block: &Block) {
    for (name, value) in &block.attrs {
        element.insert_attribute(txn, name.as_str(), attr_to_any(value));
    }

    // Consecutive spans share one XmlText, as y-prosemirror stores them.
    let mut index = 0u32;
    let mut run: Vec<TextSpan> = Vec::new();
    for child in &block.children {
        match child {
            Node::Text(span) => run.push(span.clone()),
            Node::Block(child_block) => {
                if !run.is_empty() {
                    let text = element.insert(txn, index, XmlTextPrelim::new(""));
                    write_spans(txn, &text, &run);
                    run.clear();
                    index += 1;
                }
                let child_element =
                    element.insert(txn, index, XmlElementPrelim::empty(child_block.kind.as_str()));
                write_block(txn, &child_element, child_block);
                index += 1;
            }
        }
    }
    if !run.is_empty() {
        let text = element.insert(txn, index, XmlTextPrelim::new(""));
        write_spans(txn, &text, &run);
    }
}

fn write_spans(txn: &mut TransactionMut, text: &XmlTextRef, spans: &[TextSpan]) {
    let mut previous: Vec<&str> = Vec::new();
    for span in spans {
        if span.text.is_empty() {
            continue;
        }
        let mut attrs: YAttrs = HashMap::new();
        for mark in &span.marks {
            attrs.insert(Arc::from(mark.kind.as_str()), mark_to_any(mark));
        }
        // Explicit nulls stop the previous run's formatting from extending.
        for name in &previous {
            if !span.marks.iter().any(|m| m.kind == *name) {
                attrs.insert(Arc::from(*name), Any::Null);
            }
        }
        let index = text.len(&*txn);
        text.insert_with_attributes(txn, index, &span.text, attrs);
        previous = span.marks.iter().map(|m| m.kind.as_str()).collect();
    }
}

fn attr_to_any(value: &AttrValue) -> Any {
    match value {
        AttrValue::Null => Any::Null,
        AttrValue::Bool(b) => Any::Bool(*b),
        AttrValue::Number(n) => n.as_f64().map(Any::Number).unwrap_or(Any::Null),
        AttrValue::String(s) => Any::String(Arc::from(s.as_str())),
    }
}

fn mark_to_any(mark: &Mark) -> Any {
    if mark.attrs.is_empty() {
        return Any::Bool(true);
    }
    let map: HashMap<String, Any> = mark
        .attrs
        .iter()
        .map(|(k, v)| (k.clone(), attr_to_any(v)))
        .collect();
    Any::Map(Arc::new(map))
}

// ==================== Y.Xml -> Tree ====================

fn read_children<F: XmlFragment, T: ReadTxn>(txn: &T, parent: &F) -> Vec<Node> {
    let mut nodes = Vec::new();
    for index in 0..parent.len(txn) {
        match parent.get(txn, index) {
            Some(XmlOut::Element(element)) => nodes.push(Node::Block(read_element(txn, &element))),
            Some(XmlOut::Text(text)) => nodes.extend(read_text(txn, &text).into_iter().map(Node::Text)),
            Some(XmlOut::Fragment(fragment)) => nodes.extend(read_children(txn, &fragment)),
            None => {}
        }
    }
    nodes
}

fn read_element<T: ReadTxn>(txn: &T, element: &XmlElementRef) -> Block {
    let mut block = Block::new(element.tag().to_string());
    for (name, value) in element.attributes(txn) {
        block.attrs.insert(name.to_string(), attr_from_out(txn, value));
    }
    block.children = read_children(txn, element);
    block
}

fn read_text<T: ReadTxn>(txn: &T, text: &XmlTextRef) -> Vec<TextSpan> {
    text.diff(txn, YChange::identity)
        .into_iter()
        .filter_map(|chunk| {
            let content = match chunk.insert {
                Out::Any(Any::String(s)) => s.to_string(),
                _ => return None,
            };
            let marks = chunk
                .attributes
                .map(|attrs| marks_from_attrs(&attrs))
                .unwrap_or_default();
            Some(TextSpan::marked(content, marks))
        })
        .collect()
}

fn marks_from_attrs(attrs: &YAttrs) -> Vec<Mark> {
    let mut marks: Vec<Mark> = attrs
        .iter()
        .filter_map(|(name, value)| match value {
            Any::Null | Any::Undefined | Any::Bool(false) => None,
            Any::Map(map) => {
                let attrs: Attrs = map
                    .iter()
                    .map(|(k, v)| (k.clone(), attr_from_any(v)))
                    .collect();
                Some(Mark {
                    kind: name.to_string(),
                    attrs,
                })
            }
            _ => Some(Mark::new(name.to_string())),
        })
        .collect();
    marks.sort_by(|a, b| a.kind.cmp(&b.kind));
    marks
}

fn attr_from_out<T: ReadTxn>(txn: &T, value: Out) -> AttrValue {
    match value {
        Out::Any(any) => attr_from_any(&any),
        other => AttrValue::String(other.to_string(txn)),
    }
}

fn attr_from_any(value: &Any) -> AttrValue {
    match value {
        Any::Null | Any::Undefined => AttrValue::Null,
        Any::Bool(b) => AttrValue::Bool(*b),
        Any::Number(n) => AttrValue::from_f64(*n),
        Any::BigInt(i) => AttrValue::from(*i),
        Any::String(s) => AttrValue::String(s.to_string()),
        other => AttrValue::String(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> Block {
        Block::doc(vec![
            Block::heading(2, "Title"),
            Block::new(kind::PARAGRAPH)
                .with_text(TextSpan::marked("Bold", vec![Mark::new("bold")]))
                .with_text(TextSpan::plain(" and "))
                .with_text(TextSpan::marked("link", vec![Mark::link("https://example.com")])),
            Block::new(kind::BULLET_LIST)
                .with_child(Block::new(kind::LIST_ITEM).with_child(Block::paragraph("item"))),
            Block::new(kind::HORIZONTAL_RULE),
        ])
    }

    #[test]
    fn test_new_doc_is_empty() {
        let doc = BlockDoc::new();
        assert!(doc.is_empty());
        assert_eq!(doc.to_block_tree(), Block::doc(vec![]));
    }

    #[test]
    fn test_projection_round_trip() {
        let doc = BlockDoc::new();
        let tree = sample_doc();
        doc.replace_blocks(&tree);

        assert!(!doc.is_empty());
        assert_eq!(doc.to_block_tree(), tree);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let doc = BlockDoc::new();
        doc.replace_blocks(&sample_doc());

        let decoded = decode_snapshot(&doc.export()).unwrap();
        assert_eq!(decoded, sample_doc());
    }

    #[test]
    fn test_replace_blocks_keeps_unchanged_prefix() {
        let doc = BlockDoc::new();
        doc.replace_blocks(&Block::doc(vec![
            Block::paragraph("A"),
            Block::paragraph("B"),
            Block::paragraph("C"),
        ]));

        let edited = Block::doc(vec![
            Block::paragraph("A"),
            Block::paragraph("B2"),
            Block::paragraph("C"),
        ]);
        doc.replace_blocks(&edited);
        assert_eq!(doc.to_block_tree(), edited);

        // No-op edit produces no update
        let before = doc.export();
        doc.replace_blocks(&edited);
        assert_eq!(doc.export(), before);
    }

    #[test]
    fn test_malformed_snapshot_keeps_state() {
        let doc = BlockDoc::new();
        doc.replace_blocks(&Block::doc(vec![Block::paragraph("keep me")]));

        let err = doc
            .import(&[0xFF, 0x13, 0x37, 0x00, 0x42], UpdateOrigin::Remote)
            .unwrap_err();
        assert!(err.is_snapshot_error());
        assert_eq!(doc.to_block_tree().text_content(), "keep me");
    }

    #[test]
    fn test_corrupted_export_is_rejected_before_decode() {
        let source = BlockDoc::new();
        source.replace_blocks(&sample_doc());
        let snapshot = source.export();

        let target = BlockDoc::new();
        target.replace_blocks(&Block::doc(vec![Block::paragraph("keep me")]));

        // Flip bits across the yrs payload, including string content
        for index in (FRAME_HEADER_SIZE..snapshot.len()).step_by(3) {
            let mut corrupted = snapshot.clone();
            corrupted[index] ^= 0x5A;
            let err = target.import(&corrupted, UpdateOrigin::Remote).unwrap_err();
            assert!(err.is_snapshot_error());
        }

        // Every truncation, header included
        for len in 1..snapshot.len() {
            let err = target
                .import(&snapshot[..len], UpdateOrigin::Remote)
                .unwrap_err();
            assert!(err.is_snapshot_error());
        }

        assert!(decode_snapshot(&snapshot[..snapshot.len() / 2]).is_err());
        assert_eq!(target.to_block_tree().text_content(), "keep me");
    }

    #[test]
    fn test_export_carries_frame() {
        let doc = BlockDoc::new();
        doc.replace_blocks(&Block::doc(vec![Block::paragraph("framed")]));
        let snapshot = doc.export();

        assert_eq!(snapshot[0..4], SNAPSHOT_MAGIC);
        let payload = unframe_snapshot(&snapshot).unwrap();
        assert_eq!(payload.len(), snapshot.len() - FRAME_HEADER_SIZE);
    }

    #[test]
    fn test_empty_import_is_skipped() {
        let doc = BlockDoc::new();
        doc.import(&[], UpdateOrigin::Remote).unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_merge_contains_both_histories() {
        let base = BlockDoc::new();
        base.replace_blocks(&Block::doc(vec![Block::paragraph("shared")]));
        let base_snapshot = base.export();

        let left = BlockDoc::from_snapshot(&base_snapshot).unwrap();
        left.replace_blocks(&Block::doc(vec![
            Block::paragraph("shared"),
            Block::paragraph("from left"),
        ]));
        let right = BlockDoc::from_snapshot(&base_snapshot).unwrap();
        right.replace_blocks(&Block::doc(vec![
            Block::heading(1, "from right"),
            Block::paragraph("shared"),
        ]));

        let merged = decode_snapshot(&merge_snapshots(&left.export(), &right.export()).unwrap())
            .unwrap();
        let text = merged.text_content();
        assert!(text.contains("shared"));
        assert!(text.contains("from left"));
        assert!(text.contains("from right"));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = BlockDoc::new();
        a.replace_blocks(&Block::doc(vec![Block::paragraph("alpha")]));
        let b = BlockDoc::new();
        b.replace_blocks(&Block::doc(vec![Block::paragraph("beta")]));

        let ab = decode_snapshot(&merge_snapshots(&a.export(), &b.export()).unwrap()).unwrap();
        let ba = decode_snapshot(&merge_snapshots(&b.export(), &a.export()).unwrap()).unwrap();
        assert_eq!(ab, ba);

        // Merging a snapshot with itself changes nothing
        let aa = decode_snapshot(&merge_snapshots(&a.export(), &a.export()).unwrap()).unwrap();
        assert_eq!(aa, a.to_block_tree());
    }

    #[test]
    fn test_merge_skips_empty_inputs() {
        let a = BlockDoc::new();
        a.replace_blocks(&Block::doc(vec![Block::paragraph("only")]));

        let merged = merge_snapshots(&[], &a.export()).unwrap();
        assert_eq!(decode_snapshot(&merged).unwrap(), a.to_block_tree());
    }

    #[test]
    fn test_observer_fires_on_change() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let doc = BlockDoc::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let _sub = doc
            .observe_updates(move |_update| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        doc.replace_blocks(&Block::doc(vec![Block::paragraph("Trigger change")]));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
