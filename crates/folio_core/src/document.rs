//! Tree-structured rich-text document model.
//!
//! A document is a single root [`Block`] of kind `"doc"` whose direct children
//! are block nodes (paragraphs, headings, lists, ...). Text lives only in leaf
//! [`TextSpan`]s, each carrying a string and a set of formatting [`Mark`]s.
//!
//! The serde shape follows the ProseMirror JSON layout (`type`, `attrs`,
//! `content`, `text`, `marks`), so editor JSON can be read directly:
//!
//! ```ignore
//! use folio_core::document::Block;
//!
//! let doc = Block::from_json_str(
//!     r#"{"type":"doc","content":[{"type":"paragraph","content":[{"type":"text","text":"Hi"}]}]}"#,
//! )?;
//! assert_eq!(doc.text_content(), "Hi");
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::Result;

/// Well-known block and inline node kinds.
pub mod kind {
    /// Root node of every document
    pub const DOC: &str = "doc";
    /// Plain paragraph
    pub const PARAGRAPH: &str = "paragraph";
    /// Heading, with a numeric `level` attribute
    pub const HEADING: &str = "heading";
    /// Unordered list (children are list items)
    pub const BULLET_LIST: &str = "bulletList";
    /// Ordered list (children are list items)
    pub const ORDERED_LIST: &str = "orderedList";
    /// Item of a bullet or ordered list
    pub const LIST_ITEM: &str = "listItem";
    /// Block quotation
    pub const BLOCKQUOTE: &str = "blockquote";
    /// Fenced code block
    pub const CODE_BLOCK: &str = "codeBlock";
    /// Image (leaf)
    pub const IMAGE: &str = "image";
    /// Horizontal rule (leaf)
    pub const HORIZONTAL_RULE: &str = "horizontalRule";
    /// Inline hard break (leaf)
    pub const HARD_BREAK: &str = "hardBreak";
}

/// A scalar attribute value on a block or mark.
///
/// Integral floats are normalized on deserialization, so `2.0` and `2`
/// compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum AttrValue {
    /// JSON null
    Null,
    /// Boolean flag
    Bool(bool),
    /// Numeric value; integral floats are normalized to integers
    Number(serde_json::Number),
    /// String value
    String(String),
}

impl AttrValue {
    /// Build a numeric value from a float, normalizing integral values so that
    /// `2.0` read back from a replica compares equal to an authored `2`.
    pub fn from_f64(value: f64) -> Self {
        if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
            return AttrValue::Number(serde_json::Number::from(value as i64));
        }
        serde_json::Number::from_f64(value)
            .map(AttrValue::Number)
            .unwrap_or(AttrValue::Null)
    }

    fn from_number(n: serde_json::Number) -> Self {
        if n.is_f64()
            && let Some(value) = n.as_f64()
        {
            return Self::from_f64(value);
        }
        AttrValue::Number(n)
    }

    /// Numeric view of the value, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for AttrValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Null,
            Bool(bool),
            Number(serde_json::Number),
            String(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Null => AttrValue::Null,
            Raw::Bool(b) => AttrValue::Bool(b),
            Raw::Number(n) => AttrValue::from_number(n),
            Raw::String(s) => AttrValue::String(s),
        })
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Number(serde_json::Number::from(value))
    }
}

/// Attribute map of a block or mark, ordered by name.
pub type Attrs = BTreeMap<String, AttrValue>;

/// A formatting annotation on a text span (bold, italic, link, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Mark {
    /// Mark kind, e.g. `"bold"` or `"link"`
    #[serde(rename = "type")]
    pub kind: String,

    /// Mark attributes, e.g. `href` for links
    #[serde(default)]
    pub attrs: Attrs,
}

impl Mark {
    /// A mark without attributes.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attrs: Attrs::new(),
        }
    }

    /// A link mark pointing at `href`.
    pub fn link(href: &str) -> Self {
        let mut attrs = Attrs::new();
        attrs.insert("href".to_string(), AttrValue::from(href));
        Self {
            kind: "link".to_string(),
            attrs,
        }
    }
}

/// Node type tag of a text span; serializes as `"text"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum TextKind {
    /// Inline text
    #[default]
    #[serde(rename = "text")]
    Text,
}

/// Leaf text run with its formatting marks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TextSpan {
    /// Node type, always `"text"`
    #[serde(rename = "type", default)]
    pub kind: TextKind,

    /// The text content
    pub text: String,

    /// Formatting marks applied to the whole run
    #[serde(default)]
    pub marks: Vec<Mark>,
}

impl TextSpan {
    /// Unformatted text.
    pub fn plain(text: impl Into<String>) -> Self {
        Self::marked(text, Vec::new())
    }

    /// Text carrying the given marks.
    pub fn marked(text: impl Into<String>, marks: Vec<Mark>) -> Self {
        Self {
            kind: TextKind::Text,
            text: text.into(),
            marks,
        }
    }
}

/// A child of a block: either a nested block or a text span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum Node {
    /// Leaf text run
    Text(TextSpan),
    /// Nested block
    Block(Block),
}

/// One structural unit of a document (paragraph, heading, list item, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Block {
    /// Block kind, see [`kind`]
    #[serde(rename = "type")]
    pub kind: String,

    /// Scalar attributes, e.g. heading `level`
    #[serde(default)]
    pub attrs: Attrs,

    /// Ordered child blocks and text spans
    #[serde(default, rename = "content")]
    pub children: Vec<Node>,
}

impl Block {
    /// An empty block of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attrs: Attrs::new(),
            children: Vec::new(),
        }
    }

    /// A root document containing `blocks`.
    pub fn doc(blocks: Vec<Block>) -> Self {
        Self {
            kind: kind::DOC.to_string(),
            attrs: Attrs::new(),
            children: blocks.into_iter().map(Node::Block).collect(),
        }
    }

    /// A paragraph holding one plain text run (no run when `text` is empty).
    pub fn paragraph(text: &str) -> Self {
        let block = Self::new(kind::PARAGRAPH);
        if text.is_empty() {
            block
        } else {
            block.with_text(TextSpan::plain(text))
        }
    }

    /// A heading of the given level holding one plain text run.
    pub fn heading(level: i64, text: &str) -> Self {
        let block = Self::new(kind::HEADING).with_attr("level", level);
        if text.is_empty() {
            block
        } else {
            block.with_text(TextSpan::plain(text))
        }
    }

    /// Set an attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Append a text span.
    pub fn with_text(mut self, span: TextSpan) -> Self {
        self.children.push(Node::Text(span));
        self
    }

    /// Append a child block.
    pub fn with_child(mut self, block: Block) -> Self {
        self.children.push(Node::Block(block));
        self
    }

    /// Concatenate all descendant text in document order, ignoring marks.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    /// Whether this is a text-bearing block kind (paragraph or heading).
    pub fn is_text_block(&self) -> bool {
        self.kind == kind::PARAGRAPH || self.kind == kind::HEADING
    }

    /// Whether this kind never has content (images, rules, hard breaks).
    pub fn is_leaf(&self) -> bool {
        matches!(
            self.kind.as_str(),
            kind::IMAGE | kind::HORIZONTAL_RULE | kind::HARD_BREAK
        )
    }

    /// Direct child blocks, skipping text spans.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.children.iter().filter_map(|child| match child {
            Node::Block(block) => Some(block),
            Node::Text(_) => None,
        })
    }

    /// Parse a block tree from ProseMirror-style JSON.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Parse a block tree from a ProseMirror-style JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize this tree to a JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn collect_text(children: &[Node], out: &mut String) {
    for child in children {
        match child {
            Node::Text(span) => out.push_str(&span.text),
            Node::Block(block) => collect_text(&block.children, out),
        }
    }
}
