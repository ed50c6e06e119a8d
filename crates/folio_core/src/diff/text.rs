//! Character-level text diff.
//!
//! Uses the `similar` crate (Myers diff algorithm) for the raw edit script,
//! then a semantic cleanup pass that folds short equalities sandwiched between
//! edits into those edits. The result favours a few long, readable edits over
//! minimal but fragmented ones.

use std::time::Duration;

use similar::{Algorithm, ChangeTag};

use super::{TextDiff, TextDiffKind};

/// Upper bound on Myers search time; past it `similar` falls back to a
/// coarser (still correct) script.
const DIFF_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    op: Op,
    text: String,
}

impl Segment {
    fn new(op: Op, text: String) -> Self {
        Self { op, text }
    }

    fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Compute the character-level diff between `left` and `right`.
///
/// Deletes carry offsets into `left`, inserts carry offsets into `right`, and
/// spans are emitted in scan order. Total over all inputs.
pub fn diff_text(left: &str, right: &str) -> Vec<TextDiff> {
    if left == right {
        return Vec::new();
    }

    let mut segments = myers_segments(left, right);
    cleanup_semantic(&mut segments);

    let mut diffs = Vec::new();
    let mut left_pos = 0;
    let mut right_pos = 0;

    for segment in segments {
        let len = segment.char_len();
        match segment.op {
            Op::Equal => {
                left_pos += len;
                right_pos += len;
            }
            Op::Delete => {
                diffs.push(TextDiff {
                    start: left_pos,
                    end: left_pos + len,
                    kind: TextDiffKind::Delete,
                    content: segment.text,
                });
                left_pos += len;
            }
            Op::Insert => {
                diffs.push(TextDiff {
                    start: right_pos,
                    end: right_pos + len,
                    kind: TextDiffKind::Insert,
                    content: segment.text,
                });
                right_pos += len;
            }
        }
    }

    diffs
}

fn myers_segments(left: &str, right: &str) -> Vec<Segment> {
    let diff = similar::TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .timeout(DIFF_TIMEOUT)
        .diff_chars(left, right);

    let mut segments = Vec::new();
    for change in diff.iter_all_changes() {
        let op = match change.tag() {
            ChangeTag::Equal => Op::Equal,
            ChangeTag::Delete => Op::Delete,
            ChangeTag::Insert => Op::Insert,
        };
        push_segment(&mut segments, op, change.value());
    }
    segments
}

/// Append text to the script, extending the last segment when the op matches.
fn push_segment(segments: &mut Vec<Segment>, op: Op, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(last) = segments.last_mut()
        && last.op == op
    {
        last.text.push_str(text);
        return;
    }
    segments.push(Segment::new(op, text.to_string()));
}

/// Fold equalities that are no longer than the edits on both sides of them
/// into those edits.
fn cleanup_semantic(segments: &mut Vec<Segment>) {
    let mut equalities: Vec<usize> = Vec::new();
    let mut last_equality: Option<usize> = None;
    let mut inserted_before = 0;
    let mut deleted_before = 0;
    let mut inserted_after = 0;
    let mut deleted_after = 0;
    let mut pointer = 0;

    while pointer < segments.len() {
        let segment = &segments[pointer];
        if segment.op == Op::Equal {
            equalities.push(pointer);
            inserted_before = inserted_after;
            deleted_before = deleted_after;
            inserted_after = 0;
            deleted_after = 0;
            last_equality = Some(segment.char_len());
            pointer += 1;
            continue;
        }

        if segment.op == Op::Insert {
            inserted_after += segment.char_len();
        } else {
            deleted_after += segment.char_len();
        }

        let swallow = last_equality.is_some_and(|len| {
            len <= inserted_before.max(deleted_before) && len <= inserted_after.max(deleted_after)
        });

        if swallow && let Some(index) = equalities.pop() {
            let text = std::mem::take(&mut segments[index].text);
            segments[index] = Segment::new(Op::Delete, text.clone());
            segments.insert(index + 1, Segment::new(Op::Insert, text));

            // The previous equality needs re-evaluation against the new edits.
            equalities.pop();
            pointer = equalities.last().map_or(0, |&p| p + 1);
            inserted_before = 0;
            deleted_before = 0;
            inserted_after = 0;
            deleted_after = 0;
            last_equality = None;
            continue;
        }

        pointer += 1;
    }

    cleanup_merge(segments);
}

/// Coalesce each run of edits between equalities into one delete followed by
/// one insert, moving any shared prefix/suffix into the neighbouring equalities.
fn cleanup_merge(segments: &mut Vec<Segment>) {
    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    let mut deleted = String::new();
    let mut inserted = String::new();

    for segment in segments.drain(..) {
        match segment.op {
            Op::Delete => deleted.push_str(&segment.text),
            Op::Insert => inserted.push_str(&segment.text),
            Op::Equal => {
                let suffix = flush_edits(&mut merged, &mut deleted, &mut inserted);
                push_segment(&mut merged, Op::Equal, &suffix);
                push_segment(&mut merged, Op::Equal, &segment.text);
            }
        }
    }
    let suffix = flush_edits(&mut merged, &mut deleted, &mut inserted);
    push_segment(&mut merged, Op::Equal, &suffix);

    *segments = merged;
}

/// Emit pending edits and return the common suffix that belongs to the next
/// equality.
fn flush_edits(out: &mut Vec<Segment>, deleted: &mut String, inserted: &mut String) -> String {
    let mut suffix = String::new();

    if !deleted.is_empty() && !inserted.is_empty() {
        let prefix_len = common_prefix_len(deleted, inserted);
        if prefix_len > 0 {
            push_segment(out, Op::Equal, &deleted[..prefix_len]);
            deleted.drain(..prefix_len);
            inserted.drain(..prefix_len);
        }

        let suffix_len = common_suffix_len(deleted, inserted);
        if suffix_len > 0 {
            suffix = deleted[deleted.len() - suffix_len..].to_string();
            deleted.truncate(deleted.len() - suffix_len);
            inserted.truncate(inserted.len() - suffix_len);
        }
    }

    push_segment(out, Op::Delete, deleted);
    push_segment(out, Op::Insert, inserted);
    deleted.clear();
    inserted.clear();
    suffix
}

/// Byte length of the longest common char prefix.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .take_while(|((_, ca), cb)| ca == cb)
        .last()
        .map_or(0, |((i, c), _)| i + c.len_utf8())
}

/// Byte length of the longest common char suffix.
fn common_suffix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .rev()
        .zip(b.chars().rev())
        .take_while(|((_, ca), cb)| ca == cb)
        .last()
        .map_or(0, |((i, _), _)| a.len() - i)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Remove every delete from `left` and splice every insert into the result.
    fn replay(left: &str, diffs: &[TextDiff]) -> String {
        let mut chars: Vec<char> = left.chars().collect();
        for diff in diffs.iter().rev().filter(|d| d.kind == TextDiffKind::Delete) {
            chars.drain(diff.start..diff.end);
        }
        for diff in diffs.iter().filter(|d| d.kind == TextDiffKind::Insert) {
            let insert: Vec<char> = diff.content.chars().collect();
            chars.splice(diff.start..diff.start, insert);
        }
        chars.into_iter().collect()
    }

    #[test]
    fn test_append_is_single_insert() {
        let diffs = diff_text("Hello", "Hello world");
        assert_eq!(
            diffs,
            vec![TextDiff {
                start: 5,
                end: 11,
                kind: TextDiffKind::Insert,
                content: " world".to_string(),
            }]
        );
    }

    #[test]
    fn test_truncate_is_single_delete() {
        let diffs = diff_text("Hello world", "Hello");
        assert_eq!(
            diffs,
            vec![TextDiff {
                start: 5,
                end: 11,
                kind: TextDiffKind::Delete,
                content: " world".to_string(),
            }]
        );
    }

    #[test]
    fn test_empty_inputs() {
        assert!(diff_text("", "").is_empty());

        let diffs = diff_text("", "X");
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, TextDiffKind::Insert);
        assert_eq!((diffs[0].start, diffs[0].end), (0, 1));

        let diffs = diff_text("X", "");
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, TextDiffKind::Delete);
    }

    #[test]
    fn test_replay_reconstructs_destination() {
        let cases = [
            ("The quick brown fox", "The slow brown dog"),
            ("abcdef", "azcyef"),
            ("kitten", "sitting"),
            ("Hello", "Hello!"),
            ("same", "same"),
            ("", "brand new"),
            ("gone entirely", ""),
            ("naïve café", "naive cafe"),
            ("line one\nline two", "line one\nline 2\nline three"),
        ];

        for (left, right) in cases {
            let diffs = diff_text(left, right);
            assert_eq!(replay(left, &diffs), right, "diff of {:?} -> {:?}", left, right);
        }
    }

    #[test]
    fn test_semantic_cleanup_avoids_fragmentation() {
        // Raw Myers interleaves the shared letters; cleanup yields one replacement.
        let diffs = diff_text("mouse", "sofas");
        assert!(diffs.len() <= 2, "got fragmented diff: {:?}", diffs);
        assert_eq!(replay("mouse", &diffs), "sofas");
    }

    #[test]
    fn test_deletes_precede_inserts_at_same_spot() {
        let diffs = diff_text("a cat sat", "a dog sat");
        let kinds: Vec<TextDiffKind> = diffs.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![TextDiffKind::Delete, TextDiffKind::Insert]);
        assert_eq!(diffs[0].content, "cat");
        assert_eq!(diffs[1].content, "dog");
        assert_eq!(diffs[0].start, 2);
        assert_eq!(diffs[1].start, 2);
    }

    #[test]
    fn test_offsets_count_chars_not_bytes() {
        let diffs = diff_text("café", "café!");
        assert_eq!(diffs.len(), 1);
        assert_eq!((diffs[0].start, diffs[0].end), (4, 5));
    }
}
