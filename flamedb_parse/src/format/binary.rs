//! Binary tree and trie encodings.
//!
//! Both formats are a pre-order walk of the tree where every node is written
//! as
//!
//! ```text
//! uvarint(label_len) label uvarint(self_count) uvarint(child_count)
//! ```
//!
//! and `uvarint` is unsigned LEB128. In the tree format each edge label is a
//! complete frame. In the trie format an edge label only carries the bytes
//! that extend the parent's key; a node's stack is the concatenation of the
//! labels from the root, split on `;`.
//!
//! Decoding runs a single loop over an explicit stack of pending child
//! counts, so nesting depth is bounded by the payload and never by the call
//! stack.

use super::{Format, Position, Result, check_frame};
use crate::tree::{ProfileTree, SEPARATOR};

// ============================================================================
// Decoding
// ============================================================================

pub(super) fn decode_tree(payload: &[u8]) -> Result<ProfileTree> {
    decode_with(payload, FramePath::default())
}

pub(super) fn decode_trie(payload: &[u8]) -> Result<ProfileTree> {
    decode_with(payload, KeyPath::default())
}

/// Tracks the root-to-current path while the stack machine walks the
/// payload. Errors are reported as static reasons and positioned by the
/// caller.
trait PathBuilder {
    const FORMAT: Format;

    /// Enter the root node.
    fn enter_root(&mut self, label: &[u8]) -> std::result::Result<(), &'static str>;

    /// Descend into a child node.
    fn push(&mut self, label: &[u8]) -> std::result::Result<(), &'static str>;

    /// Return to the parent of the current node.
    fn pop(&mut self);

    /// Add `count` samples at the current node.
    fn record(&self, tree: &mut ProfileTree, count: u64) -> std::result::Result<(), &'static str>;
}

/// Path of whole frames, used by the tree format.
#[derive(Default)]
struct FramePath {
    frames: Vec<String>,
}

impl PathBuilder for FramePath {
    const FORMAT: Format = Format::BinaryTree;

    fn enter_root(&mut self, label: &[u8]) -> std::result::Result<(), &'static str> {
        if label.is_empty() {
            Ok(())
        } else {
            Err("root label must be empty")
        }
    }

    fn push(&mut self, label: &[u8]) -> std::result::Result<(), &'static str> {
        let frame = std::str::from_utf8(label).map_err(|_| "frame is not valid UTF-8")?;
        check_frame(frame)?;
        self.frames.push(frame.to_owned());
        Ok(())
    }

    fn pop(&mut self) {
        self.frames.pop();
    }

    fn record(&self, tree: &mut ProfileTree, count: u64) -> std::result::Result<(), &'static str> {
        tree.insert(&self.frames, count);
        Ok(())
    }
}

/// Accumulated key bytes plus the key length at each level, used by the
/// trie format. Labels may split a multi-byte character, so UTF-8 is only
/// checked once a complete key carries samples.
#[derive(Default)]
struct KeyPath {
    key: Vec<u8>,
    marks: Vec<usize>,
}

impl PathBuilder for KeyPath {
    const FORMAT: Format = Format::BinaryTrie;

    fn enter_root(&mut self, label: &[u8]) -> std::result::Result<(), &'static str> {
        self.key.extend_from_slice(label);
        Ok(())
    }

    fn push(&mut self, label: &[u8]) -> std::result::Result<(), &'static str> {
        if label.is_empty() {
            return Err("empty edge label");
        }
        self.marks.push(self.key.len());
        self.key.extend_from_slice(label);
        Ok(())
    }

    fn pop(&mut self) {
        if let Some(mark) = self.marks.pop() {
            self.key.truncate(mark);
        }
    }

    fn record(&self, tree: &mut ProfileTree, count: u64) -> std::result::Result<(), &'static str> {
        let stack = std::str::from_utf8(&self.key).map_err(|_| "stack is not valid UTF-8")?;
        let frames: Vec<&str> = stack.split(SEPARATOR).collect();
        for frame in &frames {
            check_frame(frame)?;
        }
        tree.insert(frames, count);
        Ok(())
    }
}

/// Cursor over the payload that positions every error it raises.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    format: Format,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], format: Format) -> Self {
        Self {
            buf,
            pos: 0,
            format,
        }
    }

    fn error_at(&self, offset: usize, reason: &str) -> super::DecodeError {
        self.format.malformed(Position::Offset(offset), reason)
    }

    fn uvarint(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut value = 0u64;
        let mut shift = 0u32;

        loop {
            let Some(&byte) = self.buf.get(self.pos) else {
                return Err(self.error_at(self.pos, "unexpected end of input"));
            };
            self.pos += 1;

            if shift == 63 && byte > 1 {
                return Err(self.error_at(start, "varint overflows u64"));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn label(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        let len = self.uvarint()?;
        let remaining = (self.buf.len() - self.pos) as u64;
        if len > remaining {
            return Err(self.error_at(start, "label length exceeds remaining input"));
        }

        let end = self.pos + len as usize;
        let label = &self.buf[self.pos..end];
        self.pos = end;
        Ok(label)
    }

    fn is_done(&self) -> bool {
        self.pos == self.buf.len()
    }
}

fn decode_with<P: PathBuilder>(payload: &[u8], mut path: P) -> Result<ProfileTree> {
    let mut reader = Reader::new(payload, P::FORMAT);
    let mut tree = ProfileTree::new();

    let at = reader.pos;
    let label = reader.label()?;
    path.enter_root(label).map_err(|r| reader.error_at(at, r))?;

    let at = reader.pos;
    if reader.uvarint()? != 0 {
        return Err(reader.error_at(at, "root node carries samples"));
    }

    // Children still to be read, one entry per open node, root first.
    let mut pending = vec![reader.uvarint()?];

    while let Some(left) = pending.last_mut() {
        if *left == 0 {
            pending.pop();
            if !pending.is_empty() {
                path.pop();
            }
            continue;
        }
        *left -= 1;

        let at = reader.pos;
        let label = reader.label()?;
        path.push(label).map_err(|r| reader.error_at(at, r))?;

        let at = reader.pos;
        let count = reader.uvarint()?;
        if count > 0 {
            path.record(&mut tree, count).map_err(|r| reader.error_at(at, r))?;
        }

        let children = reader.uvarint()?;
        if children == 0 {
            path.pop();
        } else {
            pending.push(children);
        }
    }

    if !reader.is_done() {
        return Err(reader.error_at(reader.pos, "trailing bytes after root node"));
    }

    Ok(tree)
}

// ============================================================================
// Encoding
// ============================================================================

fn put_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn put_node(out: &mut Vec<u8>, label: &[u8], count: u64, children: usize) {
    put_uvarint(out, label.len() as u64);
    out.extend_from_slice(label);
    put_uvarint(out, count);
    put_uvarint(out, children as u64);
}

pub(super) fn encode_tree(tree: &ProfileTree) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pending = vec![("", tree.root())];

    while let Some((label, node)) = pending.pop() {
        let children: Vec<_> = node.children().collect();
        put_node(&mut out, label.as_bytes(), node.self_count(), children.len());
        pending.extend(children.into_iter().rev());
    }

    out
}

/// Radix-compress the tree's stacks: every edge is split at the longest
/// common prefix of the keys beneath it.
pub(super) fn encode_trie(tree: &ProfileTree) -> Vec<u8> {
    let stacks = tree.stacks();
    let keys: Vec<(&[u8], u64)> = stacks
        .iter()
        .map(|(stack, count)| (stack.as_bytes(), *count))
        .collect();

    let mut out = Vec::new();
    // (edge label, keys under this node, prefix length consumed by this node)
    let root: &[u8] = &[];
    let mut pending = vec![(root, &keys[..], 0)];

    while let Some((label, group, depth)) = pending.pop() {
        let (count, rest) = match group.first() {
            Some((key, count)) if key.len() == depth => (*count, &group[1..]),
            _ => (0, group),
        };

        let children = split_by_next_byte(rest, depth);
        put_node(&mut out, label, count, children.len());
        pending.extend(children.into_iter().rev());
    }

    out
}

/// Group sorted keys that share `prefix_len` bytes by their next byte, and
/// compute each group's edge label.
fn split_by_next_byte<'k>(
    keys: &'k [(&'k [u8], u64)],
    prefix_len: usize,
) -> Vec<(&'k [u8], &'k [(&'k [u8], u64)], usize)> {
    let mut groups = Vec::new();
    let mut start = 0;

    while start < keys.len() {
        let byte = keys[start].0[prefix_len];
        let mut end = start + 1;
        while end < keys.len() && keys[end].0[prefix_len] == byte {
            end += 1;
        }

        let first = keys[start].0;
        let last = keys[end - 1].0;
        let lcp = first
            .iter()
            .zip(last)
            .take_while(|(a, b)| a == b)
            .count();

        groups.push((&first[prefix_len..lcp], &keys[start..end], lcp));
        start = end;
    }

    groups
}
