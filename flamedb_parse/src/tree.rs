//! The canonical call tree every wire format decodes into.
//!
//! Each node owns its children, keyed by frame label, and carries the number
//! of samples whose stack ends exactly at that node (its *self* count).
//! Nodes only exist on paths that carry samples, so two trees holding the
//! same samples are structurally equal.
//!
//! Stacks can be arbitrarily deep, so nothing here recurses per level:
//! cloning, dropping, comparing, merging and (de)serializing all run over
//! explicit work lists. Serialized trees are a flat pre-order list of
//! `(label, self_count, children)` records.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::mem;

/// Separator between frames in a joined stack string.
pub const SEPARATOR: char = ';';

/// A node in a [`ProfileTree`].
#[derive(Default)]
pub struct Node {
    self_count: u64,
    children: BTreeMap<String, Node>,
}

impl Node {
    fn with_count(self_count: u64) -> Self {
        Self {
            self_count,
            children: BTreeMap::new(),
        }
    }

    /// Samples whose stack terminates at this node.
    pub fn self_count(&self) -> u64 {
        self.self_count
    }

    /// Samples in this node's subtree, this node included.
    pub fn total(&self) -> u64 {
        self.preorder("")
            .fold(0u64, |total, (_, node)| total.saturating_add(node.self_count))
    }

    /// Children in label order.
    pub fn children(&self) -> impl DoubleEndedIterator<Item = (&str, &Node)> {
        self.children.iter().map(|(label, node)| (label.as_str(), node))
    }

    /// Look up a direct child by label.
    pub fn child(&self, label: &str) -> Option<&Node> {
        self.children.get(label)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Every node of this subtree, parents before children and siblings in
    /// label order, paired with the label of the edge above it.
    fn preorder<'a>(&'a self, label: &'a str) -> Preorder<'a> {
        Preorder {
            pending: vec![(label, self)],
        }
    }

    /// The subtree as flat pre-order records.
    fn records<'a>(&'a self, label: &'a str) -> impl Iterator<Item = Record<&'a str>> {
        self.preorder(label).map(|(label, node)| Record {
            label,
            self_count: node.self_count,
            children: node.children.len() as u64,
        })
    }

    /// Rebuild a subtree from pre-order records. The first record is the
    /// subtree root and its label is ignored.
    fn from_records<I>(records: I) -> Result<Node, &'static str>
    where
        I: IntoIterator<Item = Record<String>>,
    {
        let mut records = records.into_iter();
        let root = records.next().ok_or("missing root node")?;

        // Open nodes: edge label, node, children still to attach.
        let mut open = vec![(String::new(), Node::with_count(root.self_count), root.children)];

        loop {
            while let Some((_, _, 0)) = open.last() {
                let Some((label, node, _)) = open.pop() else {
                    break;
                };
                match open.last_mut() {
                    Some((_, parent, _)) => {
                        parent.children.insert(label, node);
                    }
                    None if records.next().is_none() => return Ok(node),
                    None => return Err("trailing records after root node"),
                }
            }

            let record = records.next().ok_or("missing child records")?;
            if let Some((_, _, left)) = open.last_mut() {
                *left -= 1;
            }
            open.push((record.label, Node::with_count(record.self_count), record.children));
        }
    }

    fn merge_from(&mut self, other: Node) {
        let mut pending = vec![(self, other)];

        while let Some((into, mut from)) = pending.pop() {
            into.self_count = into.self_count.saturating_add(from.self_count);

            let mut overlap = BTreeMap::new();
            for (label, child) in mem::take(&mut from.children) {
                if into.children.contains_key(&label) {
                    overlap.insert(label, child);
                } else {
                    into.children.insert(label, child);
                }
            }
            if overlap.is_empty() {
                continue;
            }
            for (label, existing) in into.children.iter_mut() {
                if let Some(child) = overlap.remove(label) {
                    pending.push((existing, child));
                }
            }
        }
    }

    fn merge_from_ref(&mut self, other: &Node) {
        let mut pending = vec![(self, other)];

        while let Some((into, from)) = pending.pop() {
            into.self_count = into.self_count.saturating_add(from.self_count);

            let mut shared = BTreeMap::new();
            for (label, child) in &from.children {
                if into.children.contains_key(label) {
                    shared.insert(label.as_str(), child);
                } else {
                    into.children.insert(label.clone(), child.clone());
                }
            }
            if shared.is_empty() {
                continue;
            }
            for (label, existing) in into.children.iter_mut() {
                if let Some(child) = shared.remove(label.as_str()) {
                    pending.push((existing, child));
                }
            }
        }
    }
}

impl Clone for Node {
    fn clone(&self) -> Self {
        let records = self.records("").map(|record| Record {
            label: record.label.to_owned(),
            self_count: record.self_count,
            children: record.children,
        });
        // Records walked from a live node always rebuild.
        Node::from_records(records).unwrap_or_default()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let mut pending: Vec<Node> = mem::take(&mut self.children).into_values().collect();
        while let Some(mut node) = pending.pop() {
            pending.extend(mem::take(&mut node.children).into_values());
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.records("").eq(other.records(""))
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("self_count", &self.self_count)
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Pre-order iterator over a subtree.
struct Preorder<'a> {
    pending: Vec<(&'a str, &'a Node)>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = (&'a str, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let (label, node) = self.pending.pop()?;
        self.pending
            .extend(node.children.iter().rev().map(|(label, child)| (label.as_str(), child)));
        Some((label, node))
    }
}

/// One node of a flattened tree.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Record<L> {
    label: L,
    self_count: u64,
    children: u64,
}

/// Aggregated sample counts organized by call path.
///
/// # Example
///
/// ```
/// use flamedb_parse::ProfileTree;
///
/// let mut tree = ProfileTree::new();
/// tree.insert(["foo", "bar"], 2);
/// tree.insert(["foo", "baz"], 3);
///
/// assert_eq!(tree.total(), 5);
/// assert_eq!(tree.serialize_human(), "\"foo;bar\" 2\n\"foo;baz\" 3\n");
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProfileTree {
    root: Node,
}

impl ProfileTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// The root node. Its label is empty and its self count is always zero.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Add `count` samples to the stack described by `path` (root first).
    ///
    /// Missing nodes along the path are created. A zero count or an empty
    /// path leaves the tree unchanged. Labels should be non-empty and must
    /// not contain [`SEPARATOR`]; the decoders enforce this before calling.
    pub fn insert<I, S>(&mut self, path: I, count: u64)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if count == 0 {
            return;
        }

        let mut path = path.into_iter().peekable();
        if path.peek().is_none() {
            return;
        }

        let mut node = &mut self.root;
        for label in path {
            node = node.children.entry(label.as_ref().to_owned()).or_default();
        }
        node.self_count = node.self_count.saturating_add(count);
    }

    /// Add `count` samples to a `;`-joined stack.
    pub fn insert_stack(&mut self, stack: &str, count: u64) {
        self.insert(stack.split(SEPARATOR), count);
    }

    /// Structural union: every self count in `other` is added to the node
    /// at the same path in `self`.
    pub fn merge(&mut self, other: ProfileTree) {
        self.root.merge_from(other.root);
    }

    /// Like [`merge`](Self::merge) but leaves `other` intact.
    pub fn merge_ref(&mut self, other: &ProfileTree) {
        self.root.merge_from_ref(&other.root);
    }

    /// Total number of samples in the tree.
    pub fn total(&self) -> u64 {
        self.root.total()
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Number of distinct stacks with a non-zero self count.
    pub fn stack_count(&self) -> usize {
        self.root
            .preorder("")
            .filter(|(_, node)| node.self_count > 0)
            .count()
    }

    /// Every stack with a non-zero self count as `(joined path, count)`,
    /// sorted by joined path.
    pub fn stacks(&self) -> Vec<(String, u64)> {
        enum Step<'a> {
            Enter(&'a str, &'a Node, bool),
            Leave(usize),
        }

        let mut out = Vec::new();
        // Joined path of the node being visited, shared by the whole walk.
        let mut path = String::new();
        let mut pending: Vec<Step> = self
            .root
            .children()
            .rev()
            .map(|(label, node)| Step::Enter(label, node, true))
            .collect();

        while let Some(step) = pending.pop() {
            match step {
                Step::Leave(len) => path.truncate(len),
                Step::Enter(label, node, top) => {
                    let len = path.len();
                    if !top {
                        path.push(SEPARATOR);
                    }
                    path.push_str(label);
                    if node.self_count > 0 {
                        out.push((path.clone(), node.self_count));
                    }
                    pending.push(Step::Leave(len));
                    let children = node.children().rev();
                    pending.extend(children.map(|(label, child)| Step::Enter(label, child, false)));
                }
            }
        }

        out.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Human-readable dump: one `"<joined-path>" <count>` line per stack,
    /// ordered by joined path.
    pub fn serialize_human(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ProfileTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (path, count) in self.stacks() {
            writeln!(f, "\"{}\" {}", path, count)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ProfileTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.stacks()).finish()
    }
}

impl Serialize for ProfileTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let records: Vec<Record<&str>> = self.root.records("").collect();
        records.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProfileTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let records = Vec::<Record<String>>::deserialize(deserializer)?;
        let root = Node::from_records(records).map_err(D::Error::custom)?;
        if root.self_count != 0 {
            return Err(D::Error::custom("root node carries samples"));
        }
        Ok(ProfileTree { root })
    }
}

impl<S: AsRef<str>> FromIterator<(S, u64)> for ProfileTree {
    /// Build a tree from `;`-joined stacks and their counts.
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut tree = ProfileTree::new();
        for (stack, count) in iter {
            tree.insert_stack(stack.as_ref(), count);
        }
        tree
    }
}
