//! Render a [`ProfileTree`] in the "flamebearer" layout flamegraph front ends
//! consume.
//!
//! Each level is a flat list of 4-tuples `[x_delta, total, self, name]`,
//! where `x_delta` is the gap between the end of the previous bar on the same
//! level and the start of this one, and `name` indexes into `names`.
//!
//! # Example
//!
//! ```
//! use flamedb::Flamebearer;
//! use flamedb_parse::ProfileTree;
//!
//! let tree = ProfileTree::from_iter([("foo;bar", 2), ("foo;baz", 3)]);
//! let fb = Flamebearer::from_tree(&tree);
//!
//! assert_eq!(fb.names, ["total", "foo", "bar", "baz"]);
//! assert_eq!(fb.levels[2], [0, 2, 2, 2, 0, 3, 3, 3]);
//! ```

use flamedb_parse::{Node, ProfileTree};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name given to the synthetic root bar.
pub const ROOT_NAME: &str = "total";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flamebearer {
    pub names: Vec<String>,
    pub levels: Vec<Vec<u64>>,
    pub num_ticks: u64,
    pub max_self: u64,
}

impl Flamebearer {
    pub fn from_tree(tree: &ProfileTree) -> Self {
        let mut builder = Builder::default();
        builder.intern(ROOT_NAME);

        // Pre-order flattening. Names are interned as each node's children
        // are queued, so sibling labels get consecutive indices.
        let mut bars: Vec<Bar> = Vec::new();
        let mut pending: Vec<(&Node, usize, usize, Option<usize>)> =
            vec![(tree.root(), 0, 0, None)];
        while let Some((node, depth, name, parent)) = pending.pop() {
            let index = bars.len();
            bars.push(Bar {
                depth,
                name,
                parent,
                self_count: node.self_count(),
                total: node.self_count(),
                offset: 0,
            });

            let children: Vec<_> = node
                .children()
                .map(|(label, child)| (child, depth + 1, builder.intern(label), Some(index)))
                .collect();
            pending.extend(children.into_iter().rev());
        }

        // Children follow their parent, so a reverse sweep sees every
        // subtree total before it is added to the parent.
        for i in (1..bars.len()).rev() {
            if let Some(parent) = bars[i].parent {
                bars[parent].total = bars[parent].total.saturating_add(bars[i].total);
            }
        }

        // Siblings appear in label order, each starting where the previous
        // one ended; the first starts at its parent's offset.
        let mut next_offset: Vec<u64> = vec![0; bars.len()];
        let mut prev_end: Vec<u64> = Vec::new();
        for i in 0..bars.len() {
            if let Some(parent) = bars[i].parent {
                bars[i].offset = next_offset[parent];
                next_offset[parent] = next_offset[parent].saturating_add(bars[i].total);
            }
            next_offset[i] = bars[i].offset;

            let bar = &bars[i];
            if bar.depth == prev_end.len() {
                prev_end.push(0);
                builder.levels.push(Vec::new());
            }
            builder.levels[bar.depth].extend([
                bar.offset.saturating_sub(prev_end[bar.depth]),
                bar.total,
                bar.self_count,
                bar.name as u64,
            ]);
            prev_end[bar.depth] = bar.offset.saturating_add(bar.total);
            builder.max_self = builder.max_self.max(bar.self_count);
        }

        Flamebearer {
            names: builder.names,
            levels: builder.levels,
            num_ticks: bars.first().map_or(0, |root| root.total),
            max_self: builder.max_self,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

struct Bar {
    depth: usize,
    name: usize,
    parent: Option<usize>,
    self_count: u64,
    total: u64,
    offset: u64,
}

#[derive(Default)]
struct Builder {
    names: Vec<String>,
    index: HashMap<String, usize>,
    levels: Vec<Vec<u64>>,
    max_self: u64,
}

impl Builder {
    fn intern(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), i);
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tree_has_root_only() {
        let fb = Flamebearer::from_tree(&ProfileTree::new());

        assert_eq!(fb.names, ["total"]);
        assert_eq!(fb.levels, vec![vec![0, 0, 0, 0]]);
        assert_eq!(fb.num_ticks, 0);
        assert_eq!(fb.max_self, 0);
    }

    #[test]
    fn offsets_are_deltas_from_previous_bar() {
        let tree = ProfileTree::from_iter([("a;x", 1), ("a", 2), ("b;y", 4)]);
        let fb = Flamebearer::from_tree(&tree);

        assert_eq!(fb.names, ["total", "a", "b", "x", "y"]);
        assert_eq!(fb.levels[0], [0, 7, 0, 0]);
        assert_eq!(fb.levels[1], [0, 3, 2, 1, 0, 4, 0, 2]);
        // x spans [0, 1); y starts at 3, two ticks after x ends.
        assert_eq!(fb.levels[2], [0, 1, 1, 3, 2, 4, 4, 4]);
        assert_eq!(fb.num_ticks, 7);
        assert_eq!(fb.max_self, 4);
    }

    #[test]
    fn repeated_labels_share_a_name() {
        let tree = ProfileTree::from_iter([("main;work", 1), ("work;main", 1)]);
        let fb = Flamebearer::from_tree(&tree);

        assert_eq!(fb.names, ["total", "main", "work"]);
    }

    #[test]
    fn saturated_counts_do_not_overflow() {
        let tree = ProfileTree::from_iter([("a", u64::MAX), ("b", 1), ("b;c", u64::MAX)]);
        let fb = Flamebearer::from_tree(&tree);

        assert_eq!(fb.num_ticks, u64::MAX);
        assert_eq!(fb.num_ticks, tree.total());
        assert_eq!(fb.max_self, u64::MAX);
        assert_eq!(fb.levels[0], [0, u64::MAX, 0, 0]);
        assert_eq!(fb.levels[1], [0, u64::MAX, u64::MAX, 1, 0, u64::MAX, 1, 2]);
        // c starts where b starts, far past the end of the last bar on its level.
        assert_eq!(fb.levels[2], [u64::MAX, u64::MAX, u64::MAX, 3]);
    }

    #[test]
    fn deep_chain_renders_one_bar_per_level() {
        let depth = 50_000;
        let mut tree = ProfileTree::new();
        tree.insert(std::iter::repeat_n("f", depth), 3);

        let fb = Flamebearer::from_tree(&tree);

        assert_eq!(fb.levels.len(), depth + 1);
        assert_eq!(fb.levels[depth], [0, 3, 3, 1]);
        assert_eq!(fb.names, ["total", "f"]);
    }

    #[test]
    fn json_uses_camel_case() {
        let fb = Flamebearer::from_tree(&ProfileTree::from_iter([("a", 1)]));
        let json: serde_json::Value = serde_json::from_str(&fb.to_json().unwrap()).unwrap();

        assert_eq!(json["numTicks"], 1);
        assert_eq!(json["maxSelf"], 1);
        assert_eq!(json["names"][1], "a");
        assert_eq!(json["levels"][1][1], 1);
    }
}
