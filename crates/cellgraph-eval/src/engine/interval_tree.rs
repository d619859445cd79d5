use std::collections::BTreeMap;
use std::hash::Hash;

use rustc_hash::FxHashSet;

/// Interval index over one axis (rows) of a sheet.
///
/// ## Design decisions:
///
/// 1. **Point intervals are the common case** - most references are single cells
/// 2. **Sparse data** - few distinct intervals even on very tall sheets
/// 3. **Small value sets** - each interval maps to a handful of readers
///
/// Intervals are grouped by their low endpoint in a `BTreeMap`; a stabbing query
/// walks every group whose low endpoint is `<= q_high` and keeps the ones whose
/// high endpoint reaches `q_low`.
#[derive(Debug, Clone)]
struct IntervalNode<T: Eq + Hash> {
    high: u32,
    values: FxHashSet<T>,
}

#[derive(Debug, Clone)]
pub struct IntervalTree<T: Eq + Hash> {
    map: BTreeMap<u32, Vec<IntervalNode<T>>>,
    size: usize,
}

impl<T: Eq + Hash> Default for IntervalTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash> IntervalTree<T> {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            size: 0,
        }
    }

    /// Number of distinct intervals.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Insert a value for the interval `[low, high]`.
    pub fn insert(&mut self, low: u32, high: u32, value: T) {
        let entries = self.map.entry(low).or_default();

        if let Some(node) = entries.iter_mut().find(|n| n.high == high) {
            node.values.insert(value);
        } else {
            let mut values = FxHashSet::default();
            values.insert(value);
            entries.push(IntervalNode { high, values });
            self.size += 1;
        }
    }

    /// Values of every interval overlapping `[q_low, q_high]`.
    pub fn query(&self, q_low: u32, q_high: u32) -> impl Iterator<Item = &T> + '_ {
        self.map
            .range(..=q_high)
            .flat_map(|(_, nodes)| nodes.iter())
            .filter(move |node| node.high >= q_low)
            .flat_map(|node| node.values.iter())
    }

    pub fn remove(&mut self, low: u32, high: u32, value: &T) -> bool {
        let Some(nodes) = self.map.get_mut(&low) else {
            return false;
        };
        let Some(idx) = nodes.iter().position(|n| n.high == high) else {
            return false;
        };
        let removed = nodes[idx].values.remove(value);
        if nodes[idx].values.is_empty() {
            nodes.swap_remove(idx);
            self.size -= 1;
        }
        if nodes.is_empty() {
            self.map.remove(&low);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(tree: &IntervalTree<&'static str>, low: u32, high: u32) -> Vec<&'static str> {
        let mut out: Vec<_> = tree.query(low, high).copied().collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn point_and_range_queries() {
        let mut tree = IntervalTree::new();
        tree.insert(5, 5, "point");
        tree.insert(10, 20, "a");
        tree.insert(15, 25, "b");
        tree.insert(30, 40, "c");

        assert_eq!(hits(&tree, 5, 5), vec!["point"]);
        assert_eq!(hits(&tree, 12, 22), vec!["a", "b"]);
        assert_eq!(hits(&tree, 35, 45), vec!["c"]);
        assert!(hits(&tree, 26, 29).is_empty());
    }

    #[test]
    fn nested_intervals() {
        let mut tree = IntervalTree::new();
        tree.insert(10, 100, "A");
        tree.insert(20, 50, "B");
        tree.insert(30, 40, "C");
        tree.insert(5, 15, "D");
        tree.insert(95, 105, "E");

        assert_eq!(hits(&tree, 35, 35), vec!["A", "B", "C"]);
        assert_eq!(hits(&tree, 98, 102), vec!["A", "E"]);
    }

    #[test]
    fn shared_interval_counts_once() {
        let mut tree = IntervalTree::new();
        tree.insert(10, 10, "v1");
        tree.insert(10, 10, "v2");
        tree.insert(10, 10, "v1");
        assert_eq!(tree.len(), 1);
        assert_eq!(hits(&tree, 10, 10), vec!["v1", "v2"]);
    }

    #[test]
    fn remove_drops_empty_intervals() {
        let mut tree = IntervalTree::new();
        tree.insert(10, 20, "A");
        tree.insert(10, 20, "B");
        assert!(!tree.remove(10, 20, &"C"));
        assert!(!tree.remove(99, 100, &"A"));
        assert!(tree.remove(10, 20, &"A"));
        assert_eq!(tree.len(), 1);
        assert!(tree.remove(10, 20, &"B"));
        assert!(tree.is_empty());
        assert!(hits(&tree, 0, 100).is_empty());
    }

    #[test]
    fn deep_sparse_tree() {
        let mut tree = IntervalTree::new();
        for i in (0..1_000_000u32).step_by(10_000) {
            tree.insert(i, i, i);
        }
        assert_eq!(tree.len(), 100);
        assert_eq!(tree.query(500_000, u32::MAX).count(), 50);
    }
}
