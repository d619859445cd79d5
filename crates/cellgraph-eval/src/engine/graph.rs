use cellgraph_common::{Position, Range, SheetId};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use super::interval_tree::IntervalTree;

/// One reverse edge: `owner` reads columns `left..=right` of the rows the
/// interval tree files it under.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
struct Reader {
    left: u32,
    right: u32,
    owner: Position,
}

pub type DependencyList = SmallVec<[Range; 4]>;

/// Forward edges (formula → ranges it reads) and the derived reverse index
/// (position → formulas reading it).
///
/// Self-references are stored like any other edge; deciding that they are
/// circular is the evaluator's job.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    forward: FxHashMap<Position, DependencyList>,
    reverse: FxHashMap<SheetId, IntervalTree<Reader>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every outgoing edge of `position`. Old edges are fully removed
    /// before the new ones are added.
    pub fn set_dependencies<I>(&mut self, position: Position, ranges: I)
    where
        I: IntoIterator<Item = Range>,
    {
        self.remove_outgoing(position);

        let mut deps = DependencyList::new();
        for range in ranges {
            if !deps.contains(&range) {
                deps.push(range);
            }
        }
        for range in &deps {
            self.reverse.entry(range.sheet).or_default().insert(
                range.zone.top(),
                range.zone.bottom(),
                Reader {
                    left: range.zone.left(),
                    right: range.zone.right(),
                    owner: position,
                },
            );
        }
        self.forward.insert(position, deps);
    }

    /// Ranges currently read by `position`.
    pub fn dependencies(&self, position: Position) -> &[Range] {
        self.forward.get(&position).map_or(&[], |deps| deps.as_slice())
    }

    pub fn has_formula(&self, position: Position) -> bool {
        self.forward.contains_key(&position)
    }

    /// Formula owners whose declared ranges intersect `position`, row-major.
    pub fn get_dependents(&self, position: Position) -> Vec<Position> {
        let Some(tree) = self.reverse.get(&position.sheet) else {
            return Vec::new();
        };
        let mut out: Vec<Position> = tree
            .query(position.row, position.row)
            .filter(|r| position.col >= r.left && position.col <= r.right)
            .map(|r| r.owner)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Every formula owner reachable from `seeds` through reverse edges,
    /// excluding the seeds themselves unless they are reached again.
    pub fn transitive_dependents<I>(&self, seeds: I) -> FxHashSet<Position>
    where
        I: IntoIterator<Item = Position>,
    {
        let mut affected = FxHashSet::default();
        let mut to_visit: Vec<Position> = seeds.into_iter().collect();

        while let Some(pos) = to_visit.pop() {
            for dependent in self.get_dependents(pos) {
                if affected.insert(dependent) {
                    to_visit.push(dependent);
                }
            }
        }

        affected
    }

    /// Clear the edges of `position` in both directions: its own outgoing
    /// ranges, and the reverse entries pointing at it.
    pub fn remove_position(&mut self, position: Position) {
        self.remove_outgoing(position);
    }

    /// Formula owners, unordered.
    pub fn formula_positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.forward.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    fn remove_outgoing(&mut self, position: Position) {
        let Some(old) = self.forward.remove(&position) else {
            return;
        };
        for range in old {
            if let Some(tree) = self.reverse.get_mut(&range.sheet) {
                tree.remove(
                    range.zone.top(),
                    range.zone.bottom(),
                    &Reader {
                        left: range.zone.left(),
                        right: range.zone.right(),
                        owner: position,
                    },
                );
                if tree.is_empty() {
                    self.reverse.remove(&range.sheet);
                }
            }
        }
    }
}
