//! Pass-scoped evaluation state.
//!
//! A [`PassContext`] lives for exactly one pass and is threaded explicitly
//! through the evaluator; nothing about visiting state outlives it. Positions
//! move UNVISITED → VISITING → DONE. A DONE position records the sequence
//! number at which it completed, which is how the scheduler later tells whether
//! a reader ran before or after a spill changed under it.

use cellgraph_common::{CellError, CellValue, EvaluatedCell, Matrix, Position, Zone};
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    /// On the work stack at this index.
    Visiting(usize),
    /// Completed with this sequence number.
    Done(u64),
}

/// A spill cell whose visible value changed during the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SpillChange {
    pub cell: Position,
    pub origin: Position,
    pub seq: u64,
}

#[derive(Debug, Default)]
pub(crate) struct PassContext {
    dirty: FxHashSet<Position>,
    state: FxHashMap<Position, VisitState>,
    circular: FxHashSet<Position>,
    seq: u64,
    pub spill_changes: Vec<SpillChange>,
    pub computed: usize,
}

impl PassContext {
    pub fn new(dirty: FxHashSet<Position>) -> Self {
        Self {
            dirty,
            ..Self::default()
        }
    }

    /// Dirty positions in scan order.
    pub fn schedule(&self) -> Vec<Position> {
        let mut order: Vec<Position> = self.dirty.iter().copied().collect();
        order.sort_unstable();
        order
    }

    #[inline]
    pub fn is_dirty(&self, position: Position) -> bool {
        self.dirty.contains(&position)
    }

    #[inline]
    pub fn is_done(&self, position: Position) -> bool {
        matches!(self.state.get(&position), Some(VisitState::Done(_)))
    }

    pub fn done_seq(&self, position: Position) -> Option<u64> {
        match self.state.get(&position) {
            Some(VisitState::Done(seq)) => Some(*seq),
            _ => None,
        }
    }

    pub fn visiting_index(&self, position: Position) -> Option<usize> {
        match self.state.get(&position) {
            Some(VisitState::Visiting(idx)) => Some(*idx),
            _ => None,
        }
    }

    pub fn enter(&mut self, position: Position, stack_index: usize) {
        self.state.insert(position, VisitState::Visiting(stack_index));
    }

    /// Mark DONE and return the completion sequence number.
    pub fn finish(&mut self, position: Position) -> u64 {
        self.seq += 1;
        self.state.insert(position, VisitState::Done(self.seq));
        self.computed += 1;
        self.seq
    }

    pub fn mark_circular(&mut self, position: Position) {
        self.circular.insert(position);
    }

    pub fn is_circular(&self, position: Position) -> bool {
        self.circular.contains(&position)
    }

    pub fn circular(&self) -> impl Iterator<Item = Position> + '_ {
        self.circular.iter().copied()
    }
}

/// Spill state of an origin captured when it was released.
#[derive(Debug, Default)]
pub(crate) struct PreviousSpill {
    pub zone: Option<Zone>,
    /// Values the covered cells showed, origin excluded.
    pub cells: FxHashMap<Position, EvaluatedCell>,
}

/// One entry of the explicit work stack.
#[derive(Debug)]
pub(crate) struct Frame {
    pub position: Position,
    prereqs: Vec<Position>,
    cursor: usize,
    pub previous: PreviousSpill,
}

impl Frame {
    pub fn new(position: Position, prereqs: Vec<Position>, previous: PreviousSpill) -> Self {
        Self {
            position,
            prereqs,
            cursor: 0,
            previous,
        }
    }

    pub fn next_prereq(&mut self) -> Option<Position> {
        let next = self.prereqs.get(self.cursor).copied();
        if next.is_some() {
            self.cursor += 1;
        }
        next
    }
}

/// What a formula produced.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Payload {
    Scalar(CellValue),
    Array(Matrix),
}

/// Result of evaluating one formula.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Value(Payload),
    /// `waiting` is set when the formula's own callable is waiting on an
    /// async result; inherited pending state does not join the pending set.
    Pending { waiting: bool },
    Error(CellError),
}
