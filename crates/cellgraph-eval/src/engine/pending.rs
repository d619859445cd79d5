//! Async/pending bookkeeping.
//!
//! A callable that needs an external result asks [`PendingSet::lookup`] for it.
//! The first lookup issues an [`AsyncRequest`] and reports `Pending`; the host
//! performs the work and completes the request through an [`AsyncHandle`]. The
//! handle only drops the result into a mailbox: the engine drains the mailbox at
//! the start of the next pass, so completion code never touches graph or store.
//!
//! Every request carries the generation of the formula that issued it. A
//! completion whose generation no longer matches the position is stale and is
//! discarded.

use std::sync::Arc;

use cellgraph_common::{CellValue, Position};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

/// Identifies one async request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingTicket {
    pub position: Position,
    pub generation: u64,
    pub key: String,
}

/// A request the host must fulfil.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncRequest {
    pub ticket: PendingTicket,
}

impl AsyncRequest {
    pub fn key(&self) -> &str {
        &self.ticket.key
    }

    pub fn position(&self) -> Position {
        self.ticket.position
    }
}

/// What a callable sees for an async key.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncState {
    Pending,
    Resolved(CellValue),
    Rejected(String),
}

type Resolution = Result<CellValue, String>;

/// Cloneable, thread-safe completion handle given to the host.
#[derive(Clone, Default)]
pub struct AsyncHandle {
    inbox: Arc<Mutex<Vec<(PendingTicket, Resolution)>>>,
}

impl AsyncHandle {
    pub fn resolve(&self, ticket: PendingTicket, value: CellValue) {
        self.inbox.lock().push((ticket, Ok(value)));
    }

    pub fn reject<S: Into<String>>(&self, ticket: PendingTicket, reason: S) {
        self.inbox.lock().push((ticket, Err(reason.into())));
    }

    fn drain(&self) -> Vec<(PendingTicket, Resolution)> {
        std::mem::take(&mut *self.inbox.lock())
    }
}

impl std::fmt::Debug for AsyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncHandle")
            .field("queued", &self.inbox.lock().len())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    requested: FxHashSet<String>,
    resolved: FxHashMap<String, Resolution>,
}

#[derive(Debug, Default)]
pub struct PendingSet {
    /// Current generation of every formula position.
    generations: FxHashMap<Position, u64>,
    slots: FxHashMap<Position, Slot>,
    /// Positions whose callable last returned "not ready".
    waiting: FxHashSet<Position>,
    outbox: Vec<AsyncRequest>,
    handle: AsyncHandle,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> AsyncHandle {
        self.handle.clone()
    }

    /// Stamp `position` with a new generation, forgetting every request and
    /// result of the previous content.
    pub fn restamp(&mut self, position: Position, generation: u64) {
        self.generations.insert(position, generation);
        self.drop_state(position);
    }

    /// The position no longer holds a formula.
    pub fn forget(&mut self, position: Position) {
        self.generations.remove(&position);
        self.drop_state(position);
    }

    fn drop_state(&mut self, position: Position) {
        self.slots.remove(&position);
        self.waiting.remove(&position);
        self.outbox.retain(|request| request.ticket.position != position);
    }

    pub(crate) fn lookup(&mut self, position: Position, generation: u64, key: &str) -> AsyncState {
        let slot = self.slots.entry(position).or_default();
        if slot.generation != generation {
            *slot = Slot {
                generation,
                ..Slot::default()
            };
        }
        if let Some(resolution) = slot.resolved.get(key) {
            return match resolution {
                Ok(v) => AsyncState::Resolved(v.clone()),
                Err(reason) => AsyncState::Rejected(reason.clone()),
            };
        }
        if slot.requested.insert(key.to_string()) {
            self.outbox.push(AsyncRequest {
                ticket: PendingTicket {
                    position,
                    generation,
                    key: key.to_string(),
                },
            });
        }
        AsyncState::Pending
    }

    pub(crate) fn mark_waiting(&mut self, position: Position) {
        self.waiting.insert(position);
    }

    pub(crate) fn mark_settled(&mut self, position: Position) {
        self.waiting.remove(&position);
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    /// Waiting positions in row-major order.
    pub fn waiting_positions(&self) -> Vec<Position> {
        let mut out: Vec<Position> = self.waiting.iter().copied().collect();
        out.sort_unstable();
        out
    }

    pub fn take_requests(&mut self) -> Vec<AsyncRequest> {
        std::mem::take(&mut self.outbox)
    }

    /// Move completions from the mailbox into their slots. Returns the
    /// positions that received a fresh result; stale completions are dropped.
    pub(crate) fn drain_completions(&mut self) -> Vec<Position> {
        let mut touched = Vec::new();
        for (ticket, resolution) in self.handle.drain() {
            let current = self.generations.get(&ticket.position).copied();
            let slot = self.slots.get_mut(&ticket.position);
            match (current, slot) {
                (Some(generation), Some(slot))
                    if generation == ticket.generation
                        && slot.generation == ticket.generation
                        && slot.requested.contains(&ticket.key) =>
                {
                    slot.resolved.insert(ticket.key, resolution);
                    touched.push(ticket.position);
                }
                _ => {
                    tracing::debug!(
                        position = %ticket.position,
                        generation = ticket.generation,
                        key = %ticket.key,
                        "discarding stale async completion"
                    );
                }
            }
        }
        touched.sort_unstable();
        touched.dedup();
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_lookup_issues_one_request() {
        let a1 = Position::new(0, 0, 0);
        let mut set = PendingSet::new();
        set.restamp(a1, 1);
        assert_eq!(set.lookup(a1, 1, "k"), AsyncState::Pending);
        assert_eq!(set.lookup(a1, 1, "k"), AsyncState::Pending);
        let requests = set.take_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].key(), "k");
    }

    #[test]
    fn completion_becomes_visible_after_drain() {
        let a1 = Position::new(0, 0, 0);
        let mut set = PendingSet::new();
        set.restamp(a1, 7);
        set.lookup(a1, 7, "k");
        let ticket = set.take_requests().remove(0).ticket;
        set.handle().resolve(ticket, CellValue::Number(5.0));
        assert_eq!(set.lookup(a1, 7, "k"), AsyncState::Pending);
        assert_eq!(set.drain_completions(), vec![a1]);
        assert_eq!(set.lookup(a1, 7, "k"), AsyncState::Resolved(CellValue::Number(5.0)));
    }

    #[test]
    fn stale_generation_is_discarded() {
        let a1 = Position::new(0, 0, 0);
        let mut set = PendingSet::new();
        set.restamp(a1, 1);
        set.lookup(a1, 1, "k");
        let ticket = set.take_requests().remove(0).ticket;
        set.restamp(a1, 2);
        set.handle().resolve(ticket, CellValue::Number(5.0));
        assert!(set.drain_completions().is_empty());
        assert_eq!(set.lookup(a1, 2, "k"), AsyncState::Pending);
    }

    #[test]
    fn rejection_is_reported() {
        let a1 = Position::new(0, 0, 0);
        let mut set = PendingSet::new();
        set.restamp(a1, 1);
        set.lookup(a1, 1, "k");
        let ticket = set.take_requests().remove(0).ticket;
        set.handle().reject(ticket, "offline");
        set.drain_completions();
        assert_eq!(set.lookup(a1, 1, "k"), AsyncState::Rejected("offline".into()));
    }
}
