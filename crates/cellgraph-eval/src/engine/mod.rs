//! cellgraph incremental evaluation engine
//!
//! Provides incremental formula evaluation with dependency tracking, cycle
//! detection, array spill and deferred async results.

pub mod eval;
pub mod graph;
pub mod interval_tree;
mod pass;
pub mod pending;
pub mod spill;
pub mod store;

#[cfg(test)]
mod tests;

pub use eval::{Engine, EvalResult};
pub use graph::DependencyGraph;
pub use pending::{AsyncHandle, AsyncRequest, AsyncState, PendingTicket};
pub use spill::{SpillConflict, SpreadIndex};

use cellgraph_common::{Position, SheetId};

use crate::traits::EvaluationContext;

/// Configuration for the evaluation engine
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Upper bound on passes per evaluation call. `None` picks one more than
    /// the number of formulas (at least two).
    pub max_passes: Option<usize>,
    /// Display text of a cell waiting on an async result.
    pub loading_text: String,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_passes: None,
            loading_text: "Loading...".to_string(),
        }
    }
}

/// Host-side contract violations. Cell-level problems are never reported
/// this way; they end up as error values in the grid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("sheet {0} does not exist")]
    UnknownSheet(SheetId),
    #[error("position {0} is outside the sheet bounds")]
    OutOfBounds(Position),
}

/// Construct a new engine with the given context and configuration
pub fn new_engine<R>(ctx: R, config: EvalConfig) -> Engine<R>
where
    R: EvaluationContext,
{
    Engine::new(ctx, config)
}
