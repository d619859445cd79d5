pub mod function;
pub mod traits;

pub mod engine;
pub mod test_workbook;

pub use cellgraph_common::{Position, Range, SheetId, Zone};
pub use engine::{Engine, EngineError, EvalConfig, EvalResult};
