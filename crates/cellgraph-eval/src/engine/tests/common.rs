//! Common test helpers
use cellgraph_common::{CellValue, Position, Range};

use crate::engine::{Engine, EvalConfig};
use crate::test_workbook::TestWorkbook;

/// Position on sheet 0 from an A1 name.
pub fn a1(name: &str) -> Position {
    Position::from_a1(0, name).unwrap()
}

/// Range on sheet 0 from `"A1"` or `"A1:B5"`.
pub fn r(text: &str) -> Range {
    Range::from_a1(0, text).unwrap()
}

pub fn engine(wb: TestWorkbook) -> Engine<TestWorkbook> {
    init_tracing();
    Engine::new(wb, EvalConfig::default())
}

pub fn value(engine: &Engine<TestWorkbook>, name: &str) -> CellValue {
    engine.get_evaluated_cell(a1(name)).unwrap().value
}

pub fn num(engine: &Engine<TestWorkbook>, name: &str) -> f64 {
    match value(engine, name) {
        CellValue::Number(n) => n,
        other => panic!("{name} is not a number: {other:?}"),
    }
}

/// Route engine logs to the test writer when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
