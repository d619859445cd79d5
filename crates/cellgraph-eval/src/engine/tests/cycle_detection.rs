//! Circular references found on VISITING revisits.
use cellgraph_common::{CellErrorKind, CellValue, Position, Range};
use proptest::prelude::*;

use super::common::{a1, engine, num, r, value};
use crate::test_workbook::{TestWorkbook, formulas};

fn kind(v: &CellValue) -> Option<CellErrorKind> {
    v.as_error().map(|e| e.kind)
}

#[test]
fn test_two_node_cycle() {
    // A1 = A2, A2 = A1
    let wb = TestWorkbook::new()
        .with_formula(a1("A1"), "=A2", formulas::reference(r("A2")))
        .with_formula(a1("A2"), "=A1", formulas::reference(r("A1")));
    let mut engine = engine(wb);
    let result = engine.evaluate_all_cells().unwrap();

    assert_eq!(kind(&value(&engine, "A1")), Some(CellErrorKind::CircularReference));
    assert_eq!(kind(&value(&engine, "A2")), Some(CellErrorKind::CircularReference));
    assert_eq!(result.cycle_errors, 2);
    assert_eq!(engine.get_evaluated_cell(a1("A1")).unwrap().formatted, "#CIRC!");
}

#[test]
fn test_self_reference() {
    let wb = TestWorkbook::new().with_formula(a1("B2"), "=B2+1", formulas::plus(r("B2"), 1.0));
    let mut engine = engine(wb);
    engine.evaluate_all_cells().unwrap();
    assert_eq!(kind(&value(&engine, "B2")), Some(CellErrorKind::CircularReference));
}

#[test]
fn test_cycle_with_acyclic_branch() {
    // A1 <-> B1 cycle; C1 reads A1; D1 independent
    let wb = TestWorkbook::new()
        .with_formula(a1("A1"), "=B1", formulas::reference(r("B1")))
        .with_formula(a1("B1"), "=A1", formulas::reference(r("A1")))
        .with_formula(a1("C1"), "=A1+1", formulas::plus(r("A1"), 1.0))
        .with_literal(a1("E1"), 4.0)
        .with_formula(a1("D1"), "=E1+1", formulas::plus(r("E1"), 1.0));
    let mut engine = engine(wb);
    engine.evaluate_all_cells().unwrap();

    let c1 = value(&engine, "C1");
    let err = c1.as_error().unwrap();
    assert_eq!(err.kind, CellErrorKind::DependencyError);
    assert_eq!(err.code(), "#CIRC!");
    assert_eq!(num(&engine, "D1"), 5.0);
}

#[test]
fn test_breaking_cycle_recovers() {
    let wb = TestWorkbook::new()
        .with_formula(a1("A1"), "=A2", formulas::reference(r("A2")))
        .with_formula(a1("A2"), "=A1", formulas::reference(r("A1")));
    let mut engine = engine(wb);
    engine.evaluate_all_cells().unwrap();

    engine.context_mut().set_literal(a1("A1"), 3.0);
    let result = engine.evaluate_cells(&[a1("A1")]).unwrap();

    assert_eq!(num(&engine, "A1"), 3.0);
    assert_eq!(num(&engine, "A2"), 3.0);
    assert_eq!(result.cycle_errors, 0);
}

#[test]
fn test_long_chain_does_not_overflow() {
    const LEN: u32 = 50_000;
    let mut wb = TestWorkbook::empty().with_sheet(0, 1, LEN);
    wb.set_literal(Position::new(0, 0, 0), 0.0);
    for row in 1..LEN {
        let above = Range::cell(Position::new(0, 0, row - 1));
        wb.set_formula(
            Position::new(0, 0, row),
            format!("=A{row}+1"),
            formulas::plus(above, 1.0),
        );
    }
    let mut engine = engine(wb);
    // Start from the bottom so the whole chain is on the work stack at once.
    engine.build_dependency_graph();
    engine
        .evaluate_cells(&[Position::new(0, 0, LEN - 1)])
        .unwrap();
    let last = engine.get_evaluated_cell(Position::new(0, 0, LEN - 1)).unwrap();
    assert_eq!(last.value, CellValue::Number((LEN - 1) as f64));
}

/// Ring in column B: the cell at row `order[i] + 1` reads the one at row
/// `order[i + 1] + 1`, wrapping around. A1 reads the ring member `entry`, and
/// since A1 is first in scan order, evaluation enters the ring there.
fn ring(order: &[u32], entry: u32) -> TestWorkbook {
    let mut wb = TestWorkbook::new();
    let member = |row: u32| Position::new(0, 1, row + 1);
    for (i, &row) in order.iter().enumerate() {
        let next = order[(i + 1) % order.len()];
        wb.set_formula(
            member(row),
            format!("=B{}", next + 2),
            formulas::reference(Range::cell(member(next))),
        );
    }
    wb.set_formula(
        a1("A1"),
        format!("=B{}+1", entry + 2),
        formulas::plus(Range::cell(member(entry)), 1.0),
    );
    wb
}

proptest! {
    #[test]
    fn prop_every_ring_member_is_circular(
        order in (2u32..8).prop_flat_map(|n| Just((0..n).collect::<Vec<u32>>()).prop_shuffle()),
        entry in 0u32..8,
    ) {
        let entry = entry % order.len() as u32;
        let mut engine = engine(ring(&order, entry));
        let result = engine.evaluate_all_cells().unwrap();
        prop_assert_eq!(result.cycle_errors, order.len());

        for &row in &order {
            let cell = engine.get_evaluated_cell(Position::new(0, 1, row + 1)).unwrap();
            prop_assert_eq!(kind(&cell.value), Some(CellErrorKind::CircularReference));
        }
        let reader = engine.get_evaluated_cell(a1("A1")).unwrap();
        prop_assert_eq!(kind(&reader.value), Some(CellErrorKind::DependencyError));
        prop_assert_eq!(reader.formatted, "#CIRC!");
    }
}
