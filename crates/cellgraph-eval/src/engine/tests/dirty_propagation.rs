//! Incremental passes recompute exactly the affected subgraph.
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::common::{a1, engine, num, r};
use crate::test_workbook::{TestWorkbook, formulas};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn calls(c: &AtomicUsize) -> usize {
    c.load(Ordering::SeqCst)
}

#[test]
fn test_edit_recomputes_only_transitive_dependents() {
    // A1 → A2 → A3, A1 → B1 (via range), C1 independent
    let (a2, a3, b1, c1) = (counter(), counter(), counter(), counter());
    let wb = TestWorkbook::new()
        .with_literal(a1("A1"), 1.0)
        .with_literal(a1("C2"), 10.0)
        .with_formula(a1("A2"), "=A1+1", formulas::counted(formulas::plus(r("A1"), 1.0), a2.clone()))
        .with_formula(a1("A3"), "=A2+1", formulas::counted(formulas::plus(r("A2"), 1.0), a3.clone()))
        .with_formula(
            a1("B1"),
            "=SUM(A1:A2)",
            formulas::counted(formulas::sum(vec![r("A1:A2")]), b1.clone()),
        )
        .with_formula(a1("C1"), "=C2+1", formulas::counted(formulas::plus(r("C2"), 1.0), c1.clone()));
    let mut engine = engine(wb);
    engine.evaluate_all_cells().unwrap();
    assert_eq!([calls(&a2), calls(&a3), calls(&b1), calls(&c1)], [1, 1, 1, 1]);

    let expected = engine.graph().transitive_dependents([a1("A1")]);
    assert_eq!(expected.len(), 3);

    engine.context_mut().set_literal(a1("A1"), 5.0);
    let result = engine.evaluate_cells(&[a1("A1")]).unwrap();

    assert_eq!(result.computed_cells, expected.len());
    assert_eq!([calls(&a2), calls(&a3), calls(&b1), calls(&c1)], [2, 2, 2, 1]);
    assert_eq!(num(&engine, "A2"), 6.0);
    assert_eq!(num(&engine, "A3"), 7.0);
    assert_eq!(num(&engine, "B1"), 11.0);
    assert_eq!(num(&engine, "C1"), 11.0);
}

#[test]
fn test_edit_of_unread_cell_recomputes_nothing() {
    let c = counter();
    let wb = TestWorkbook::new()
        .with_literal(a1("A1"), 1.0)
        .with_formula(a1("B1"), "=A1+1", formulas::counted(formulas::plus(r("A1"), 1.0), c.clone()));
    let mut engine = engine(wb);
    engine.evaluate_all_cells().unwrap();

    engine.context_mut().set_literal(a1("D9"), 3.0);
    let result = engine.evaluate_cells(&[a1("D9")]).unwrap();
    assert_eq!(result.computed_cells, 0);
    assert_eq!(calls(&c), 1);
    assert_eq!(num(&engine, "D9"), 3.0);
}

#[test]
fn test_formula_edit_rewires_edges() {
    let mut wb = TestWorkbook::new()
        .with_literal(a1("A1"), 1.0)
        .with_literal(a1("A2"), 100.0)
        .with_formula(a1("B1"), "=A1+1", formulas::plus(r("A1"), 1.0));
    wb.register("=A2+1", formulas::plus(r("A2"), 1.0));
    let mut engine = engine(wb);
    engine.evaluate_all_cells().unwrap();
    assert_eq!(num(&engine, "B1"), 2.0);

    engine.context_mut().set_formula_text(a1("B1"), "=A2+1");
    engine.update_dependencies(a1("B1")).unwrap();
    assert!(engine.graph().get_dependents(a1("A1")).is_empty());
    assert_eq!(engine.graph().get_dependents(a1("A2")), vec![a1("B1")]);

    engine.evaluate_cells(&[a1("B1")]).unwrap();
    assert_eq!(num(&engine, "B1"), 101.0);

    // The old input no longer triggers B1.
    engine.context_mut().set_literal(a1("A1"), 50.0);
    let result = engine.evaluate_cells(&[a1("A1")]).unwrap();
    assert_eq!(result.computed_cells, 0);
}

#[test]
fn test_formula_replaced_by_literal() {
    let wb = TestWorkbook::new()
        .with_literal(a1("A1"), 1.0)
        .with_formula(a1("A2"), "=A1+1", formulas::plus(r("A1"), 1.0))
        .with_formula(a1("A3"), "=A2+1", formulas::plus(r("A2"), 1.0));
    let mut engine = engine(wb);
    engine.evaluate_all_cells().unwrap();
    assert_eq!(num(&engine, "A3"), 3.0);

    engine.context_mut().set_literal(a1("A2"), 40.0);
    engine.evaluate_cells(&[a1("A2")]).unwrap();
    assert_eq!(num(&engine, "A2"), 40.0);
    assert_eq!(num(&engine, "A3"), 41.0);
    assert!(!engine.graph().has_formula(a1("A2")));
}

#[test]
fn test_structure_change_rebuilds() {
    let wb = TestWorkbook::new()
        .with_literal(a1("A1"), 1.0)
        .with_formula(a1("B1"), "=A1+1", formulas::plus(r("A1"), 1.0));
    let mut engine = engine(wb);
    engine.evaluate_all_cells().unwrap();

    // Host shifts everything down one row.
    let ctx = engine.context_mut();
    ctx.clear(a1("A1"));
    ctx.clear(a1("B1"));
    ctx.set_literal(a1("A2"), 1.0);
    ctx.set_formula(a1("B2"), "=A2+1", formulas::plus(r("A2"), 1.0));
    let result = engine.on_structure_changed().unwrap();

    assert_eq!(result.computed_cells, 1);
    assert_eq!(num(&engine, "B2"), 2.0);
    assert!(!engine.graph().has_formula(a1("B1")));
    assert_eq!(
        engine.get_evaluated_cell(a1("B1")).unwrap().value,
        cellgraph_common::CellValue::Empty
    );
}
