//! crates/cellgraph-eval/src/test_workbook.rs
//! ------------------------------------------
//! Lightweight in-memory workbook for unit/prop tests.
//!
//! Formula text is opaque to the engine; this workbook "compiles" it by
//! looking the text up in a registry of prebuilt [`CompiledFormula`]s. The
//! [`formulas`] module has builders for the handful of callables tests need.
use std::collections::BTreeMap;

use cellgraph_common::{CellError, CellErrorKind, CellValue, Position, SheetId};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::function::CompiledFormula;
use crate::traits::{CellContent, ContentStore, FormulaCompiler, GridStructure};

#[derive(Debug, Clone)]
struct Sheet {
    cols: u32,
    rows: u32,
    cells: FxHashMap<(u32, u32), CellContent>,
    hidden_rows: FxHashSet<u32>,
    hidden_cols: FxHashSet<u32>,
}

impl Sheet {
    fn new(cols: u32, rows: u32) -> Self {
        Self {
            cols,
            rows,
            cells: FxHashMap::default(),
            hidden_rows: FxHashSet::default(),
            hidden_cols: FxHashSet::default(),
        }
    }
}

pub struct TestWorkbook {
    sheets: BTreeMap<SheetId, Sheet>,
    registry: FxHashMap<String, CompiledFormula>,
}

impl Default for TestWorkbook {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorkbook {
    /* ─────────────── constructors ─────────────── */

    /// One sheet (id 0) of 26 columns × 100 rows.
    pub fn new() -> Self {
        Self::empty().with_sheet(0, 26, 100)
    }

    /// No sheets at all.
    pub fn empty() -> Self {
        Self {
            sheets: BTreeMap::new(),
            registry: FxHashMap::default(),
        }
    }

    pub fn with_sheet(mut self, sheet: SheetId, cols: u32, rows: u32) -> Self {
        self.sheets.insert(sheet, Sheet::new(cols, rows));
        self
    }

    /* ─────────────── cell helpers ─────────────── */

    pub fn with_literal<V: Into<CellValue>>(mut self, position: Position, value: V) -> Self {
        self.set_literal(position, value);
        self
    }

    pub fn with_formula<S: Into<String>>(
        mut self,
        position: Position,
        text: S,
        compiled: CompiledFormula,
    ) -> Self {
        self.set_formula(position, text, compiled);
        self
    }

    pub fn set_literal<V: Into<CellValue>>(&mut self, position: Position, value: V) {
        self.put(position, CellContent::Literal(value.into()));
    }

    /// Register `compiled` under `text` and place the formula at `position`.
    pub fn set_formula<S: Into<String>>(
        &mut self,
        position: Position,
        text: S,
        compiled: CompiledFormula,
    ) {
        let text = text.into();
        self.register(text.clone(), compiled);
        self.put(position, CellContent::Formula(text));
    }

    /// Place formula text without registering it; unknown text fails to
    /// compile.
    pub fn set_formula_text<S: Into<String>>(&mut self, position: Position, text: S) {
        self.put(position, CellContent::Formula(text.into()));
    }

    pub fn register<S: Into<String>>(&mut self, text: S, compiled: CompiledFormula) {
        self.registry.insert(text.into(), compiled);
    }

    pub fn clear(&mut self, position: Position) {
        if let Some(sheet) = self.sheets.get_mut(&position.sheet) {
            sheet.cells.remove(&(position.col, position.row));
        }
    }

    pub fn remove_sheet(&mut self, sheet: SheetId) {
        self.sheets.remove(&sheet);
    }

    /* ─────────────── structure ─────────────── */

    pub fn hide_row(&mut self, sheet: SheetId, row: u32) {
        if let Some(s) = self.sheets.get_mut(&sheet) {
            s.hidden_rows.insert(row);
        }
    }

    pub fn hide_col(&mut self, sheet: SheetId, col: u32) {
        if let Some(s) = self.sheets.get_mut(&sheet) {
            s.hidden_cols.insert(col);
        }
    }

    fn put(&mut self, position: Position, content: CellContent) {
        if let Some(sheet) = self.sheets.get_mut(&position.sheet) {
            sheet.cells.insert((position.col, position.row), content);
        }
    }
}

impl ContentStore for TestWorkbook {
    fn positions(&self, sheet: SheetId) -> Vec<Position> {
        self.sheets
            .get(&sheet)
            .map(|s| {
                s.cells
                    .keys()
                    .map(|&(col, row)| Position::new(sheet, col, row))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn content(&self, position: Position) -> Option<CellContent> {
        self.sheets
            .get(&position.sheet)?
            .cells
            .get(&(position.col, position.row))
            .cloned()
    }
}

impl GridStructure for TestWorkbook {
    fn sheet_ids(&self) -> Vec<SheetId> {
        self.sheets.keys().copied().collect()
    }

    fn sheet_size(&self, sheet: SheetId) -> Option<(u32, u32)> {
        self.sheets.get(&sheet).map(|s| (s.cols, s.rows))
    }

    fn is_row_hidden(&self, sheet: SheetId, row: u32) -> bool {
        self.sheets
            .get(&sheet)
            .is_some_and(|s| s.hidden_rows.contains(&row))
    }

    fn is_col_hidden(&self, sheet: SheetId, col: u32) -> bool {
        self.sheets
            .get(&sheet)
            .is_some_and(|s| s.hidden_cols.contains(&col))
    }
}

impl FormulaCompiler for TestWorkbook {
    fn compile(&self, text: &str, _at: Position) -> Result<CompiledFormula, CellError> {
        self.registry.get(text).cloned().ok_or_else(|| {
            CellError::new(CellErrorKind::ComputeError)
                .with_message(format!("Unknown formula: {text}"))
        })
    }
}

/// Builders for the callables tests use.
pub mod formulas {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cellgraph_common::{CellValue, FUNCTION_NAME_PLACEHOLDER, Matrix, Range};

    use crate::engine::AsyncState;
    use crate::function::{
        CallContext, CompiledFormula, FnCaps, FormulaFailure, FormulaFn, FormulaInput,
        FormulaOutput, FormulaResult, WithCaps,
    };

    fn output_of(input: &FormulaInput) -> FormulaOutput {
        match input {
            FormulaInput::Scalar(v) => FormulaOutput::Scalar(v.clone()),
            FormulaInput::Range { values, .. } => FormulaOutput::Matrix(values.clone()),
        }
    }

    fn number_of(input: &FormulaInput) -> Result<f64, FormulaFailure> {
        input
            .as_scalar()
            .and_then(CellValue::as_number)
            .ok_or_else(|| FormulaFailure::new(format!("{FUNCTION_NAME_PLACEHOLDER} expects a number")))
    }

    /// `=<range>`: the value (or matrix) of a range.
    pub fn reference(range: Range) -> CompiledFormula {
        CompiledFormula::new(
            |inputs: &[FormulaInput], _: &mut CallContext<'_>| -> FormulaResult {
                Ok(inputs.first().map_or(FormulaOutput::Scalar(CellValue::Empty), output_of))
            },
            vec![range],
        )
    }

    /// `=<cell> + n`
    pub fn plus(range: Range, n: f64) -> CompiledFormula {
        CompiledFormula::new(
            move |inputs: &[FormulaInput], ctx: &mut CallContext<'_>| -> FormulaResult {
                ctx.enter_function("PLUS");
                let base = inputs.first().map(number_of).transpose()?.unwrap_or(0.0);
                Ok(CellValue::Number(base + n).into())
            },
            vec![range],
        )
    }

    /// `=SUM(ranges...)`; non-numeric cells are skipped.
    pub fn sum(ranges: Vec<Range>) -> CompiledFormula {
        CompiledFormula::new(
            |inputs: &[FormulaInput], ctx: &mut CallContext<'_>| -> FormulaResult {
                ctx.enter_function("SUM");
                let total: f64 = inputs
                    .iter()
                    .flat_map(FormulaInput::values)
                    .filter_map(|v| match v {
                        CellValue::Number(n) => Some(*n),
                        _ => None,
                    })
                    .sum();
                Ok(CellValue::Number(total).into())
            },
            ranges,
        )
    }

    /// `=SUBTOTAL`-like sum that skips hidden rows.
    pub fn visible_sum(range: Range) -> CompiledFormula {
        CompiledFormula::new(
            move |inputs: &[FormulaInput], ctx: &mut CallContext<'_>| -> FormulaResult {
                ctx.enter_function("VISIBLE_SUM");
                let mut total = 0.0;
                if let Some(FormulaInput::Range { range, values }) = inputs.first() {
                    for (_, row, v) in values.iter() {
                        if ctx.is_row_hidden(range.sheet, range.zone.top() + row) {
                            continue;
                        }
                        if let CellValue::Number(n) = v {
                            total += n;
                        }
                    }
                }
                Ok(CellValue::Number(total).into())
            },
            vec![range],
        )
    }

    /// A constant array literal.
    pub fn array(rows: Vec<Vec<CellValue>>) -> CompiledFormula {
        let matrix = Matrix::from_rows(rows);
        CompiledFormula::new(
            move |_: &[FormulaInput], _: &mut CallContext<'_>| -> FormulaResult {
                Ok(FormulaOutput::Matrix(matrix.clone()))
            },
            Vec::new(),
        )
    }

    /// `=SEQUENCE(<cell>)`: a column `1..=n` where `n` is read from `range`.
    pub fn sequence(range: Range) -> CompiledFormula {
        CompiledFormula::new(
            |inputs: &[FormulaInput], ctx: &mut CallContext<'_>| -> FormulaResult {
                ctx.enter_function("SEQUENCE");
                let n = inputs.first().map(number_of).transpose()?.unwrap_or(0.0);
                if n < 1.0 {
                    return Err(FormulaFailure::new(format!(
                        "{FUNCTION_NAME_PLACEHOLDER} needs a positive count"
                    )));
                }
                let rows = (1..=n as u32).map(|i| vec![CellValue::Number(i as f64)]).collect();
                Ok(FormulaOutput::Matrix(Matrix::from_rows(rows)))
            },
            vec![range],
        )
    }

    /// Always raises; the message carries the function-name placeholder.
    pub fn failing(name: &'static str, message: &'static str) -> CompiledFormula {
        CompiledFormula::new(
            move |_: &[FormulaInput], ctx: &mut CallContext<'_>| -> FormulaResult {
                ctx.enter_function(name);
                Err(FormulaFailure::new(message))
            },
            Vec::new(),
        )
    }

    /// `=ISERROR(<cell>)`; sees error inputs instead of propagating them.
    pub fn is_error(range: Range) -> CompiledFormula {
        CompiledFormula::new(
            WithCaps::new(
                |inputs: &[FormulaInput], _: &mut CallContext<'_>| -> FormulaResult {
                    let is_err = inputs
                        .first()
                        .and_then(FormulaInput::as_scalar)
                        .is_some_and(|v| matches!(v, CellValue::Error(_)));
                    Ok(CellValue::Boolean(is_err).into())
                },
                FnCaps::ABSORBS_ERRORS,
            ),
            vec![range],
        )
    }

    /// Result of the async job `key`, plus the numeric value of `inputs` when
    /// given.
    pub fn async_value(key: &str, inputs: Vec<Range>) -> CompiledFormula {
        let key = key.to_string();
        CompiledFormula::new(
            move |inputs: &[FormulaInput], ctx: &mut CallContext<'_>| -> FormulaResult {
                ctx.enter_function("FETCH");
                let base: f64 = inputs
                    .iter()
                    .map(number_of)
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .sum();
                match ctx.await_async(&key) {
                    AsyncState::Pending => Ok(FormulaOutput::NotReady),
                    AsyncState::Resolved(CellValue::Number(n)) if !inputs.is_empty() => {
                        Ok(CellValue::Number(base + n).into())
                    }
                    AsyncState::Resolved(value) => Ok(value.into()),
                    AsyncState::Rejected(reason) => Err(FormulaFailure::new(reason)),
                }
            },
            inputs,
        )
    }

    struct Counted {
        inner: Arc<dyn FormulaFn>,
        calls: Arc<AtomicUsize>,
    }

    impl FormulaFn for Counted {
        fn call(&self, inputs: &[FormulaInput], ctx: &mut CallContext<'_>) -> FormulaResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.call(inputs, ctx)
        }

        fn caps(&self) -> FnCaps {
            self.inner.caps()
        }
    }

    /// Wrap `compiled` so every invocation bumps `calls`.
    pub fn counted(compiled: CompiledFormula, calls: Arc<AtomicUsize>) -> CompiledFormula {
        CompiledFormula {
            callable: Arc::new(Counted {
                inner: compiled.callable,
                calls,
            }),
            dependencies: compiled.dependencies,
        }
    }
}
