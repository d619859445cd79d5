//! cellgraph-eval – host-side collaborator traits
//!
//! The engine never owns raw cell content, sheet structure, or the formula
//! language. It reads them through these traits and writes only evaluated
//! results.

use cellgraph_common::{CellError, CellValue, Position, SheetId, Zone};

use crate::function::CompiledFormula;

/* ───────────────────────────── Content ───────────────────────────── */

/// Raw content of a position as typed by the user.
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Literal(CellValue),
    /// Formula source text, compiled through [`FormulaCompiler`].
    Formula(String),
}

pub trait ContentStore {
    /// Every position holding content on `sheet`, in any order.
    fn positions(&self, sheet: SheetId) -> Vec<Position>;

    fn content(&self, position: Position) -> Option<CellContent>;

    fn is_occupied(&self, position: Position) -> bool {
        self.content(position).is_some()
    }
}

/* ───────────────────────────── Structure ─────────────────────────── */

pub trait GridStructure {
    /// Sheets in workbook order.
    fn sheet_ids(&self) -> Vec<SheetId>;

    fn sheet_exists(&self, sheet: SheetId) -> bool {
        self.sheet_ids().contains(&sheet)
    }

    /// `(columns, rows)` of the sheet, `None` when it does not exist.
    fn sheet_size(&self, sheet: SheetId) -> Option<(u32, u32)>;

    fn is_row_hidden(&self, _sheet: SheetId, _row: u32) -> bool {
        false
    }

    fn is_col_hidden(&self, _sheet: SheetId, _col: u32) -> bool {
        false
    }

    /// Whether `zone` lies entirely inside the sheet.
    fn zone_in_bounds(&self, sheet: SheetId, zone: &Zone) -> bool {
        match self.sheet_size(sheet) {
            Some((cols, rows)) => zone.right() < cols && zone.bottom() < rows,
            None => false,
        }
    }
}

/* ───────────────────────────── Compiler ──────────────────────────── */

pub trait FormulaCompiler {
    /// Compile `text` found at `at`. A compile failure is reported as the
    /// cell error the formula cell should display.
    fn compile(&self, text: &str, at: Position) -> Result<CompiledFormula, CellError>;
}

/* ───────────────────── Combined evaluation context ───────────────── */

pub trait EvaluationContext: ContentStore + GridStructure + FormulaCompiler {}

impl<T> EvaluationContext for T where T: ContentStore + GridStructure + FormulaCompiler {}
