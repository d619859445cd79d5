use std::collections::BTreeMap;
use std::fmt::{self, Display};

use crate::CellError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Scalar cell value as seen by formulas and by the grid.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    #[default]
    Empty,
    Error(CellError),
}

impl CellValue {
    pub fn text<S: Into<String>>(s: S) -> Self {
        CellValue::Text(s.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn as_error(&self) -> Option<&CellError> {
        match self {
            CellValue::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Empty => Some(0.0),
            _ => None,
        }
    }

    /// Display string used by the grid.
    pub fn formatted(&self) -> String {
        match self {
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
            CellValue::Boolean(true) => "TRUE".to_string(),
            CellValue::Boolean(false) => "FALSE".to_string(),
            CellValue::Empty => String::new(),
            CellValue::Error(e) => e.code().to_string(),
        }
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Error(e) => write!(f, "{e}"),
            other => f.write_str(&other.formatted()),
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Boolean(b)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Sparse 2-D grid of values. Only populated cells are stored; every other
/// cell inside the dimensions reads as `Empty`, so a whole-sheet range costs
/// what its content costs.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Matrix {
    width: u32,
    height: u32,
    /// Keyed by `(row, col)` so iteration is row-major.
    cells: BTreeMap<(u32, u32), CellValue>,
}

impl Matrix {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: BTreeMap::new(),
        }
    }

    /// Build from rows; short rows are padded with `Empty`.
    pub fn from_rows(rows: Vec<Vec<CellValue>>) -> Self {
        let height = u32::try_from(rows.len()).unwrap_or(u32::MAX);
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let width = u32::try_from(width).unwrap_or(u32::MAX);
        let mut m = Self::new(width, height);
        for (r, row) in (0..height).zip(rows) {
            for (c, v) in (0..width).zip(row) {
                m.set(c, r, v);
            }
        }
        m
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of cells inside the dimensions, populated or not.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Number of populated cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn is_scalar(&self) -> bool {
        self.width == 1 && self.height == 1
    }

    pub fn get(&self, col: u32, row: u32) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.cells.get(&(row, col)).unwrap_or(&EMPTY)
    }

    /// Out-of-range writes are ignored; writing `Empty` clears the cell.
    pub fn set(&mut self, col: u32, row: u32, value: CellValue) {
        if col >= self.width || row >= self.height {
            return;
        }
        if value.is_empty() {
            self.cells.remove(&(row, col));
        } else {
            self.cells.insert((row, col), value);
        }
    }

    /// Populated values in row-major order with their `(col, row)` offsets.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, &CellValue)> + '_ {
        self.cells.iter().map(|(&(row, col), v)| (col, row, v))
    }
}

/// Externally-visible result for one position.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EvaluatedCell {
    pub value: CellValue,
    pub formatted: String,
    pub is_pending: bool,
}

impl EvaluatedCell {
    pub fn new(value: CellValue) -> Self {
        let formatted = value.formatted();
        Self {
            value,
            formatted,
            is_pending: false,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Transient "loading" state with a sentinel value.
    pub fn pending(loading_text: &str) -> Self {
        Self {
            value: CellValue::Text(loading_text.to_string()),
            formatted: loading_text.to_string(),
            is_pending: true,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.value, CellValue::Error(_))
    }

    pub fn error(&self) -> Option<&CellError> {
        self.value.as_error()
    }
}

impl From<CellValue> for EvaluatedCell {
    fn from(value: CellValue) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CellErrorKind;

    #[test]
    fn formatting() {
        assert_eq!(CellValue::Number(5.0).formatted(), "5");
        assert_eq!(CellValue::Number(2.5).formatted(), "2.5");
        assert_eq!(CellValue::Boolean(true).formatted(), "TRUE");
        assert_eq!(CellValue::Empty.formatted(), "");
        let err = CellValue::Error(CellError::new(CellErrorKind::InvalidReference));
        assert_eq!(err.formatted(), "#REF!");
    }

    #[test]
    fn matrix_pads_short_rows() {
        let m = Matrix::from_rows(vec![
            vec![CellValue::Number(1.0), CellValue::Number(2.0)],
            vec![CellValue::Number(3.0)],
        ]);
        assert_eq!((m.width(), m.height()), (2, 2));
        assert_eq!(m.get(1, 1), &CellValue::Empty);
        assert_eq!(m.get(5, 5), &CellValue::Empty);
        let offsets: Vec<_> = m.iter().map(|(c, r, _)| (c, r)).collect();
        assert_eq!(offsets, vec![(0, 0), (1, 0), (0, 1)]);
    }

    #[test]
    fn matrix_stores_populated_cells_only() {
        let mut m = Matrix::new(u32::MAX, u32::MAX);
        assert_eq!(m.area(), u64::from(u32::MAX) * u64::from(u32::MAX));
        m.set(u32::MAX - 1, u32::MAX - 1, CellValue::Number(2.0));
        m.set(3, 0, CellValue::Number(1.0));
        m.set(4, 0, CellValue::Empty);
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(u32::MAX - 1, u32::MAX - 1), &CellValue::Number(2.0));
        assert_eq!(m.get(7, 7), &CellValue::Empty);

        let offsets: Vec<_> = m.iter().map(|(c, r, _)| (c, r)).collect();
        assert_eq!(offsets, vec![(3, 0), (u32::MAX - 1, u32::MAX - 1)]);

        m.set(3, 0, CellValue::Empty);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn pending_cell_carries_sentinel() {
        let cell = EvaluatedCell::pending("Loading...");
        assert!(cell.is_pending);
        assert_eq!(cell.formatted, "Loading...");
    }
}
