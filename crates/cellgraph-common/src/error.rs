//! Cell-level error representation.
//!
//! - **`CellErrorKind`** : the error taxonomy the evaluator can assign
//! - **`CellErrorExtra`**: per-kind payload (spill size, dependency source)
//! - **`CellError`**     : kind + optional message + extra
//!
//! These errors are *data*: they are stored inside an evaluated cell and never
//! cross the public API as a Rust `Err`.

use std::{error::Error, fmt};

use crate::{CellValue, Position};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Placeholder a callable may leave in a failure message; the evaluator
/// replaces it with the name of the function that was executing.
pub const FUNCTION_NAME_PLACEHOLDER: &str = "[[FUNCTION_NAME]]";

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CellErrorKind {
    /// Found on a revisit of a cell that is still being evaluated.
    CircularReference,
    /// Unknown sheet or a range outside the sheet bounds.
    InvalidReference,
    /// An input of the formula is itself an error.
    DependencyError,
    /// A matrix result would overwrite occupied cells.
    SpillBlocked,
    /// The callable raised.
    ComputeError,
}

impl CellErrorKind {
    /// Code shown in the grid.
    pub fn code(self) -> &'static str {
        match self {
            Self::CircularReference => "#CIRC!",
            Self::InvalidReference => "#REF!",
            Self::DependencyError => "#ERROR!",
            Self::SpillBlocked => "#SPILL!",
            Self::ComputeError => "#ERROR!",
        }
    }
}

impl fmt::Display for CellErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Kind-specific payloads.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum CellErrorExtra {
    #[default]
    None,

    /// `SpillBlocked`: the size the result wanted.
    Spill { expected_rows: u32, expected_cols: u32 },

    /// `DependencyError`: the input that was in error and its own kind,
    /// so the grid can show the root cause's code.
    Dependency {
        source: Position,
        source_kind: CellErrorKind,
    },
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellError {
    pub kind: CellErrorKind,
    pub message: Option<String>,
    pub extra: CellErrorExtra,
}

impl From<CellErrorKind> for CellError {
    fn from(kind: CellErrorKind) -> Self {
        Self {
            kind,
            message: None,
            extra: CellErrorExtra::None,
        }
    }
}

impl CellError {
    pub fn new(kind: CellErrorKind) -> Self {
        kind.into()
    }

    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    pub fn with_extra(mut self, extra: CellErrorExtra) -> Self {
        self.extra = extra;
        self
    }

    pub fn circular() -> Self {
        Self::new(CellErrorKind::CircularReference).with_message("Circular reference")
    }

    pub fn spill_blocked(expected_rows: u32, expected_cols: u32) -> Self {
        Self::new(CellErrorKind::SpillBlocked)
            .with_message("Array result was not expanded because it would overwrite data")
            .with_extra(CellErrorExtra::Spill {
                expected_rows,
                expected_cols,
            })
    }

    /// Error propagated from the input at `source`.
    ///
    /// The root cause is kept when the input was already a propagated error.
    pub fn dependency(source: Position, upstream: &CellError) -> Self {
        let (source, source_kind) = match upstream.extra {
            CellErrorExtra::Dependency {
                source,
                source_kind,
            } => (source, source_kind),
            _ => (source, upstream.kind),
        };
        let mut err = Self::new(CellErrorKind::DependencyError)
            .with_extra(CellErrorExtra::Dependency {
                source,
                source_kind,
            });
        err.message = upstream.message.clone();
        err
    }

    /// Code displayed for this error. Dependency errors show their root cause.
    pub fn code(&self) -> &'static str {
        match self.extra {
            CellErrorExtra::Dependency { source_kind, .. } => source_kind.code(),
            _ => self.kind.code(),
        }
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())?;

        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }

        match &self.extra {
            CellErrorExtra::None => {}
            CellErrorExtra::Spill {
                expected_rows,
                expected_cols,
            } => {
                write!(f, " [spill {expected_rows}×{expected_cols}]")?;
            }
            CellErrorExtra::Dependency { source, .. } => {
                write!(f, " [from {source}]")?;
            }
        }

        Ok(())
    }
}

impl Error for CellError {}

impl From<CellError> for CellValue {
    fn from(error: CellError) -> Self {
        CellValue::Error(error)
    }
}

impl PartialEq<CellErrorKind> for CellError {
    fn eq(&self, other: &CellErrorKind) -> bool {
        self.kind == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_error_keeps_root_cause() {
        let a1 = Position::new(0, 0, 0);
        let a2 = Position::new(0, 0, 1);
        let root = CellError::circular();
        let first = CellError::dependency(a1, &root);
        let second = CellError::dependency(a2, &first);
        assert_eq!(second.kind, CellErrorKind::DependencyError);
        assert_eq!(second.code(), "#CIRC!");
        assert_eq!(
            second.extra,
            CellErrorExtra::Dependency {
                source: a1,
                source_kind: CellErrorKind::CircularReference
            }
        );
    }

    #[test]
    fn display_includes_spill_size() {
        let err = CellError::spill_blocked(1, 2);
        assert!(err.to_string().starts_with("#SPILL!"));
        assert!(err.to_string().ends_with("[spill 1×2]"));
    }
}
