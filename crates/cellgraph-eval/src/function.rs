//! Compiled-formula interface: what the external compiler hands the engine and
//! what the engine hands back to the callable while it runs.

use std::fmt;
use std::sync::Arc;

use cellgraph_common::{CellValue, FUNCTION_NAME_PLACEHOLDER, Matrix, Position, Range, SheetId};

use crate::engine::pending::{AsyncState, PendingSet};
use crate::traits::GridStructure;

bitflags::bitflags! {
    /// Capabilities a callable declares to the engine.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct FnCaps: u8 {
        /// Error inputs are passed through instead of short-circuiting into
        /// a dependency error (`IFERROR`, `ISERROR`, ...).
        const ABSORBS_ERRORS = 0b0000_0001;
    }
}

/// One resolved dependency, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaInput {
    /// Value of a single-cell range.
    Scalar(CellValue),
    /// Values of a multi-cell range. Stored sparsely: cells without content
    /// read as `Empty` through [`Matrix::get`].
    Range { range: Range, values: Matrix },
}

impl FormulaInput {
    pub fn as_scalar(&self) -> Option<&CellValue> {
        match self {
            FormulaInput::Scalar(v) => Some(v),
            FormulaInput::Range { .. } => None,
        }
    }

    /// Populated values carried by the input, row-major. Empty cells of a
    /// range are skipped.
    pub fn values(&self) -> Box<dyn Iterator<Item = &CellValue> + '_> {
        match self {
            FormulaInput::Scalar(v) => Box::new(std::iter::once(v)),
            FormulaInput::Range { values, .. } => Box::new(values.iter().map(|(_, _, v)| v)),
        }
    }
}

/// Successful callable result.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaOutput {
    Scalar(CellValue),
    /// Array result; anything larger than 1×1 spills from the formula cell.
    Matrix(Matrix),
    /// The callable is waiting on an async result it requested through
    /// [`CallContext::await_async`].
    NotReady,
}

impl From<CellValue> for FormulaOutput {
    fn from(v: CellValue) -> Self {
        FormulaOutput::Scalar(v)
    }
}

/// Failure raised by a callable. Becomes a `ComputeError` cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaFailure {
    pub message: String,
}

impl FormulaFailure {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for FormulaFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FormulaFailure {}

pub type FormulaResult = Result<FormulaOutput, FormulaFailure>;

/// The compiled, callable form of a formula.
pub trait FormulaFn: Send + Sync {
    fn call(&self, inputs: &[FormulaInput], ctx: &mut CallContext<'_>) -> FormulaResult;

    fn caps(&self) -> FnCaps {
        FnCaps::empty()
    }

    /// Whether error inputs reach the callable instead of short-circuiting.
    fn absorbs_errors(&self) -> bool {
        self.caps().contains(FnCaps::ABSORBS_ERRORS)
    }
}

impl<F> FormulaFn for F
where
    F: Fn(&[FormulaInput], &mut CallContext<'_>) -> FormulaResult + Send + Sync,
{
    fn call(&self, inputs: &[FormulaInput], ctx: &mut CallContext<'_>) -> FormulaResult {
        self(inputs, ctx)
    }
}

/// Wraps a callable to declare extra capabilities.
pub struct WithCaps<F> {
    inner: F,
    caps: FnCaps,
}

impl<F: FormulaFn> WithCaps<F> {
    pub fn new(inner: F, caps: FnCaps) -> Self {
        Self { inner, caps }
    }
}

impl<F: FormulaFn> FormulaFn for WithCaps<F> {
    fn call(&self, inputs: &[FormulaInput], ctx: &mut CallContext<'_>) -> FormulaResult {
        self.inner.call(inputs, ctx)
    }

    fn caps(&self) -> FnCaps {
        self.caps | self.inner.caps()
    }
}

/// Output of the external compiler.
#[derive(Clone)]
pub struct CompiledFormula {
    pub callable: Arc<dyn FormulaFn>,
    pub dependencies: Vec<Range>,
}

impl CompiledFormula {
    pub fn new<F: FormulaFn + 'static>(callable: F, dependencies: Vec<Range>) -> Self {
        Self {
            callable: Arc::new(callable),
            dependencies,
        }
    }
}

impl fmt::Debug for CompiledFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFormula")
            .field("caps", &self.callable.caps())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Per-call context. Lives for exactly one callable invocation.
pub struct CallContext<'a> {
    position: Position,
    generation: u64,
    structure: &'a dyn GridStructure,
    pending: &'a mut PendingSet,
    function_name: Option<String>,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(
        position: Position,
        generation: u64,
        structure: &'a dyn GridStructure,
        pending: &'a mut PendingSet,
    ) -> Self {
        Self {
            position,
            generation,
            structure,
            pending,
            function_name: None,
        }
    }

    /// Position of the formula being evaluated.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Record the function currently executing, used in failure messages.
    pub fn enter_function(&mut self, name: &str) {
        self.function_name = Some(name.to_string());
    }

    pub fn function_name(&self) -> Option<&str> {
        self.function_name.as_deref()
    }

    pub fn sheet_size(&self, sheet: SheetId) -> Option<(u32, u32)> {
        self.structure.sheet_size(sheet)
    }

    pub fn is_row_hidden(&self, sheet: SheetId, row: u32) -> bool {
        self.structure.is_row_hidden(sheet, row)
    }

    pub fn is_col_hidden(&self, sheet: SheetId, col: u32) -> bool {
        self.structure.is_col_hidden(sheet, col)
    }

    /// Look up the async result identified by `key` for this cell.
    ///
    /// The first call for a key issues a request to the host and returns
    /// [`AsyncState::Pending`]; the callable should then return
    /// [`FormulaOutput::NotReady`]. Once the host resolves the request, a later
    /// pass sees [`AsyncState::Resolved`] or [`AsyncState::Rejected`].
    pub fn await_async(&mut self, key: &str) -> AsyncState {
        self.pending.lookup(self.position, self.generation, key)
    }

    /// Substitute the executing function name into a failure message.
    pub(crate) fn render_failure(&self, failure: &FormulaFailure) -> String {
        let name = self.function_name.as_deref().unwrap_or("formula");
        failure.message.replace(FUNCTION_NAME_PLACEHOLDER, name)
    }
}
