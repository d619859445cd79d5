use std::time::{Duration, Instant};

use cellgraph_common::{
    CellError, CellErrorKind, CellValue, EvaluatedCell, Matrix, Position, Range, SheetId, Zone,
};
use rustc_hash::{FxHashMap, FxHashSet};

use super::graph::DependencyGraph;
use super::pass::{Frame, Outcome, PassContext, Payload, PreviousSpill, SpillChange};
use super::pending::{AsyncHandle, AsyncRequest, PendingSet};
use super::spill::SpreadIndex;
use super::store::EvaluatedStore;
use super::{EngineError, EvalConfig};
use crate::function::{CallContext, CompiledFormula, FormulaInput, FormulaOutput};
use crate::traits::{CellContent, EvaluationContext, GridStructure};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalResult {
    /// Formula evaluations performed, summed over passes.
    pub computed_cells: usize,
    /// Distinct positions that ended up circular.
    pub cycle_errors: usize,
    pub passes: usize,
    /// `false` when the pass cap was hit with spill readers still stale.
    pub converged: bool,
    /// Positions waiting on async results after the last pass.
    pub pending: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
struct FormulaCell {
    text: String,
    compiled: Result<CompiledFormula, CellError>,
    generation: u64,
}

/// One declared range read for a callable.
struct RangeRead {
    input: FormulaInput,
    pending: bool,
    error: Option<(Position, CellError)>,
}

pub struct Engine<R> {
    ctx: R,
    pub config: EvalConfig,
    graph: DependencyGraph,
    spread: SpreadIndex,
    store: EvaluatedStore,
    formulas: FxHashMap<Position, FormulaCell>,
    pending: PendingSet,
    next_generation: u64,
    /// Cells released outside a pass whose readers still need a refresh.
    unsettled: Vec<Position>,
    built: bool,
}

impl<R> Engine<R>
where
    R: EvaluationContext,
{
    pub fn new(ctx: R, config: EvalConfig) -> Self {
        Self {
            ctx,
            config,
            graph: DependencyGraph::new(),
            spread: SpreadIndex::new(),
            store: EvaluatedStore::new(),
            formulas: FxHashMap::default(),
            pending: PendingSet::new(),
            next_generation: 0,
            unsettled: Vec::new(),
            built: false,
        }
    }

    pub fn context(&self) -> &R {
        &self.ctx
    }

    /// Mutable access to the host context. Content edits made here take
    /// effect once the edited positions go through [`Engine::evaluate_cells`].
    pub fn context_mut(&mut self) -> &mut R {
        &mut self.ctx
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /* ───────────────────────── graph maintenance ───────────────────────── */

    /// Full rebuild: recompile every formula, rewire every edge and drop all
    /// evaluated state. A formula whose text is unchanged at its position keeps
    /// its generation, so its async requests and results stay valid.
    pub fn build_dependency_graph(&mut self) {
        let _span = tracing::info_span!("build_dependency_graph").entered();
        let previous = std::mem::take(&mut self.formulas);
        self.graph.clear();
        self.store.clear();
        self.spread.clear();
        self.unsettled.clear();

        for sheet in self.ctx.sheet_ids() {
            let mut positions = self.ctx.positions(sheet);
            positions.sort_unstable();
            for position in positions {
                let Some(CellContent::Formula(text)) = self.ctx.content(position) else {
                    continue;
                };
                match previous.get(&position) {
                    Some(cell) if cell.text == text => {
                        self.wire_formula(position, text, cell.generation)
                    }
                    _ => self.install_formula(position, text),
                }
            }
        }
        for position in previous.keys() {
            if !self.formulas.contains_key(position) {
                self.pending.forget(*position);
            }
        }
        self.built = true;
        tracing::debug!(formulas = self.formulas.len(), "dependency graph built");
    }

    /// Rewire `position` after its raw content changed, without evaluating.
    pub fn update_dependencies(&mut self, position: Position) -> Result<(), EngineError> {
        self.check_position(position)?;
        let released = self.rewire(position);
        self.unsettled.extend(released);
        Ok(())
    }

    /// Row/column insertion or deletion, sheet removal: positions changed
    /// identity, so rebuild and re-evaluate everything. Resolved async values
    /// survive for formulas whose text did not change at their position.
    pub fn on_structure_changed(&mut self) -> Result<EvalResult, EngineError> {
        self.build_dependency_graph();
        self.evaluate_all_cells()
    }

    /// Compile and wire `text` under a fresh generation.
    fn install_formula(&mut self, position: Position, text: String) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.pending.restamp(position, generation);
        self.wire_formula(position, text, generation);
    }

    fn wire_formula(&mut self, position: Position, text: String, generation: u64) {
        let compiled = self.ctx.compile(&text, position);
        let dependencies = match &compiled {
            Ok(compiled) => compiled.dependencies.clone(),
            Err(_) => Vec::new(),
        };
        self.graph.set_dependencies(position, dependencies);
        self.store.remove(position);
        self.formulas.insert(
            position,
            FormulaCell {
                text,
                compiled,
                generation,
            },
        );
    }

    fn drop_formula(&mut self, position: Position) {
        self.formulas.remove(&position);
        self.graph.remove_position(position);
        self.pending.forget(position);
        self.store.remove(position);
    }

    /// Re-read the content of `position` and rewire it. Returns the cells its
    /// previous spill covered.
    fn rewire(&mut self, position: Position) -> Vec<Position> {
        let previous = self.release_origin(position);
        match self.ctx.content(position) {
            Some(CellContent::Formula(text)) => self.install_formula(position, text),
            _ => self.drop_formula(position),
        }
        let mut released: Vec<Position> = previous.cells.into_keys().collect();
        released.sort_unstable();
        released
    }

    /// Rewire only when the formula text actually changed.
    fn sync_content(&mut self, position: Position) -> Vec<Position> {
        let text = match self.ctx.content(position) {
            Some(CellContent::Formula(text)) => Some(text),
            _ => None,
        };
        let current = self.formulas.get(&position).map(|cell| cell.text.as_str());
        let released = if current != text.as_deref() {
            self.rewire(position)
        } else {
            Vec::new()
        };
        if !self.formulas.contains_key(&position) && self.spread.covering_origin(position).is_none()
        {
            self.store.remove(position);
        }
        released
    }

    fn release_origin(&mut self, origin: Position) -> PreviousSpill {
        let covered = self.spread.covered_cells(origin);
        let zone = self.spread.release_spill(origin);
        let cells = covered
            .into_iter()
            .filter_map(|cell| self.store.remove(cell).map(|value| (cell, value)))
            .collect();
        PreviousSpill { zone, cells }
    }

    /* ───────────────────────────── passes ───────────────────────────── */

    /// Cold full evaluation of every formula.
    pub fn evaluate_all_cells(&mut self) -> Result<EvalResult, EngineError> {
        let _span = tracing::info_span!("evaluate_all_cells").entered();
        if !self.built {
            self.build_dependency_graph();
        }
        self.pending.drain_completions();
        self.store.clear();
        self.spread.clear();
        self.unsettled.clear();

        let dirty: FxHashSet<Position> = self.graph.formula_positions().collect();
        Ok(self.run_passes(dirty))
    }

    /// Incremental pass after `positions` were edited.
    ///
    /// Also applies async completions delivered since the last pass, so
    /// `evaluate_cells(&[])` is how a host flushes resolved results.
    pub fn evaluate_cells(&mut self, positions: &[Position]) -> Result<EvalResult, EngineError> {
        let _span = tracing::info_span!("evaluate_cells", targets = positions.len()).entered();
        for &position in positions {
            self.check_position(position)?;
        }
        if !self.built {
            return self.evaluate_all_cells();
        }

        let mut seeds: FxHashSet<Position> = FxHashSet::default();
        let mut touched = std::mem::take(&mut self.unsettled);
        for &position in positions {
            touched.extend(self.sync_content(position));
            touched.push(position);
            if self.formulas.contains_key(&position) {
                seeds.insert(position);
            }
            if let Some(origin) = self.spread.covering_origin(position) {
                seeds.insert(origin);
            }
        }
        for position in self.pending.drain_completions() {
            if self.formulas.contains_key(&position) {
                seeds.insert(position);
            }
        }
        for &cell in &touched {
            seeds.extend(self.spread.blocked_wanting(cell));
        }

        let dirty = self.affected(seeds, touched);
        Ok(self.run_passes(dirty))
    }

    /// `seeds` plus every formula reading, directly or through a spill zone of
    /// a dirty origin, any seed or any `touched` cell.
    fn affected(&self, seeds: FxHashSet<Position>, touched: Vec<Position>) -> FxHashSet<Position> {
        let mut dirty = FxHashSet::default();
        let mut frontier = touched;
        let mut reached: Vec<Position> = seeds.into_iter().collect();
        loop {
            for position in reached.drain(..) {
                if dirty.insert(position) {
                    frontier.push(position);
                    frontier.extend(self.spread.covered_cells(position));
                }
            }
            if frontier.is_empty() {
                break;
            }
            reached.extend(self.graph.transitive_dependents(frontier.drain(..)));
        }
        dirty
    }

    fn pass_cap(&self) -> usize {
        self.config
            .max_passes
            .unwrap_or_else(|| (self.formulas.len() + 1).max(2))
            .max(1)
    }

    fn run_passes(&mut self, mut dirty: FxHashSet<Position>) -> EvalResult {
        let start = Instant::now();
        let cap = self.pass_cap();
        let mut result = EvalResult::default();
        let mut cycles: FxHashSet<Position> = FxHashSet::default();

        loop {
            result.passes += 1;
            let _span =
                tracing::debug_span!("pass", number = result.passes, dirty = dirty.len()).entered();
            let mut pass = PassContext::new(dirty);
            for position in pass.schedule() {
                self.evaluate(position, &mut pass);
            }
            result.computed_cells += pass.computed;
            cycles.extend(pass.circular());

            let stale = self.stale_readers(&pass);
            if stale.is_empty() {
                result.converged = true;
                break;
            }
            if result.passes >= cap {
                tracing::warn!(
                    passes = result.passes,
                    stale = stale.len(),
                    "spill relations did not settle; keeping last values"
                );
                break;
            }
            dirty = self.affected(stale, Vec::new());
        }

        result.cycle_errors = cycles.len();
        result.pending = self.pending.len();
        result.elapsed = start.elapsed();
        result
    }

    /// Formulas that read a spill cell before its value changed in this pass,
    /// plus blocked origins that ran before a cell they wanted was freed.
    fn stale_readers(&self, pass: &PassContext) -> FxHashSet<Position> {
        let mut stale = FxHashSet::default();
        for change in &pass.spill_changes {
            let readers = self
                .graph
                .get_dependents(change.cell)
                .into_iter()
                .chain(self.spread.blocked_wanting(change.cell));
            for reader in readers {
                if reader == change.origin {
                    continue;
                }
                let fresh = pass.done_seq(reader).is_some_and(|seq| seq > change.seq);
                if !fresh {
                    stale.insert(reader);
                }
            }
        }
        stale
    }

    /* ─────────────────────── single-position evaluation ─────────────────────── */

    fn needs_eval(&self, position: Position, pass: &PassContext) -> bool {
        self.formulas.contains_key(&position)
            && !pass.is_done(position)
            && pass.visiting_index(position).is_none()
            && (pass.is_dirty(position) || self.store.get(position).is_none())
    }

    /// Depth-first evaluation of `root` and whatever it needs, on an explicit
    /// work stack.
    fn evaluate(&mut self, root: Position, pass: &mut PassContext) {
        if !self.needs_eval(root, pass) {
            return;
        }
        let mut stack: Vec<Frame> = Vec::new();
        self.push_frame(root, &mut stack, pass);

        while let Some(top) = stack.last_mut() {
            match top.next_prereq() {
                Some(prereq) => {
                    if let Some(index) = pass.visiting_index(prereq) {
                        for frame in &stack[index..] {
                            pass.mark_circular(frame.position);
                        }
                    } else if self.needs_eval(prereq, pass) {
                        self.push_frame(prereq, &mut stack, pass);
                    }
                }
                None => {
                    if let Some(frame) = stack.pop() {
                        self.complete(frame, pass);
                    }
                }
            }
        }
    }

    fn push_frame(&mut self, position: Position, stack: &mut Vec<Frame>, pass: &mut PassContext) {
        let previous = self.release_origin(position);
        let prereqs = self.prerequisites(position);
        pass.enter(position, stack.len());
        stack.push(Frame::new(position, prereqs, previous));
    }

    /// Formula owners that must be DONE before `position` reads its inputs.
    fn prerequisites(&self, position: Position) -> Vec<Position> {
        let mut out = Vec::new();
        for range in self.graph.dependencies(position) {
            if !self.range_in_bounds(range) {
                continue;
            }
            if range.is_single_cell() {
                let cell = range.top_left();
                if self.formulas.contains_key(&cell) {
                    out.push(cell);
                } else if let Some(origin) = self.spread.covering_origin(cell) {
                    out.push(origin);
                }
            } else {
                out.extend(self.formulas_in(range));
                out.extend(self.spread.origins_intersecting(range.sheet, &range.zone));
            }
        }
        out
    }

    fn formulas_in(&self, range: &Range) -> Vec<Position> {
        let mut out: Vec<Position> = if range.zone.area() > self.formulas.len() as u64 {
            self.formulas
                .keys()
                .copied()
                .filter(|p| range.contains(*p))
                .collect()
        } else {
            range
                .positions()
                .filter(|p| self.formulas.contains_key(p))
                .collect()
        };
        out.sort_unstable();
        out
    }

    fn range_in_bounds(&self, range: &Range) -> bool {
        self.ctx.zone_in_bounds(range.sheet, &range.zone)
    }

    fn complete(&mut self, frame: Frame, pass: &mut PassContext) {
        let position = frame.position;
        let outcome = if pass.is_circular(position) {
            Outcome::Error(CellError::circular())
        } else {
            self.compute(position)
        };
        self.commit(position, outcome);
        let seq = pass.finish(position);
        self.record_spill_change(position, frame.previous, seq, pass);
    }

    fn compute(&mut self, position: Position) -> Outcome {
        let Some(cell) = self.formulas.get(&position) else {
            return Outcome::Value(Payload::Scalar(CellValue::Empty));
        };
        let generation = cell.generation;
        let compiled = match &cell.compiled {
            Ok(compiled) => compiled.clone(),
            Err(error) => return Outcome::Error(error.clone()),
        };

        if let Some(range) = compiled
            .dependencies
            .iter()
            .find(|range| !self.range_in_bounds(range))
        {
            return Outcome::Error(
                CellError::new(CellErrorKind::InvalidReference)
                    .with_message(format!("Reference {range} is outside the sheet")),
            );
        }

        let mut inputs = Vec::with_capacity(compiled.dependencies.len());
        let mut pending = false;
        let mut first_error = None;
        for range in &compiled.dependencies {
            let read = self.read_range(range);
            pending |= read.pending;
            if first_error.is_none() {
                first_error = read
                    .error
                    .map(|(source, error)| CellError::dependency(source, &error));
            }
            inputs.push(read.input);
        }
        if pending {
            return Outcome::Pending { waiting: false };
        }
        if let Some(error) = first_error.filter(|_| !compiled.callable.absorbs_errors()) {
            return Outcome::Error(error);
        }

        let structure: &dyn GridStructure = &self.ctx;
        let mut call = CallContext::new(position, generation, structure, &mut self.pending);
        match compiled.callable.call(&inputs, &mut call) {
            Ok(FormulaOutput::Scalar(value)) => Outcome::Value(Payload::Scalar(value)),
            Ok(FormulaOutput::Matrix(matrix)) => Outcome::Value(Payload::Array(matrix)),
            Ok(FormulaOutput::NotReady) => Outcome::Pending { waiting: true },
            Err(failure) => {
                let message = call.render_failure(&failure);
                Outcome::Error(CellError::new(CellErrorKind::ComputeError).with_message(message))
            }
        }
    }

    fn commit(&mut self, position: Position, outcome: Outcome) {
        let (cell, waiting) = match outcome {
            Outcome::Value(Payload::Scalar(value)) => (EvaluatedCell::new(value), false),
            Outcome::Value(Payload::Array(matrix)) => (self.spill(position, matrix), false),
            Outcome::Pending { waiting } => {
                (EvaluatedCell::pending(&self.config.loading_text), waiting)
            }
            Outcome::Error(error) => (EvaluatedCell::new(CellValue::Error(error)), false),
        };
        if waiting {
            self.pending.mark_waiting(position);
        } else {
            self.pending.mark_settled(position);
        }
        self.store.insert(position, cell);
    }

    /// Place a matrix result. Returns what the origin itself shows.
    fn spill(&mut self, origin: Position, matrix: Matrix) -> EvaluatedCell {
        if matrix.is_empty() {
            return EvaluatedCell::empty();
        }
        if matrix.is_scalar() {
            return EvaluatedCell::new(matrix.get(0, 0).clone());
        }

        let wanted = Zone::sized(origin.col, origin.row, matrix.width(), matrix.height());
        let in_bounds = wanted.is_some_and(|zone| self.ctx.zone_in_bounds(origin.sheet, &zone));
        let ctx = &self.ctx;
        match self
            .spread
            .claim_spill(origin, wanted, in_bounds, |cell| ctx.is_occupied(cell))
        {
            Ok(zone) => {
                for (col, row) in zone.cells() {
                    let cell = Position::new(origin.sheet, col, row);
                    if cell == origin {
                        continue;
                    }
                    let value = matrix.get(col - zone.left(), row - zone.top());
                    self.store.insert(cell, EvaluatedCell::new(value.clone()));
                }
                EvaluatedCell::new(matrix.get(0, 0).clone())
            }
            Err(conflict) => {
                tracing::debug!(origin = %origin, ?conflict, "spill blocked");
                EvaluatedCell::new(CellValue::Error(CellError::spill_blocked(
                    matrix.height(),
                    matrix.width(),
                )))
            }
        }
    }

    fn record_spill_change(
        &self,
        origin: Position,
        previous: PreviousSpill,
        seq: u64,
        pass: &mut PassContext,
    ) {
        if previous.zone.is_none() && self.spread.zone_of(origin).is_none() {
            return;
        }
        let mut cells: Vec<Position> = previous.cells.keys().copied().collect();
        cells.extend(self.spread.covered_cells(origin));
        cells.sort_unstable();
        cells.dedup();
        for cell in cells {
            if previous.cells.get(&cell) != self.store.get(cell) {
                pass.spill_changes.push(SpillChange { cell, origin, seq });
            }
        }
    }

    /* ───────────────────────────── reading ───────────────────────────── */

    fn read_cell(&self, position: Position) -> EvaluatedCell {
        if let Some(cell) = self.store.get(position) {
            return cell.clone();
        }
        match self.ctx.content(position) {
            Some(CellContent::Literal(value)) => EvaluatedCell::new(value),
            _ => EvaluatedCell::empty(),
        }
    }

    fn read_range(&self, range: &Range) -> RangeRead {
        if range.is_single_cell() {
            let position = range.top_left();
            let cell = self.read_cell(position);
            let error = cell.error().map(|error| (position, error.clone()));
            return RangeRead {
                pending: cell.is_pending,
                error,
                input: FormulaInput::Scalar(cell.value),
            };
        }

        let zone = range.zone;
        let content = self.ctx.positions(range.sheet);
        let cells: Vec<(Position, EvaluatedCell)> =
            if zone.area() > (content.len() + self.store.len()) as u64 {
                // Sparse: visit populated cells only.
                let mut found: FxHashMap<Position, EvaluatedCell> = content
                    .into_iter()
                    .filter(|p| range.contains(*p))
                    .map(|p| (p, self.read_cell(p)))
                    .collect();
                for (position, cell) in self.store.iter_zone(range.sheet, &zone) {
                    found.insert(position, cell.clone());
                }
                let mut cells: Vec<_> = found.into_iter().collect();
                cells.sort_unstable_by_key(|(position, _)| *position);
                cells
            } else {
                range.positions().map(|p| (p, self.read_cell(p))).collect()
            };

        let mut values = Matrix::new(zone.width(), zone.height());
        let mut pending = false;
        let mut error = None;
        for (position, cell) in cells {
            pending |= cell.is_pending;
            if error.is_none() {
                error = cell.error().map(|e| (position, e.clone()));
            }
            values.set(position.col - zone.left(), position.row - zone.top(), cell.value);
        }
        RangeRead {
            input: FormulaInput::Range {
                range: *range,
                values,
            },
            pending,
            error,
        }
    }

    /* ───────────────────────────── queries ───────────────────────────── */

    fn check_position(&self, position: Position) -> Result<(), EngineError> {
        let Some((cols, rows)) = self.ctx.sheet_size(position.sheet) else {
            return Err(EngineError::UnknownSheet(position.sheet));
        };
        if position.col >= cols || position.row >= rows {
            return Err(EngineError::OutOfBounds(position));
        }
        Ok(())
    }

    pub fn get_evaluated_cell(&self, position: Position) -> Result<EvaluatedCell, EngineError> {
        self.check_position(position)?;
        Ok(self.read_cell(position))
    }

    /// Every cell of `zone`, row-major.
    pub fn get_evaluated_cells_in_zone(
        &self,
        sheet: SheetId,
        zone: Zone,
    ) -> Result<Vec<(Position, EvaluatedCell)>, EngineError> {
        self.check_position(Position::new(sheet, zone.right(), zone.bottom()))?;
        Ok(Range::new(sheet, zone)
            .positions()
            .map(|position| (position, self.read_cell(position)))
            .collect())
    }

    /// Zone claimed by the origin at `position`, if it currently spills.
    pub fn get_spread_zone(&self, position: Position) -> Option<Zone> {
        self.spread.zone_of(position)
    }

    /// Origin whose spill covers `position` (an active origin covers itself).
    pub fn get_array_formula_spreading_on(&self, position: Position) -> Option<Position> {
        self.spread.get_spill_owner(position)
    }

    /* ─────────────────────────────── async ─────────────────────────────── */

    /// No position is waiting on an async result.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_positions(&self) -> Vec<Position> {
        self.pending.waiting_positions()
    }

    /// Requests issued since the last call, for the host to fulfil.
    pub fn take_async_requests(&mut self) -> Vec<AsyncRequest> {
        self.pending.take_requests()
    }

    pub fn async_handle(&self) -> AsyncHandle {
        self.pending.handle()
    }
}
