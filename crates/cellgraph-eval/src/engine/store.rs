use cellgraph_common::{EvaluatedCell, Position, SheetId, Zone};
use rustc_hash::FxHashMap;

/// Evaluated results for formula owners and spill-covered cells.
///
/// Plain literal cells have no entry; readers fall back to raw content.
#[derive(Debug, Default)]
pub struct EvaluatedStore {
    cells: FxHashMap<Position, EvaluatedCell>,
}

impl EvaluatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, position: Position) -> Option<&EvaluatedCell> {
        self.cells.get(&position)
    }

    pub fn insert(&mut self, position: Position, cell: EvaluatedCell) -> Option<EvaluatedCell> {
        self.cells.insert(position, cell)
    }

    pub fn remove(&mut self, position: Position) -> Option<EvaluatedCell> {
        self.cells.remove(&position)
    }

    /// Entries on `sheet` inside `zone`, unordered.
    pub fn iter_zone<'a>(
        &'a self,
        sheet: SheetId,
        zone: &'a Zone,
    ) -> impl Iterator<Item = (Position, &'a EvaluatedCell)> + 'a {
        self.cells
            .iter()
            .filter(move |(p, _)| p.sheet == sheet && zone.contains(p.col, p.row))
            .map(|(p, c)| (*p, c))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}
