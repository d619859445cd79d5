//! Spread index: which origin owns which spill zone.
//!
//! Claims are mutually exclusive. A failed claim leaves nothing claimed and
//! remembers the zone the origin wanted, so that freeing any of those cells
//! later can re-schedule the blocked origin.

use cellgraph_common::{Position, SheetId, Zone};
use rustc_hash::FxHashMap;

/// Why a claim was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpillConflict {
    /// The zone leaves the sheet (or does not fit in `u32`).
    OutOfBounds,
    /// A cell of the zone holds content of its own.
    Occupied(Position),
    /// A cell of the zone is already covered by another origin.
    Claimed { cell: Position, by: Position },
}

#[derive(Debug, Default)]
pub struct SpreadIndex {
    /// origin → claimed zone
    zones: FxHashMap<Position, Zone>,
    /// covered cell (origin excluded) → origin
    owners: FxHashMap<Position, Position>,
    /// blocked origin → zone it wanted
    blocked: FxHashMap<Position, Zone>,
}

impl SpreadIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `zone` for `origin`. The origin's own cell is never checked.
    ///
    /// `zone == None` means the wanted rectangle overflowed the address
    /// space; it is treated as out of bounds.
    pub fn claim_spill<F>(
        &mut self,
        origin: Position,
        zone: Option<Zone>,
        in_bounds: bool,
        is_occupied: F,
    ) -> Result<Zone, SpillConflict>
    where
        F: Fn(Position) -> bool,
    {
        let Some(zone) = zone.filter(|_| in_bounds) else {
            if let Some(zone) = zone {
                self.blocked.insert(origin, zone);
            }
            return Err(SpillConflict::OutOfBounds);
        };

        let conflict = zone
            .cells()
            .map(|(col, row)| Position::new(origin.sheet, col, row))
            .filter(|&cell| cell != origin)
            .find_map(|cell| match self.owners.get(&cell) {
                Some(&by) if by != origin => Some(SpillConflict::Claimed { cell, by }),
                _ if is_occupied(cell) => Some(SpillConflict::Occupied(cell)),
                _ => None,
            });
        if let Some(conflict) = conflict {
            self.blocked.insert(origin, zone);
            return Err(conflict);
        }

        self.release_spill(origin);
        for (col, row) in zone.cells() {
            let cell = Position::new(origin.sheet, col, row);
            if cell != origin {
                self.owners.insert(cell, origin);
            }
        }
        self.zones.insert(origin, zone);
        Ok(zone)
    }

    /// Drop the claim (and any blocked record) of `origin`, returning the zone
    /// it covered.
    pub fn release_spill(&mut self, origin: Position) -> Option<Zone> {
        self.blocked.remove(&origin);
        let zone = self.zones.remove(&origin)?;
        for (col, row) in zone.cells() {
            let cell = Position::new(origin.sheet, col, row);
            if self.owners.get(&cell) == Some(&origin) {
                self.owners.remove(&cell);
            }
        }
        Some(zone)
    }

    /// The origin whose zone covers `position`; an active origin owns itself.
    pub fn get_spill_owner(&self, position: Position) -> Option<Position> {
        if self.zones.contains_key(&position) {
            return Some(position);
        }
        self.owners.get(&position).copied()
    }

    /// Owner of `position` when it is a covered cell other than the origin.
    pub fn covering_origin(&self, position: Position) -> Option<Position> {
        self.owners.get(&position).copied()
    }

    pub fn zone_of(&self, origin: Position) -> Option<Zone> {
        self.zones.get(&origin).copied()
    }

    /// Covered cells of `origin`, origin excluded, row-major.
    pub fn covered_cells(&self, origin: Position) -> Vec<Position> {
        self.zone_of(origin)
            .map(|zone| {
                zone.cells()
                    .map(|(col, row)| Position::new(origin.sheet, col, row))
                    .filter(|&cell| cell != origin)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Active origins whose zone intersects `zone` on `sheet`, row-major.
    pub fn origins_intersecting(&self, sheet: SheetId, zone: &Zone) -> Vec<Position> {
        let mut out: Vec<Position> = self
            .zones
            .iter()
            .filter(|(origin, claimed)| origin.sheet == sheet && claimed.intersects(zone))
            .map(|(origin, _)| *origin)
            .collect();
        out.sort_unstable();
        out
    }

    /// Blocked origins whose wanted zone contains `position`, row-major.
    pub fn blocked_wanting(&self, position: Position) -> Vec<Position> {
        let mut out: Vec<Position> = self
            .blocked
            .iter()
            .filter(|(origin, wanted)| {
                origin.sheet == position.sheet
                    && **origin != position
                    && wanted.contains(position.col, position.row)
            })
            .map(|(origin, _)| *origin)
            .collect();
        out.sort_unstable();
        out
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn clear(&mut self) {
        self.zones.clear();
        self.owners.clear();
        self.blocked.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(a1: &str) -> Position {
        Position::from_a1(0, a1).unwrap()
    }

    #[test]
    fn claim_covers_cells_and_release_frees_them() {
        let mut spread = SpreadIndex::new();
        let zone = Zone::sized(0, 0, 2, 1);
        assert_eq!(spread.claim_spill(pos("A1"), zone, true, |_| false), Ok(Zone::new(0, 0, 1, 0)));
        assert_eq!(spread.get_spill_owner(pos("B1")), Some(pos("A1")));
        assert_eq!(spread.get_spill_owner(pos("A1")), Some(pos("A1")));
        assert_eq!(spread.covering_origin(pos("A1")), None);
        assert_eq!(spread.covered_cells(pos("A1")), vec![pos("B1")]);

        assert_eq!(spread.release_spill(pos("A1")), Some(Zone::new(0, 0, 1, 0)));
        assert_eq!(spread.get_spill_owner(pos("B1")), None);
        assert!(spread.is_empty());
    }

    #[test]
    fn occupied_cell_blocks_and_is_remembered() {
        let mut spread = SpreadIndex::new();
        let b1 = pos("B1");
        let result = spread.claim_spill(pos("A1"), Zone::sized(0, 0, 2, 1), true, |p| p == b1);
        assert_eq!(result, Err(SpillConflict::Occupied(b1)));
        assert_eq!(spread.get_spill_owner(b1), None);
        assert_eq!(spread.blocked_wanting(b1), vec![pos("A1")]);
        assert!(spread.blocked_wanting(pos("C1")).is_empty());
    }

    #[test]
    fn first_claim_wins() {
        let mut spread = SpreadIndex::new();
        spread
            .claim_spill(pos("B1"), Zone::sized(1, 0, 1, 3), true, |_| false)
            .unwrap();
        let second = spread.claim_spill(pos("A2"), Zone::sized(0, 1, 3, 1), true, |_| false);
        assert_eq!(
            second,
            Err(SpillConflict::Claimed {
                cell: pos("B2"),
                by: pos("B1")
            })
        );
        assert_eq!(spread.get_spill_owner(pos("C2")), None);
        assert_eq!(spread.origins_intersecting(0, &Zone::new(0, 0, 5, 5)), vec![pos("B1")]);
    }

    #[test]
    fn reclaim_by_same_origin_is_allowed() {
        let mut spread = SpreadIndex::new();
        spread
            .claim_spill(pos("A1"), Zone::sized(0, 0, 1, 3), true, |_| false)
            .unwrap();
        assert_eq!(
            spread.claim_spill(pos("A1"), Zone::sized(0, 0, 1, 2), true, |_| false),
            Ok(Zone::new(0, 0, 0, 1))
        );
        assert_eq!(spread.zone_of(pos("A1")), Some(Zone::new(0, 0, 0, 1)));
        assert_eq!(spread.get_spill_owner(pos("A2")), Some(pos("A1")));
        assert_eq!(spread.get_spill_owner(pos("A3")), None);
        assert_eq!(spread.covered_cells(pos("A1")), vec![pos("A2")]);
    }

    #[test]
    fn out_of_bounds_claims_nothing() {
        let mut spread = SpreadIndex::new();
        let result = spread.claim_spill(pos("A1"), Zone::sized(0, 0, 1, 3), false, |_| false);
        assert_eq!(result, Err(SpillConflict::OutOfBounds));
        assert!(spread.is_empty());
        assert_eq!(spread.blocked_wanting(pos("A2")), vec![pos("A1")]);
        assert_eq!(spread.release_spill(pos("A1")), None);
        assert!(spread.blocked_wanting(pos("A2")).is_empty());
    }
}
