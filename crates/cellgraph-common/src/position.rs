//! Addressing primitives: sheets, cell positions, rectangular zones and ranges.
//!
//! All coordinates are *zero-based*. `Position` orders row-major inside a sheet
//! (`sheet`, then `row`, then `col`), which is the scan order every evaluation
//! pass uses, so sorting a set of positions yields a reproducible schedule.

use core::cmp::Ordering;
use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Opaque sheet identity assigned by the host.
pub type SheetId = u32;

/// A single cell address.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Position {
    pub sheet: SheetId,
    pub col: u32,
    pub row: u32,
}

impl Position {
    #[inline]
    pub const fn new(sheet: SheetId, col: u32, row: u32) -> Self {
        Self { sheet, col, row }
    }

    /// Parse an A1-style cell name (`"B3"`) on the given sheet.
    pub fn from_a1(sheet: SheetId, name: &str) -> Option<Self> {
        let split = name.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = name.split_at(split);
        let col = letters_to_col(&letters.to_ascii_uppercase())?;
        let row = digits.parse::<u32>().ok()?.checked_sub(1)?;
        Some(Self::new(sheet, col, row))
    }

    /// Offset by unsigned deltas, `None` on overflow.
    #[inline]
    pub fn offset(self, dcol: u32, drow: u32) -> Option<Self> {
        Some(Self {
            sheet: self.sheet,
            col: self.col.checked_add(dcol)?,
            row: self.row.checked_add(drow)?,
        })
    }

    /// The degenerate zone made of this cell alone.
    #[inline]
    pub fn zone(self) -> Zone {
        Zone::cell(self.col, self.row)
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.sheet, self.row, self.col).cmp(&(other.sheet, other.row, other.col))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sheet != 0 {
            write!(f, "Sheet{}!", self.sheet)?;
        }
        write!(f, "{}{}", col_to_letters(self.col), self.row + 1)
    }
}

/// Inclusive rectangle of cells. `left <= right` and `top <= bottom` always
/// hold: every constructor normalizes its corners.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "[u32; 4]", into = "[u32; 4]"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Zone {
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

impl Zone {
    /// Build a zone from two corners given in any order.
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    #[inline]
    pub const fn cell(col: u32, row: u32) -> Self {
        Self {
            left: col,
            top: row,
            right: col,
            bottom: row,
        }
    }

    /// Zone anchored at `(col, row)` spanning `width × height` cells.
    /// Returns `None` when the far corner overflows `u32`.
    pub fn sized(col: u32, row: u32, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            left: col,
            top: row,
            right: col.checked_add(width - 1)?,
            bottom: row.checked_add(height - 1)?,
        })
    }

    #[inline]
    pub const fn left(&self) -> u32 {
        self.left
    }

    #[inline]
    pub const fn top(&self) -> u32 {
        self.top
    }

    #[inline]
    pub const fn right(&self) -> u32 {
        self.right
    }

    #[inline]
    pub const fn bottom(&self) -> u32 {
        self.bottom
    }

    /// Column count. `u32::MAX + 1` does not fit, so a zone spanning every
    /// column saturates at `u32::MAX`.
    pub fn width(&self) -> u32 {
        (self.right - self.left).saturating_add(1)
    }

    /// Row count, saturating like [`Zone::width`].
    pub fn height(&self) -> u32 {
        (self.bottom - self.top).saturating_add(1)
    }

    /// Number of cells covered, saturating at `u64::MAX`.
    pub fn area(&self) -> u64 {
        (u64::from(self.right - self.left) + 1)
            .saturating_mul(u64::from(self.bottom - self.top) + 1)
    }

    pub fn is_single_cell(&self) -> bool {
        self.left == self.right && self.top == self.bottom
    }

    #[inline]
    pub fn contains(&self, col: u32, row: u32) -> bool {
        col >= self.left && col <= self.right && row >= self.top && row <= self.bottom
    }

    pub fn intersects(&self, other: &Zone) -> bool {
        self.left <= other.right
            && other.left <= self.right
            && self.top <= other.bottom
            && other.top <= self.bottom
    }

    /// Cells of the zone in row-major order, as `(col, row)` pairs.
    pub fn cells(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let (left, right) = (self.left, self.right);
        (self.top..=self.bottom).flat_map(move |row| (left..=right).map(move |col| (col, row)))
    }
}

impl From<[u32; 4]> for Zone {
    /// `[left, top, right, bottom]`, corners in any order.
    fn from([left, top, right, bottom]: [u32; 4]) -> Self {
        Zone::new(left, top, right, bottom)
    }
}

impl From<Zone> for [u32; 4] {
    fn from(zone: Zone) -> Self {
        [zone.left, zone.top, zone.right, zone.bottom]
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_to_letters(self.left), self.top + 1)?;
        if !self.is_single_cell() {
            write!(f, ":{}{}", col_to_letters(self.right), self.bottom + 1)?;
        }
        Ok(())
    }
}

/// A zone on a specific sheet; the unit a formula declares as a dependency.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Range {
    pub sheet: SheetId,
    pub zone: Zone,
}

impl Range {
    #[inline]
    pub const fn new(sheet: SheetId, zone: Zone) -> Self {
        Self { sheet, zone }
    }

    pub fn cell(position: Position) -> Self {
        Self::new(position.sheet, position.zone())
    }

    /// Parse `"A1"` or `"A1:B5"` on the given sheet.
    pub fn from_a1(sheet: SheetId, text: &str) -> Option<Self> {
        match text.split_once(':') {
            Some((start, end)) => {
                let start = Position::from_a1(sheet, start)?;
                let end = Position::from_a1(sheet, end)?;
                Some(Self::new(
                    sheet,
                    Zone::new(start.col, start.row, end.col, end.row),
                ))
            }
            None => Position::from_a1(sheet, text).map(Self::cell),
        }
    }

    pub fn is_single_cell(&self) -> bool {
        self.zone.is_single_cell()
    }

    pub fn top_left(&self) -> Position {
        Position::new(self.sheet, self.zone.left, self.zone.top)
    }

    pub fn contains(&self, position: Position) -> bool {
        self.sheet == position.sheet && self.zone.contains(position.col, position.row)
    }

    /// Covered positions in row-major order.
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        let sheet = self.sheet;
        self.zone
            .cells()
            .map(move |(col, row)| Position::new(sheet, col, row))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sheet != 0 {
            write!(f, "Sheet{}!", self.sheet)?;
        }
        write!(f, "{}", self.zone)
    }
}

/// Convert a zero-based column index into letters (0 ⇒ A, 26 ⇒ AA).
pub fn col_to_letters(mut col: u32) -> String {
    let mut buf = String::new();
    loop {
        let rem = (col % 26) as u8;
        buf.push(char::from(b'A' + rem));
        col /= 26;
        if col == 0 {
            break;
        }
        col -= 1;
    }
    buf.chars().rev().collect()
}

/// Convert uppercase letters back into a zero-based column index.
pub fn letters_to_col(s: &str) -> Option<u32> {
    if s.is_empty() {
        return None;
    }
    let mut acc: u32 = 0;
    for ch in s.bytes() {
        if !ch.is_ascii_uppercase() {
            return None;
        }
        acc = acc.checked_mul(26)?.checked_add((ch - b'A') as u32 + 1)?;
    }
    Some(acc - 1)
}
