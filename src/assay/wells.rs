//! Well references and well selection.
//!
//! A reference is either a single well (`B3`) or an inclusive rectangle
//! (`C3:G4`). Row letters decode `A → 0, B → 1, …` and are case-insensitive;
//! column numbers are 1-based in text and 0-based internally.
//!
//! Selection has set semantics: the referenced wells are collected into an
//! ordered set, so duplicates and overlapping ranges count once and the mean
//! is summed in canonical (row, column) order regardless of how the list was
//! written.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::assay::WellMatrix;
use crate::error::FitError;

/// Zero-based plate position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WellPos {
    pub row: usize,
    pub col: usize,
}

impl WellPos {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Human label such as `B3`.
    pub fn label(&self) -> String {
        format!("{}{}", row_letter(self.row), self.col + 1)
    }
}

impl fmt::Display for WellPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", row_letter(self.row), self.col + 1)
    }
}

fn row_letter(row: usize) -> char {
    u8::try_from(row)
        .ok()
        .filter(|r| *r < 26)
        .map(|r| (b'A' + r) as char)
        .unwrap_or('?')
}

/// A single well or an inclusive rectangular range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellRef {
    Single(WellPos),
    Range { start: WellPos, end: WellPos },
}

impl WellRef {
    /// Every position covered by this reference, row-major.
    pub fn positions(&self) -> Vec<WellPos> {
        match *self {
            WellRef::Single(pos) => vec![pos],
            WellRef::Range { start, end } => {
                let mut out = Vec::with_capacity((end.row - start.row + 1) * (end.col - start.col + 1));
                for row in start.row..=end.row {
                    for col in start.col..=end.col {
                        out.push(WellPos::new(row, col));
                    }
                }
                out
            }
        }
    }
}

impl fmt::Display for WellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WellRef::Single(pos) => write!(f, "{pos}"),
            WellRef::Range { start, end } => write!(f, "{start}:{end}"),
        }
    }
}

impl FromStr for WellRef {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let invalid = || {
            FitError::ConfigInvalid(format!(
                "invalid well reference `{s}` (expected e.g. `B3` or `C3:G4`)"
            ))
        };

        match text.split_once(':') {
            None => parse_pos(text).map(WellRef::Single).ok_or_else(invalid),
            Some((a, b)) => {
                let start = parse_pos(a).ok_or_else(invalid)?;
                let end = parse_pos(b).ok_or_else(invalid)?;
                if start.row > end.row || start.col > end.col {
                    return Err(FitError::ConfigInvalid(format!(
                        "well range `{s}` must run from top-left to bottom-right"
                    )));
                }
                Ok(WellRef::Range { start, end })
            }
        }
    }
}

/// Parse `[A-Za-z][0-9]{1,2}`.
fn parse_pos(text: &str) -> Option<WellPos> {
    let mut chars = text.chars();
    let letter = chars.next()?;
    if !letter.is_ascii_alphabetic() {
        return None;
    }
    let digits = chars.as_str();
    if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let col: usize = digits.parse().ok()?;
    if col == 0 {
        return None;
    }
    let row = (letter.to_ascii_uppercase() as u8 - b'A') as usize;
    Some(WellPos::new(row, col - 1))
}

/// Parse a list of reference strings.
pub fn parse_well_refs<S: AsRef<str>>(refs: &[S]) -> Result<Vec<WellRef>, FitError> {
    refs.iter().map(|r| r.as_ref().parse()).collect()
}

/// Average the selected wells into one series of length `cycles`.
///
/// Fails with `SelectionOutOfRange` if a reference leaves the plate and with
/// `SelectionBlank` if any selected well has a blank reading.
pub fn select_wells(matrix: &WellMatrix, refs: &[WellRef]) -> Result<Vec<f64>, FitError> {
    if refs.is_empty() {
        return Err(FitError::ConfigInvalid("empty well selection".to_string()));
    }

    let mut wells = BTreeSet::new();
    for r in refs {
        for pos in r.positions() {
            if pos.row >= matrix.rows() || pos.col >= matrix.cols() {
                return Err(FitError::SelectionOutOfRange {
                    well: pos.label(),
                    rows: matrix.rows(),
                    cols: matrix.cols(),
                });
            }
            wells.insert(pos);
        }
    }

    let mut sum = vec![0.0; matrix.cycles()];
    for pos in &wells {
        for (acc, reading) in sum.iter_mut().zip(matrix.series(pos.row, pos.col)) {
            match reading {
                Some(v) if v.is_finite() => *acc += v,
                _ => return Err(FitError::SelectionBlank { well: pos.label() }),
            }
        }
    }

    let n = wells.len() as f64;
    Ok(sum.into_iter().map(|s| s / n).collect())
}
