//! Workbook access.
//!
//! The assay parser works on [`Sheet`], an owned grid of cells, so that it does
//! not depend on the spreadsheet library and can be exercised with in-memory
//! sheets. [`read_sheets`] fills `Sheet`s from a `.xls`/`.xlsx` file through
//! `calamine`.

use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};

use crate::error::FitError;

/// One spreadsheet cell, reduced to what the assay parser needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Numeric value; numeric text counts as a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            Cell::Text(s) => s.trim().parse().ok(),
            Cell::Empty => None,
        }
    }
}

static EMPTY: Cell = Cell::Empty;

/// Sparse-friendly owned cell grid addressed by absolute `(row, col)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cell at `(row, col)`; cells outside the stored area are empty.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    pub fn set(&mut self, row: usize, col: usize, cell: Cell) {
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let r = &mut self.rows[row];
        if r.len() <= col {
            r.resize(col + 1, Cell::Empty);
        }
        r[col] = cell;
    }

    pub fn set_text(&mut self, row: usize, col: usize, text: impl Into<String>) {
        self.set(row, col, Cell::Text(text.into()));
    }

    pub fn set_number(&mut self, row: usize, col: usize, value: f64) {
        self.set(row, col, Cell::Number(value));
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }
}

/// Read the named worksheets of a workbook, in the order requested.
pub fn read_sheets(path: &Path, names: &[&str]) -> Result<Vec<Sheet>, FitError> {
    if !path.exists() {
        return Err(FitError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "assay file not found"),
        ));
    }

    let mut workbook = open_workbook_auto(path).map_err(|e| {
        FitError::AssayMalformed(format!("failed to open workbook '{}': {e}", path.display()))
    })?;

    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let range = workbook.worksheet_range(name).map_err(|e| {
            FitError::AssayMalformed(format!("missing or unreadable sheet `{name}`: {e}"))
        })?;

        let mut sheet = Sheet::new();
        let (row0, col0) = range.start().unwrap_or((0, 0));
        for (i, row) in range.rows().enumerate() {
            for (j, value) in row.iter().enumerate() {
                let cell = match value {
                    Data::Int(v) => Cell::Number(*v as f64),
                    Data::Float(v) => Cell::Number(*v),
                    Data::String(s) => Cell::Text(s.clone()),
                    Data::Bool(b) => Cell::Text(b.to_string()),
                    // Error and date cells carry no reading.
                    _ => Cell::Empty,
                };
                if cell != Cell::Empty {
                    sheet.set(row0 as usize + i, col0 as usize + j, cell);
                }
            }
        }
        out.push(sheet);
    }

    Ok(out)
}
