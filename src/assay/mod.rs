//! Plate-reader assay data.
//!
//! - [`WellMatrix`]: raw readings indexed by plate row, plate column and cycle
//! - [`Assay`]: protocol metadata, the time grid and the well matrix
//! - [`parse_assay`]: reads an assay out of the "Protocol Information" and
//!   "DATA" sheets of an instrument export
//!
//! The DATA sheet holds one block per cycle. Block `k` starts at row
//! `12 + (R + 4)·k` with a `Cycle n (…)` header in column 0; the `R × Cc`
//! readings follow at rows `15 + (R + 4)·k + i`, columns `1..=Cc`.

use std::path::Path;

use crate::error::FitError;
use crate::io::workbook::{Cell, Sheet, read_sheets};

pub mod cycle_time;
pub mod wells;

pub use cycle_time::{CycleTime, cycle_seconds, parse_cycle_time};
pub use wells::{WellPos, WellRef, parse_well_refs, select_wells};

pub const PROTOCOL_SHEET: &str = "Protocol Information";
pub const DATA_SHEET: &str = "DATA";

const TEST_NAME_PREFIX: &str = "Test Name: ";
const FIRST_BLOCK_ROW: usize = 12;
const READINGS_OFFSET: usize = 3;
const BLOCK_PADDING: usize = 4;

/// Plate geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlateLayout {
    pub rows: usize,
    pub cols: usize,
}

impl PlateLayout {
    pub fn new(rows: usize, cols: usize) -> Result<Self, FitError> {
        if !(1..=26).contains(&rows) || cols == 0 {
            return Err(FitError::ConfigInvalid(format!(
                "plate geometry {rows}x{cols} is not supported (rows 1..=26, cols >= 1)"
            )));
        }
        Ok(Self { rows, cols })
    }

    fn header_row(&self, cycle: usize) -> usize {
        FIRST_BLOCK_ROW + (self.rows + BLOCK_PADDING) * cycle
    }
}

impl Default for PlateLayout {
    fn default() -> Self {
        Self { rows: 8, cols: 12 }
    }
}

/// Readings shaped `(rows, cols, cycles)`; `None` marks a blank cell.
///
/// Stored well-major so one well's time series is a contiguous slice.
#[derive(Debug, Clone, PartialEq)]
pub struct WellMatrix {
    rows: usize,
    cols: usize,
    cycles: usize,
    data: Vec<Option<f64>>,
}

impl WellMatrix {
    /// A matrix with every reading blank.
    pub fn new(rows: usize, cols: usize, cycles: usize) -> Self {
        Self {
            rows,
            cols,
            cycles,
            data: vec![None; rows * cols * cycles],
        }
    }

    fn offset(&self, row: usize, col: usize) -> usize {
        (row * self.cols + col) * self.cycles
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn cycles(&self) -> usize {
        self.cycles
    }

    /// # Panics
    /// Panics if the position is outside the matrix.
    pub fn set(&mut self, row: usize, col: usize, cycle: usize, value: Option<f64>) {
        assert!(row < self.rows && col < self.cols && cycle < self.cycles);
        let idx = self.offset(row, col) + cycle;
        self.data[idx] = value;
    }

    pub fn get(&self, row: usize, col: usize, cycle: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols || cycle >= self.cycles {
            return None;
        }
        self.data[self.offset(row, col) + cycle]
    }

    /// Time series of one well.
    ///
    /// # Panics
    /// Panics if the well is outside the matrix.
    pub fn series(&self, row: usize, col: usize) -> &[Option<f64>] {
        assert!(row < self.rows && col < self.cols);
        let start = self.offset(row, col);
        &self.data[start..start + self.cycles]
    }

    /// Number of blank readings.
    pub fn blank_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_none()).count()
    }
}

/// A loaded assay. Immutable after parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct Assay {
    pub test_name: String,
    pub measurement: String,
    /// Cycle interval from the protocol sheet, in seconds.
    pub cycle_interval: Option<f64>,
    /// Elapsed seconds per cycle, strictly increasing.
    pub time: Vec<f64>,
    pub wells: WellMatrix,
}

impl Assay {
    pub fn cycles(&self) -> usize {
        self.time.len()
    }
}

/// Load an assay workbook (`.xls` or `.xlsx`).
pub fn load_assay(path: &Path, layout: PlateLayout) -> Result<Assay, FitError> {
    let sheets = read_sheets(path, &[PROTOCOL_SHEET, DATA_SHEET])?;
    match sheets.as_slice() {
        [protocol, data] => parse_assay(protocol, data, layout),
        _ => Err(FitError::AssayMalformed(
            "expected protocol and data sheets".to_string(),
        )),
    }
}

/// Parse an assay from its protocol and data sheets.
pub fn parse_assay(protocol: &Sheet, data: &Sheet, layout: PlateLayout) -> Result<Assay, FitError> {
    let test_name = match protocol.cell(3, 0) {
        Cell::Text(s) => match s.strip_prefix(TEST_NAME_PREFIX) {
            Some(name) => name.trim().to_string(),
            None => {
                log::warn!("Test name cell lacks the `{TEST_NAME_PREFIX}` prefix: {s:?}");
                s.trim().to_string()
            }
        },
        _ => String::new(),
    };

    let measurement = match protocol.cell(11, 1) {
        Cell::Text(s) => s.trim().to_string(),
        Cell::Number(v) => v.to_string(),
        Cell::Empty => String::new(),
    };

    let cycles = protocol
        .cell(17, 1)
        .as_number()
        .filter(|v| v.fract() == 0.0 && *v >= 0.0)
        .ok_or_else(|| {
            FitError::AssayMalformed(format!(
                "cycle count cell holds {:?}, expected a non-negative integer",
                protocol.cell(17, 1)
            ))
        })? as usize;
    if cycles < 2 {
        return Err(FitError::AssayMalformed(format!(
            "assay has {cycles} cycle(s); at least 2 are needed"
        )));
    }

    // Every cycle block needs at least one row, and the last block must be there.
    if cycles > data.n_rows() {
        return Err(FitError::AssayMalformed(format!(
            "protocol declares {cycles} cycles but the data sheet has only {} rows",
            data.n_rows()
        )));
    }
    let last_row = layout.header_row(cycles - 1);
    if header_text(data.cell(last_row, 0)).is_none() {
        return Err(FitError::AssayMalformed(format!(
            "protocol declares {cycles} cycles but there is no cycle header at row {}",
            last_row + 1
        )));
    }

    let cycle_interval = protocol.cell(18, 1).as_number();

    let mut time: Vec<f64> = Vec::with_capacity(cycles);
    let mut wells = WellMatrix::new(layout.rows, layout.cols, cycles);

    for k in 0..cycles {
        let header_row = layout.header_row(k);
        let header = header_text(data.cell(header_row, 0)).ok_or_else(|| {
            FitError::AssayMalformed(format!(
                "no cycle header at row {} for cycle {} (found {:?})",
                header_row + 1,
                k + 1,
                data.cell(header_row, 0)
            ))
        })?;
        let parsed = parse_cycle_time(header)?;
        if parsed.cycle as usize != k + 1 {
            log::warn!(
                "Cycle header at row {} reads cycle {} but block {} was expected.",
                header_row + 1,
                parsed.cycle,
                k + 1
            );
        }

        let seconds = parsed.seconds as f64;
        if let Some(&prev) = time.last()
            && seconds <= prev
        {
            return Err(FitError::AssayMalformed(format!(
                "time grid is not strictly increasing at cycle {} ({prev} s then {seconds} s)",
                k + 1
            )));
        }
        time.push(seconds);

        let first = header_row + READINGS_OFFSET;
        for i in 0..layout.rows {
            for j in 0..layout.cols {
                let reading = data.cell(first + i, 1 + j).as_number();
                wells.set(i, j, k, reading);
            }
        }
    }

    log::debug!(
        "Parsed {cycles} cycles over {} s; {} blank readings.",
        time.last().copied().unwrap_or(0.0),
        wells.blank_count()
    );

    Ok(Assay {
        test_name,
        measurement,
        cycle_interval,
        time,
        wells,
    })
}

fn header_text(cell: &Cell) -> Option<&str> {
    cell.as_text().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build protocol and data sheets in the instrument's layout.
    pub(crate) fn fixture_sheets(
        layout: PlateLayout,
        headers: &[&str],
        reading: impl Fn(usize, usize, usize) -> Option<f64>,
    ) -> (Sheet, Sheet) {
        let mut protocol = Sheet::new();
        protocol.set_text(3, 0, "Test Name: kinetics");
        protocol.set_text(11, 1, "Fluorescence (FI)");
        protocol.set_number(17, 1, headers.len() as f64);
        protocol.set_number(18, 1, 60.0);

        let mut data = Sheet::new();
        for (k, header) in headers.iter().enumerate() {
            let row = layout.header_row(k);
            data.set_text(row, 0, *header);
            for i in 0..layout.rows {
                for j in 0..layout.cols {
                    if let Some(v) = reading(i, j, k) {
                        data.set_number(row + 3 + i, 1 + j, v);
                    }
                }
            }
        }
        (protocol, data)
    }

    #[test]
    fn parses_blocks_and_time_grid() {
        let layout = PlateLayout::default();
        let headers = ["Cycle 1 (0 s)", "Cycle 2 (1 min)", "Cycle 3 (1 h 2 min 3 s)"];
        let (protocol, data) =
            fixture_sheets(layout, &headers, |i, j, k| Some((i * 100 + j * 10 + k) as f64));

        let assay = parse_assay(&protocol, &data, layout).unwrap();
        assert_eq!(assay.test_name, "kinetics");
        assert_eq!(assay.measurement, "Fluorescence (FI)");
        assert_eq!(assay.cycle_interval, Some(60.0));
        assert_eq!(assay.time, vec![0.0, 60.0, 3723.0]);
        assert_eq!(assay.wells.get(2, 5, 1), Some(251.0));
        assert_eq!(assay.wells.get(7, 11, 2), Some(812.0));
        assert_eq!(assay.wells.blank_count(), 0);
    }

    #[test]
    fn blank_cells_become_missing() {
        let layout = PlateLayout::new(2, 3).unwrap();
        let headers = ["Cycle 1 (0 s)", "Cycle 2 (30 s)"];
        let (protocol, data) = fixture_sheets(layout, &headers, |i, j, k| {
            if (i, j, k) == (1, 2, 1) { None } else { Some(1.0) }
        });

        let assay = parse_assay(&protocol, &data, layout).unwrap();
        assert_eq!(assay.wells.get(1, 2, 1), None);
        assert_eq!(assay.wells.blank_count(), 1);
    }

    #[test]
    fn misplaced_header_is_malformed() {
        let layout = PlateLayout::default();
        let headers = ["Cycle 1 (0 s)", "Cycle 2 (1 min)"];
        let (protocol, data) = fixture_sheets(layout, &headers, |_, _, _| Some(1.0));

        // A template with a different block stride no longer lines up.
        let wrong = PlateLayout::new(6, 12).unwrap();
        let err = parse_assay(&protocol, &data, wrong).unwrap_err();
        assert!(matches!(err, FitError::AssayMalformed(_)));
    }

    #[test]
    fn non_increasing_time_is_malformed() {
        let layout = PlateLayout::default();
        let headers = ["Cycle 1 (1 min)", "Cycle 2 (1 min)"];
        let (protocol, data) = fixture_sheets(layout, &headers, |_, _, _| Some(1.0));
        let err = parse_assay(&protocol, &data, layout).unwrap_err();
        assert!(matches!(err, FitError::AssayMalformed(_)));
    }

    #[test]
    fn declared_cycles_must_exist_in_the_data_sheet() {
        let layout = PlateLayout::default();
        let headers = ["Cycle 1 (0 s)", "Cycle 2 (1 min)"];

        // A corrupt count with an empty data sheet fails before any allocation.
        let (mut protocol, _) = fixture_sheets(layout, &headers, |_, _, _| Some(1.0));
        protocol.set_number(17, 1, 1e12);
        let err = parse_assay(&protocol, &Sheet::new(), layout).unwrap_err();
        assert!(matches!(err, FitError::AssayMalformed(ref m) if m.contains("1000000000000 cycles")), "{err}");

        // One block more than the sheet holds.
        let (mut protocol, data) = fixture_sheets(layout, &headers, |_, _, _| Some(1.0));
        protocol.set_number(17, 1, 3.0);
        let err = parse_assay(&protocol, &data, layout).unwrap_err();
        assert!(matches!(err, FitError::AssayMalformed(ref m) if m.contains("no cycle header")), "{err}");
    }

    #[test]
    fn single_cycle_is_rejected() {
        let layout = PlateLayout::default();
        let (protocol, data) = fixture_sheets(layout, &["Cycle 1 (0 s)"], |_, _, _| Some(1.0));
        assert!(parse_assay(&protocol, &data, layout).is_err());
    }

    #[test]
    fn plate_layout_bounds() {
        assert!(PlateLayout::new(0, 12).is_err());
        assert!(PlateLayout::new(27, 12).is_err());
        assert!(PlateLayout::new(8, 0).is_err());
        assert!(PlateLayout::new(16, 24).is_ok());
    }
}
