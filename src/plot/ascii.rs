//! Terminal plot of the normalised signal against the fitted trajectory.
//!
//! Fixed-size character grid, deterministic (the snapshot test below pins it).
//! The fitted curve is drawn first as `-` segments; observations are stamped
//! over it as `o`.

use crate::domain::ReportData;

const MIN_WIDTH: usize = 10;
const MIN_HEIGHT: usize = 5;

/// Render observed data and the fitted trajectory against time.
pub fn render_ascii_plot(report: &ReportData, width: usize, height: usize) -> String {
    let t_span = span(report.time.iter().copied()).unwrap_or((0.0, 1.0));
    let (lo, hi) = span(report.observed.iter().chain(&report.fitted).copied()).unwrap_or((0.0, 1.0));
    let pad = ((hi - lo) * 0.05).max(1e-12);

    let mut grid = Grid::new(width.max(MIN_WIDTH), height.max(MIN_HEIGHT), t_span, (lo - pad, hi + pad));

    let mut last = None;
    for (t, y) in finite(&report.time, &report.fitted) {
        let at = grid.cell(t, y);
        grid.segment(last.unwrap_or(at), at, '-');
        last = Some(at);
    }
    for (t, y) in finite(&report.time, &report.observed) {
        let (row, col) = grid.cell(t, y);
        grid.cells[row][col] = 'o';
    }

    let mut out = format!(
        "t: {:.1}..{:.1} s | y: {:.3}..{:.3} | o data, - fit\n",
        grid.t.0, grid.t.1, grid.y.0, grid.y.1
    );
    for row in &grid.cells {
        out.extend(row.iter());
        out.push('\n');
    }
    out
}

struct Grid {
    cells: Vec<Vec<char>>,
    t: (f64, f64),
    y: (f64, f64),
}

impl Grid {
    fn new(width: usize, height: usize, t: (f64, f64), y: (f64, f64)) -> Self {
        Self {
            cells: vec![vec![' '; width]; height],
            t,
            y,
        }
    }

    /// `(row, col)` of a data point; row 0 is the top of the plot.
    fn cell(&self, t: f64, y: f64) -> (usize, usize) {
        let last_col = (self.cells[0].len() - 1) as f64;
        let last_row = (self.cells.len() - 1) as f64;
        let u = ((t - self.t.0) / (self.t.1 - self.t.0)).clamp(0.0, 1.0);
        let v = ((y - self.y.0) / (self.y.1 - self.y.0)).clamp(0.0, 1.0);
        ((last_row - (v * last_row).round()) as usize, (u * last_col).round() as usize)
    }

    /// Fill the empty cells between two grid points, inclusive.
    fn segment(&mut self, from: (usize, usize), to: (usize, usize), ch: char) {
        let (dr, dc) = (to.0 as f64 - from.0 as f64, to.1 as f64 - from.1 as f64);
        let steps = dr.abs().max(dc.abs()) as usize;
        for s in 0..=steps {
            let f = if steps == 0 { 0.0 } else { s as f64 / steps as f64 };
            let row = (from.0 as f64 + (dr * f).round()) as usize;
            let col = (from.1 as f64 + (dc * f).round()) as usize;
            if self.cells[row][col] == ' ' {
                self.cells[row][col] = ch;
            }
        }
    }
}

/// Finite `(min, max)` with `max > min`.
fn span(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    (min.is_finite() && max > min).then_some((min, max))
}

fn finite<'a>(t: &'a [f64], y: &'a [f64]) -> impl Iterator<Item = (f64, f64)> + 'a {
    t.iter()
        .zip(y)
        .map(|(t, y)| (*t, *y))
        .filter(|(t, y)| t.is_finite() && y.is_finite())
}
