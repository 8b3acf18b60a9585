//! Layout of the one-page fit report.
//!
//! ```text
//! +---------------------------------------------------------------+
//! |               title                                 date      |
//! | parameter table                 |  covariance heat map        |
//! | goodness of fit                 |  (or why it is missing)     |
//! | data vs fit chart               |  error CDF / error density  |
//! +---------------------------------------------------------------+
//! ```

use plotters::coord::Shift;
use plotters::prelude::*;

use super::backend::PdfBackend;
use super::format::{fmt_number, statistics_rows};
use super::pdf::{Align, Canvas, Font, PAGE_WIDTH, Rgb};
use crate::domain::{FitWarning, ReportData};
use crate::error::FitError;

const INK: Rgb = Rgb(0x22, 0x22, 0x22);
const RULE: Rgb = Rgb(0xBB, 0xBB, 0xBB);
const HEADER_FILL: Rgb = Rgb(0xEE, 0xEE, 0xEE);

const GRID: RGBColor = RGBColor(0xDD, 0xDD, 0xDD);
const AXIS: RGBColor = RGBColor(0xBB, 0xBB, 0xBB);
const DATA_COLOR: RGBColor = RGBColor(0x1F, 0x77, 0xB4);
const FIT_COLOR: RGBColor = RGBColor(0xFF, 0x7F, 0x0E);

/// Reversed red-yellow-green scale used for the covariance heat map.
const HEAT_LOW: Rgb = Rgb(0x1A, 0x96, 0x41);
const HEAT_MID: Rgb = Rgb(0xFF, 0xFF, 0xBF);
const HEAT_HIGH: Rgb = Rgb(0xD7, 0x19, 0x1C);

const HISTOGRAM_BINS: usize = 30;

/// Page region in points, top-left origin.
#[derive(Debug, Clone, Copy)]
struct Frame {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

/// Draw the report page for `report`, stamped with `date`.
pub fn render_page(report: &ReportData, date: &str) -> Result<Canvas, FitError> {
    let mut canvas = Canvas::new();

    canvas.fill_color(INK);
    canvas.text(PAGE_WIDTH / 2.0, 30.0, 15.0, Font::Bold, Align::Center, &report.title);
    canvas.text(PAGE_WIDTH - 36.0, 30.0, 11.0, Font::Regular, Align::Right, date);
    canvas.stroke_color(RULE);
    canvas.line_width(0.75);
    canvas.line((36.0, 40.0), (PAGE_WIDTH - 36.0, 40.0));

    let after_params = parameter_table(&mut canvas, report, 36.0, 62.0);
    let after_gof = goodness_of_fit_table(&mut canvas, report, 36.0, after_params + 16.0);
    warnings(&mut canvas, &report.fit.warnings, 36.0, after_gof + 14.0);

    let right = Frame {
        x: 470.0,
        y: 52.0,
        w: 336.0,
        h: 260.0,
    };
    if let Some(cov) = report.fit.covariance() {
        covariance_panel(&mut canvas, &report.fit.names, cov, right);
    } else {
        canvas.fill_color(INK);
        canvas.text(
            right.x + right.w / 2.0,
            right.y + right.h / 2.0,
            10.0,
            Font::Regular,
            Align::Center,
            "Standard errors could not be estimated; no covariance matrix.",
        );
    }

    let lower_left = Frame {
        x: 20.0,
        y: 330.0,
        w: 420.0,
        h: 250.0,
    };
    let lower_right = Frame {
        x: 440.0,
        y: 330.0,
        w: 380.0,
        h: 250.0,
    };
    fit_chart(&mut canvas, report, lower_left)?;
    error_charts(&mut canvas, report, lower_right)?;

    Ok(canvas)
}

/// Parameter table; returns the y coordinate below it.
fn parameter_table(canvas: &mut Canvas, report: &ReportData, x: f64, top: f64) -> f64 {
    let fit = &report.fit;
    let mut header = vec!["Parameter", "Value"];
    if fit.stderr_estimable() {
        header.push("StdErr");
    }
    header.push("Initial Value");

    let rows: Vec<Vec<String>> = fit
        .names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut row = vec![name.clone(), fmt_number(fit.values[i])];
            if let Some(stderr) = fit.stderr() {
                row.push(fmt_number(stderr[i]));
            }
            row.push(fmt_number(fit.init_values[i]));
            row
        })
        .collect();

    let widths: Vec<f64> = match header.len() {
        4 => vec![110.0, 100.0, 100.0, 100.0],
        _ => vec![140.0, 135.0, 135.0],
    };
    table(canvas, x, top, &widths, &header, &rows)
}

/// Goodness-of-fit table; returns the y coordinate below it.
fn goodness_of_fit_table(canvas: &mut Canvas, report: &ReportData, x: f64, top: f64) -> f64 {
    let rows: Vec<Vec<String>> = statistics_rows(&report.fit)
        .into_iter()
        .map(|(label, value)| vec![label.to_string(), value])
        .collect();
    table(canvas, x, top, &[205.0, 205.0], &["Statistic", "Value"], &rows)
}

const ROW_HEIGHT: f64 = 16.0;

fn table(canvas: &mut Canvas, x: f64, top: f64, widths: &[f64], header: &[&str], rows: &[Vec<String>]) -> f64 {
    let total: f64 = widths.iter().sum();

    canvas.fill_color(HEADER_FILL);
    canvas.rect(x, top, total, ROW_HEIGHT, true);

    canvas.fill_color(INK);
    let mut cx = x;
    for (label, w) in header.iter().zip(widths) {
        canvas.text(cx + w / 2.0, top + 11.5, 9.5, Font::Bold, Align::Center, label);
        cx += w;
    }

    let mut y = top + ROW_HEIGHT;
    for row in rows {
        let mut cx = x;
        for (cell, w) in row.iter().zip(widths) {
            canvas.text(cx + w / 2.0, y + 11.5, 9.5, Font::Regular, Align::Center, cell);
            cx += w;
        }
        y += ROW_HEIGHT;
    }

    canvas.stroke_color(RULE);
    canvas.line_width(0.5);
    canvas.rect(x, top, total, y - top, false);
    let mut ry = top + ROW_HEIGHT;
    while ry < y - 0.5 {
        canvas.line((x, ry), (x + total, ry));
        ry += ROW_HEIGHT;
    }
    let mut cx = x;
    for w in &widths[..widths.len().saturating_sub(1)] {
        cx += w;
        canvas.line((cx, top), (cx, y));
    }
    y
}

fn warnings(canvas: &mut Canvas, warnings: &[FitWarning], x: f64, top: f64) {
    canvas.fill_color(HEAT_HIGH);
    for (i, w) in warnings.iter().enumerate() {
        let text = super::format::truncate(&w.to_string(), 95);
        canvas.text(x, top + 12.0 * i as f64, 8.5, Font::Regular, Align::Left, &text);
    }
}

/// Heat map of the covariance matrix, annotated with each entry.
fn covariance_panel(canvas: &mut Canvas, names: &[String], cov: &[Vec<f64>], frame: Frame) {
    let n = names.len();
    if n == 0 {
        return;
    }
    let label_w = 60.0;
    let cell = ((frame.w - label_w) / n as f64).min((frame.h - 30.0) / n as f64);
    let x0 = frame.x + label_w;
    let y0 = frame.y + 18.0;
    let font_size = (cell * 0.22).clamp(5.0, 9.0);

    let (lo, hi) = cov
        .iter()
        .flatten()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));

    canvas.fill_color(INK);
    canvas.text(frame.x, frame.y + 8.0, 10.0, Font::Bold, Align::Left, "Parameter covariance");

    for i in 0..n {
        for j in 0..n {
            let v = cov.get(i).and_then(|row| row.get(j)).copied().unwrap_or(f64::NAN);
            let (cx, cy) = (x0 + j as f64 * cell, y0 + i as f64 * cell);
            canvas.fill_color(heat_color(v, lo, hi));
            canvas.rect(cx + 1.0, cy + 1.0, cell - 2.0, cell - 2.0, true);
            canvas.fill_color(INK);
            canvas.text(
                cx + cell / 2.0,
                cy + cell / 2.0 + font_size * 0.35,
                font_size,
                Font::Regular,
                Align::Center,
                &fmt_sig2(v),
            );
        }
        let label = super::format::truncate(&names[i], 10);
        canvas.text(x0 - 4.0, y0 + (i as f64 + 0.5) * cell + 3.0, 8.0, Font::Regular, Align::Right, &label);
        canvas.text(
            x0 + (i as f64 + 0.5) * cell,
            y0 + n as f64 * cell + 10.0,
            8.0,
            Font::Regular,
            Align::Center,
            &label,
        );
    }
}

fn heat_color(v: f64, lo: f64, hi: f64) -> Rgb {
    if !(v.is_finite() && hi > lo) {
        return HEAT_MID;
    }
    let t = (v - lo) / (hi - lo);
    if t < 0.5 {
        HEAT_LOW.lerp(HEAT_MID, 2.0 * t)
    } else {
        HEAT_MID.lerp(HEAT_HIGH, 2.0 * t - 1.0)
    }
}

/// Two significant digits, `%.2g` style.
fn fmt_sig2(v: f64) -> String {
    if v == 0.0 || !v.is_finite() {
        return format!("{v}");
    }
    let exp = v.abs().log10().floor() as i32;
    if !(-4..2).contains(&exp) {
        format!("{v:.1e}")
    } else {
        let decimals = (1 - exp).max(0) as usize;
        format!("{v:.decimals$}")
    }
}

fn chart_error<E: std::fmt::Display>(err: E) -> FitError {
    FitError::Report(err.to_string())
}

/// `(min, max)` of the finite values, widened so the range is never empty.
fn padded_range(values: impl Iterator<Item = f64>, pad: f64) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !(lo.is_finite() && hi.is_finite()) {
        return (0.0, 1.0);
    }
    let span = hi - lo;
    if span <= 0.0 {
        let d = if lo == 0.0 { 1.0 } else { lo.abs() * 0.1 };
        return (lo - d, hi + d);
    }
    (lo - pad * span, hi + pad * span)
}

fn drawing_area(canvas: &mut Canvas, frame: Frame) -> DrawingArea<PdfBackend<'_>, Shift> {
    PdfBackend::new(canvas, (frame.x, frame.y), (frame.w as u32, frame.h as u32)).into_drawing_area()
}

/// Observed normalised signal against the fitted trajectory.
fn fit_chart(canvas: &mut Canvas, report: &ReportData, frame: Frame) -> Result<(), FitError> {
    let root = drawing_area(canvas, frame);
    let (x0, x1) = padded_range(report.time.iter().copied(), 0.0);
    let (y0, y1) = padded_range(report.observed.iter().chain(&report.fitted).copied(), 0.05);

    let mut chart = ChartBuilder::on(&root)
        .margin(8)
        .x_label_area_size(30)
        .y_label_area_size(48)
        .build_cartesian_2d(x0..x1, y0..y1)
        .map_err(chart_error)?;

    chart
        .configure_mesh()
        .bold_line_style(&GRID)
        .light_line_style(&TRANSPARENT)
        .axis_style(&AXIS)
        .x_labels(6)
        .y_labels(6)
        .x_label_formatter(&|v| format!("{v:.0}"))
        .y_label_formatter(&|v| format!("{v:.2}"))
        .label_style(("sans-serif", 8).into_font())
        .axis_desc_style(("sans-serif", 9).into_font())
        .x_desc("Time (s)")
        .y_desc("Reaction Completion Fraction")
        .draw()
        .map_err(chart_error)?;

    let data_style = DATA_COLOR.mix(0.7).stroke_width(1);
    let fit_style = FIT_COLOR.stroke_width(2);
    chart
        .draw_series(LineSeries::new(finite_pairs(&report.time, &report.observed), data_style))
        .map_err(chart_error)?
        .label("Data")
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], data_style));
    chart
        .draw_series(LineSeries::new(finite_pairs(&report.time, &report.fitted), fit_style))
        .map_err(chart_error)?
        .label("Fit")
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], fit_style));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .background_style(&WHITE.mix(0.9))
        .border_style(&AXIS)
        .label_font(("sans-serif", 8).into_font())
        .draw()
        .map_err(chart_error)?;

    root.present().map_err(chart_error)
}

fn finite_pairs(x: &[f64], y: &[f64]) -> Vec<(f64, f64)> {
    x.iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .collect()
}

/// Model errors `fitted − observed`, with the share of errors at or below each value.
pub(crate) fn error_cdf(report: &ReportData) -> Vec<(f64, f64)> {
    let mut errors: Vec<f64> = report
        .fitted
        .iter()
        .zip(&report.observed)
        .map(|(f, o)| f - o)
        .filter(|e| e.is_finite())
        .collect();
    errors.sort_by(f64::total_cmp);
    let n = errors.len() as f64;
    errors
        .into_iter()
        .enumerate()
        .map(|(i, e)| (e, (i + 1) as f64 / n))
        .collect()
}

/// Error CDF (top) and error density with a fitted normal curve (bottom).
fn error_charts(canvas: &mut Canvas, report: &ReportData, frame: Frame) -> Result<(), FitError> {
    let cdf = error_cdf(report);
    let errors: Vec<f64> = cdf.iter().map(|(e, _)| *e).collect();
    let root = drawing_area(canvas, frame);
    let panels = root.split_evenly((2, 1));
    let (ex0, ex1) = padded_range(errors.iter().copied(), 0.02);

    let mut top = ChartBuilder::on(&panels[0])
        .margin(6)
        .x_label_area_size(18)
        .y_label_area_size(40)
        .build_cartesian_2d(ex0..ex1, 0.0..1.0)
        .map_err(chart_error)?;
    top.configure_mesh()
        .bold_line_style(&GRID)
        .light_line_style(&TRANSPARENT)
        .axis_style(&AXIS)
        .x_labels(5)
        .y_labels(5)
        .x_label_formatter(&|v| fmt_sig2(*v))
        .y_label_formatter(&|v| format!("{v:.1}"))
        .label_style(("sans-serif", 8).into_font())
        .axis_desc_style(("sans-serif", 8).into_font())
        .y_desc("Proportion <= x")
        .draw()
        .map_err(chart_error)?;
    top.draw_series(LineSeries::new(cdf.iter().copied(), DATA_COLOR.stroke_width(1)))
        .map_err(chart_error)?;

    // Density histogram plus the normal density with the errors' mean and
    // population standard deviation.
    let n = errors.len().max(1) as f64;
    let mean = errors.iter().sum::<f64>() / n;
    let std = (errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n).sqrt();
    let bin_w = (ex1 - ex0) / HISTOGRAM_BINS as f64;
    let mut counts = [0usize; HISTOGRAM_BINS];
    for e in &errors {
        let b = (((e - ex0) / bin_w) as usize).min(HISTOGRAM_BINS - 1);
        counts[b] += 1;
    }
    let density: Vec<f64> = counts.iter().map(|c| *c as f64 / (n * bin_w)).collect();
    let normal: Vec<(f64, f64)> = if std > 0.0 {
        (0..=200)
            .map(|i| {
                let x = ex0 + (ex1 - ex0) * i as f64 / 200.0;
                let z = (x - mean) / std;
                (x, (-0.5 * z * z).exp() / (std * (2.0 * std::f64::consts::PI).sqrt()))
            })
            .collect()
    } else {
        Vec::new()
    };
    let y_max = density
        .iter()
        .copied()
        .chain(normal.iter().map(|(_, y)| *y))
        .fold(0.0, f64::max)
        .max(f64::MIN_POSITIVE)
        * 1.1;

    let mut bottom = ChartBuilder::on(&panels[1])
        .margin(6)
        .x_label_area_size(26)
        .y_label_area_size(40)
        .build_cartesian_2d(ex0..ex1, 0.0..y_max)
        .map_err(chart_error)?;
    bottom
        .configure_mesh()
        .bold_line_style(&GRID)
        .light_line_style(&TRANSPARENT)
        .axis_style(&AXIS)
        .x_labels(5)
        .y_labels(4)
        .x_label_formatter(&|v| fmt_sig2(*v))
        .y_label_formatter(&|v| fmt_sig2(*v))
        .label_style(("sans-serif", 8).into_font())
        .axis_desc_style(("sans-serif", 8).into_font())
        .x_desc("Error (fit - data)")
        .y_desc("Density")
        .draw()
        .map_err(chart_error)?;
    bottom
        .draw_series(density.iter().enumerate().map(|(i, d)| {
            let left = ex0 + i as f64 * bin_w;
            Rectangle::new([(left, 0.0), (left + bin_w, *d)], DATA_COLOR.mix(0.5).filled())
        }))
        .map_err(chart_error)?;
    bottom
        .draw_series(LineSeries::new(normal, FIT_COLOR.stroke_width(1)))
        .map_err(chart_error)?;

    root.present().map_err(chart_error)
}
