//! Command-line parsing for the plate-reader ODE fitter.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! pipeline and reporting code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "pfit", version, about = "Fit ODE models to plate-reader fluorescence time series")]
pub struct Cli {
    #[command(flatten)]
    pub verbosity: Verbosity,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the configured model to the assay and write the PDF report.
    Fit(FitArgs),
    /// Validate the configuration, the assay file and the well selection without fitting.
    Check(CheckArgs),
    /// Fit a synthetic plate generated from a built-in bimolecular model.
    Demo(DemoArgs),
    /// Plot a previously exported fit JSON in the terminal.
    Plot(PlotArgs),
}

/// Logging verbosity, shared by every subcommand.
#[derive(Debug, Clone, Copy, Args)]
pub struct Verbosity {
    /// Log debug details (optimiser iterations, solver switches).
    #[arg(short = 'v', long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors.
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

impl Verbosity {
    pub fn filter(self) -> log::LevelFilter {
        if self.verbose {
            log::LevelFilter::Debug
        } else if self.quiet {
            log::LevelFilter::Warn
        } else {
            log::LevelFilter::Info
        }
    }
}

/// Output options shared by `fit` and `demo`.
#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    /// Path of the PDF report to write.
    #[arg(short = 'o', long = "output", value_name = "PDF")]
    pub output: PathBuf,

    /// Export the fit result and series to JSON (readable by `pfit plot`).
    #[arg(long = "export-json", value_name = "JSON")]
    pub export_json: Option<PathBuf>,

    /// Export `t, y, sigma, fitted, residual` to CSV.
    #[arg(long = "export-csv", value_name = "CSV")]
    pub export_csv: Option<PathBuf>,

    /// Render an ASCII plot in the terminal (enabled by default).
    #[arg(long, default_value_t = true)]
    pub plot: bool,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

impl OutputArgs {
    pub fn show_plot(&self) -> bool {
        self.plot && !self.no_plot
    }
}

#[derive(Debug, Clone, Args)]
pub struct FitArgs {
    /// YAML configuration file.
    #[arg(short = 'c', long = "config", value_name = "YAML")]
    pub config: PathBuf,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, Args)]
pub struct CheckArgs {
    /// YAML configuration file.
    #[arg(short = 'c', long = "config", value_name = "YAML")]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct DemoArgs {
    /// Random seed for the synthetic readings.
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    /// Relative noise of every reading.
    #[arg(long, default_value_t = 0.01)]
    pub noise: f64,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Options for plotting a saved fit.
#[derive(Debug, Clone, Args)]
pub struct PlotArgs {
    /// Fit JSON file produced by `pfit fit --export-json`.
    #[arg(long, value_name = "JSON")]
    pub fit: PathBuf,

    /// Plot width (columns).
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

/// Rewrite argv so a bare `pfit -c … -o …` means `pfit fit -c … -o …`.
///
/// Rules:
/// - `pfit <flags…>`              -> `pfit fit <flags…>`
/// - `pfit --help/--version/-h`   -> unchanged (top-level help/version)
/// - `pfit <subcommand> …`        -> unchanged
pub fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        return argv;
    };

    let is_top_level_help_or_version = matches!(arg1.as_str(), "-h" | "--help" | "-V" | "--version" | "help");
    if is_top_level_help_or_version {
        return argv;
    }

    let is_subcommand = matches!(arg1.as_str(), "fit" | "check" | "demo" | "plot");
    if is_subcommand {
        return argv;
    }

    // Global verbosity flags may come first: `pfit -v demo …`.
    let first_other = argv
        .iter()
        .skip(1)
        .position(|a| !matches!(a.as_str(), "-v" | "--verbose" | "-q" | "--quiet"))
        .map(|p| p + 1);
    if let Some(idx) = first_other {
        let is_subcommand = matches!(argv[idx].as_str(), "fit" | "check" | "demo" | "plot");
        if !is_subcommand && argv[idx].starts_with('-') {
            argv.insert(idx, "fit".to_string());
        }
    }
    argv
}
