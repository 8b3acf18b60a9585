//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and initialises logging
//! - checks the input and output locations before any work
//! - runs the fit pipeline
//! - prints the summary/plot and writes the report and optional exports

use std::path::Path;

use clap::Parser;

use crate::cli::{CheckArgs, Command, DemoArgs, FitArgs, OutputArgs, PlotArgs, Verbosity, rewrite_args};
use crate::error::AppError;

pub mod pipeline;

use pipeline::RunOutput;

/// Entry point for the `pfit` binary.
pub fn run() -> Result<(), AppError> {
    // Clap requires a subcommand name, so `pfit -c … -o …` is rewritten to
    // `pfit fit -c … -o …` before parsing.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);
    init_logging(cli.verbosity);

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Check(args) => handle_check(args),
        Command::Demo(args) => handle_demo(args),
        Command::Plot(args) => handle_plot(args),
    }
}

fn init_logging(verbosity: Verbosity) {
    let env = env_logger::Env::default().default_filter_or(verbosity.filter().as_str());
    // A second initialisation (e.g. from tests) keeps the first logger.
    let _ = env_logger::Builder::from_env(env).format_target(false).try_init();
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    require_config(&args.config)?;
    require_output_dir(&args.output.output)?;

    log::info!("Loading configuration file.");
    let config = crate::config::load_config(&args.config)?;
    let job = pipeline::job_from_config(&config)?;
    let run = pipeline::run_fit(job)?;
    emit(&run, &args.output)
}

fn handle_check(args: CheckArgs) -> Result<(), AppError> {
    require_config(&args.config)?;

    log::info!("Loading configuration file.");
    let config = crate::config::load_config(&args.config)?;
    let job = pipeline::job_from_config(&config)?;
    let summary = pipeline::check_job(job)?;

    println!("=== pfit check - {} ===", summary.title);
    println!("Assay: {} ({} cycles over {:.0} s)", summary.test_name, summary.cycles, summary.duration);
    println!("Parameters: {}", summary.parameters.join(", "));
    println!(
        "Normalised data range: [{:.4}, {:.4}]",
        summary.observed_range.0, summary.observed_range.1
    );
    println!("Configuration OK.");
    Ok(())
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    require_output_dir(&args.output.output)?;

    let options = crate::data::DemoOptions {
        seed: args.seed,
        noise: args.noise,
        ..Default::default()
    };
    let plate = crate::data::demo_plate(&options)?;
    let truth: Vec<String> = plate
        .parameters
        .names()
        .iter()
        .zip(&plate.truth)
        .map(|(name, value)| format!("{name} = {value:e}"))
        .collect();
    log::info!("Synthetic plate generated with {}.", truth.join(", "));

    let job = pipeline::job_from_demo(plate)?;
    let run = pipeline::run_fit(job)?;
    emit(&run, &args.output)
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let file = crate::io::read_fit_json(&args.fit)?;
    let report = file.to_report();

    println!("{}", crate::report::format_fit_summary(&report));
    println!("{}", crate::plot::render_ascii_plot(&report, args.width, args.height));
    Ok(())
}

/// Print the terminal output, then write the report and the optional exports.
fn emit(run: &RunOutput, output: &OutputArgs) -> Result<(), AppError> {
    println!("{}", crate::report::format_fit_summary(&run.report));
    if output.show_plot() {
        println!(
            "{}",
            crate::plot::render_ascii_plot(&run.report, output.width, output.height)
        );
    }

    if let Some(path) = &output.export_json {
        let file = crate::io::FitFile::new(&run.report, &run.noise);
        crate::io::write_fit_json(path, &file)?;
    }
    if let Some(path) = &output.export_csv {
        crate::io::write_series_csv(path, &run.report, &run.noise)?;
    }

    crate::report::write_report(&output.output, &run.report)?;
    Ok(())
}

fn require_config(path: &Path) -> Result<(), AppError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(AppError::new(2, "Configuration file not found."))
    }
}

fn require_output_dir(path: &Path) -> Result<(), AppError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
            Err(AppError::new(2, "Output directory not found."))
        }
        _ => Ok(()),
    }
}
