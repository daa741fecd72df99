// Entry point and command-line flow.
//
// Every command loads `config/settings.yaml` (or `--config`) first, installs
// the logger, runs one pipeline operation and maps its outcome to the exit
// code: 0 on success, 1 on any failure with a one-line message on stderr.
mod bridge;
mod config;
mod engine;
mod error;
mod intersection;
mod logging;
mod maps;
mod output;
mod processor;
mod progress;
mod reports;
#[cfg(test)]
mod testing;
mod types;
mod util;
mod vegetation;
mod verify;

use anyhow::bail;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;

use bridge::EngineBridge;
use config::{Config, DEFAULT_CONFIG_PATH};
use engine::{DataStore, DocumentRenderer};
use maps::MapGenerator;
use processor::FileProcessor;

#[derive(Parser, Debug)]
#[command(
    name = "substation-maps",
    version,
    about = "Vegetation statistics and PDF map generation for substations"
)]
struct Cli {
    /// Path to the YAML settings file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check configuration, directories, workspace and engine
    Verify {
        /// Create missing input/output/log directories first
        #[arg(long)]
        create_dirs: bool,
    },
    /// Export one map document to PDF
    ProcessFile {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        resolution: Option<u32>,
    },
    /// Export every map document in a directory to PDF
    ProcessBatch {
        #[arg(long)]
        input_dir: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        resolution: Option<u32>,
        /// Ledger CSV (default: {output_dir}/processing_summary.csv)
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Rebuild the workspace base layers from the source layers
    ProcessIntersections,
    /// Run vegetation statistics for one substation
    ProcessVeg {
        site: String,
        /// Circuit to include; repeat to seed a new substation
        #[arg(long = "circuit")]
        circuits: Vec<String>,
    },
    /// Generate the four 11x17 map PDFs for one substation
    GenerateMaps {
        site: String,
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        resolution: Option<u32>,
    },
}

impl Command {
    /// Used to name the log file.
    fn name(&self) -> &'static str {
        match self {
            Command::Verify { .. } => "verify",
            Command::ProcessFile { .. } => "process_file",
            Command::ProcessBatch { .. } => "process_batch",
            Command::ProcessIntersections => "process_intersections",
            Command::ProcessVeg { .. } => "process_veg",
            Command::GenerateMaps { .. } => "generate_maps",
        }
    }
}

/// Handle `verify`: one ✓/✗ line per check, failing if any check failed.
fn handle_verify(config: &Config, create_dirs: bool) -> anyhow::Result<String> {
    let bridge = EngineBridge::new(config.engine.clone());
    if !verify::run_verification(config, &bridge, create_dirs) {
        bail!("Verification failed");
    }
    Ok("All checks passed".to_string())
}

/// Handle `process-file`: a single document to a single PDF.
fn handle_process_file(
    config: &Config,
    input: PathBuf,
    output: PathBuf,
    resolution: Option<u32>,
) -> anyhow::Result<String> {
    let bridge = EngineBridge::new(config.engine.clone());
    let resolution = resolution.unwrap_or(config.options.resolution);
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let written = FileProcessor::new(&bridge).process_file(&input, &output, resolution)?;
    Ok(format!("Exported PDF to: {}", written.display()))
}

/// Handle `process-batch`.
///
/// Writes the ledger CSV and prints a preview even when some documents
/// failed; the command still fails in that case.
fn handle_process_batch(
    config: &Config,
    input_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    resolution: Option<u32>,
    report: Option<PathBuf>,
) -> anyhow::Result<String> {
    let input_dir = input_dir.unwrap_or_else(|| config.paths.mxd_input_dir.clone());
    let output_dir = output_dir.unwrap_or_else(|| config.paths.output_dir.clone());
    let report = report.unwrap_or_else(|| output_dir.join("processing_summary.csv"));
    let resolution = resolution.unwrap_or(config.options.resolution);

    if !input_dir.is_dir() {
        bail!("Input directory does not exist: {}", input_dir.display());
    }

    let bridge = EngineBridge::new(config.engine.clone());
    let ledger = FileProcessor::new(&bridge).process_batch(&input_dir, &output_dir, resolution)?;
    if ledger.is_empty() {
        warn!("No MXD or APRX documents found in {}", input_dir.display());
    }
    ledger.export_csv(&report)?;

    let summary = ledger.summary();
    println!("Processing Summary\n");
    output::preview_table_rows(&ledger.rows(), 10);
    println!(
        "{} files, {} succeeded, {} failed in {}s",
        util::format_int(summary.total_files),
        util::format_int(summary.succeeded),
        util::format_int(summary.failed),
        util::format_number(summary.total_seconds, 2)
    );
    println!("(Full table exported to {})\n", report.display());

    if summary.failed > 0 {
        bail!("{} of {} files failed", summary.failed, summary.total_files);
    }
    Ok(format!("Processed {} files", util::format_int(summary.total_files)))
}

/// Handle `process-intersections`.
fn handle_process_intersections(config: &Config) -> anyhow::Result<String> {
    let bridge = EngineBridge::new(config.engine.clone());
    MapGenerator::from_config(config, &bridge, &bridge).process_intersections()?;
    Ok(format!(
        "Base layers {} and {} rebuilt",
        intersection::XFMR_MCD,
        intersection::PRICOND_MCD
    ))
}

/// Handle `process-veg`.
fn handle_process_veg(config: &Config, site: &str, circuits: &[String]) -> anyhow::Result<String> {
    let sub = config.substation(site)?;
    let bridge = EngineBridge::new(config.engine.clone());
    let summary = MapGenerator::from_config(config, &bridge, &bridge).process_vegetation(&sub, circuits)?;
    Ok(format!(
        "Vegetation statistics for {}: {} ({} rows), {} ({} rows)",
        sub,
        summary.conductor_table,
        util::format_int(summary.conductor_rows),
        summary.transformer_table,
        util::format_int(summary.transformer_rows)
    ))
}

/// Handle `generate-maps`. The engine process is only started by the first
/// request, so an unknown site never launches it.
fn handle_generate_maps(
    config: &Config,
    site: &str,
    year: Option<String>,
    resolution: Option<u32>,
) -> anyhow::Result<String> {
    let bridge = EngineBridge::new(config.engine.clone());
    generate_maps_with(config, &bridge, &bridge, site, year, resolution)
}

/// The site is checked against configuration before any stage runs.
fn generate_maps_with<S, R>(
    config: &Config,
    store: &S,
    renderer: &R,
    site: &str,
    year: Option<String>,
    resolution: Option<u32>,
) -> anyhow::Result<String>
where
    S: DataStore + ?Sized,
    R: DocumentRenderer + ?Sized,
{
    let sub = config.substation(site)?;
    let year = year.unwrap_or_else(|| config.options.default_year.clone());
    config.workspace().ensure_exists()?;

    let mut generator = MapGenerator::from_config(config, store, renderer);
    if let Some(resolution) = resolution {
        generator = generator.with_resolution(resolution);
    }
    let summary = generator.generate_maps(&sub, &year)?;

    let record = maps::run_summary_path(generator.workspace(), &sub, &year);
    output::write_json(&record, &summary)?;
    info!("Run summary written to {}", record.display());

    let mut lines = vec![format!(
        "Generated {} maps for {} ({}):",
        summary.outputs.len(),
        sub,
        year
    )];
    lines.extend(summary.outputs.iter().map(|p| format!("  {}", p.display())));
    Ok(lines.join("\n"))
}

fn run(cli: Cli, config: &Config) -> anyhow::Result<String> {
    match cli.command {
        Command::Verify { create_dirs } => handle_verify(config, create_dirs),
        Command::ProcessFile {
            input,
            output,
            resolution,
        } => handle_process_file(config, input, output, resolution),
        Command::ProcessBatch {
            input_dir,
            output_dir,
            resolution,
            report,
        } => handle_process_batch(config, input_dir, output_dir, resolution, report),
        Command::ProcessIntersections => handle_process_intersections(config),
        Command::ProcessVeg { site, circuits } => handle_process_veg(config, &site, &circuits),
        Command::GenerateMaps {
            site,
            year,
            resolution,
        } => handle_generate_maps(config, &site, year, resolution),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let name = cli.command.name();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            logging::init(name, None);
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(name, Some(config.paths.logs_dir.as_path()));

    match run(cli, &config) {
        Ok(message) => {
            println!("{}", message);
            ExitCode::SUCCESS
        }
        Err(e) => {
            match e.downcast_ref::<error::Error>() {
                Some(err) => match err.stage() {
                    Some(stage) => error!("{} failed in {} stage ({} error): {}", name, stage, err.kind(), e),
                    None => error!("{} failed ({} error): {}", name, err.kind(), e),
                },
                None => error!("{} failed: {}", name, e),
            }
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
