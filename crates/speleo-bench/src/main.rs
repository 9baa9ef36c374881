//! speleo-bench: CLI tool for survey reduction experiments and diagnostics.
//!
//! Runs the reduction pipeline on a JSON region file with configurable
//! parameters, printing detailed per-stage diagnostics. Useful for:
//!
//! - Comparing loop classifier strategies (`low-link` vs `union-find`)
//! - Checking how the vertical tolerance affects plumbed shots
//! - Measuring per-stage durations to identify bottlenecks
//! - Rendering a quick plan or profile SVG of the result
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin speleo-bench -- [OPTIONS] <REGION_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use log::{debug, info};
use speleo_reduce::cancel::NeverCancel;
use speleo_reduce::diagnostics::{Clock, ReduceDiagnostics};
use speleo_reduce::line_plot_task::LinePlotTask;
use speleo_reduce::{LinePlotResult, LoopClassifierKind, ReduceConfig, Region};

/// Survey reduction experimentation and diagnostics.
///
/// Reduces a region (JSON, as serialized by `speleo_reduce::Region`) and
/// prints detailed per-stage timing and count diagnostics.
#[derive(Parser)]
#[command(name = "speleo-bench", version)]
struct Cli {
    /// Path to the input region JSON.
    region_path: PathBuf,

    /// Loop classification strategy.
    #[arg(long, value_enum, default_value_t = CLI_DEFAULT_CLASSIFIER)]
    loop_classifier: Classifier,

    /// Degrees from +-90 within which a shot counts as vertical.
    #[arg(long, default_value_t = ReduceConfig::DEFAULT_VERTICAL_TOLERANCE)]
    vertical_tolerance: f64,

    /// Write SVG output to file.
    #[arg(long)]
    svg: Option<PathBuf>,

    /// Projection for SVG output.
    #[arg(long, value_enum, default_value_t = View::Plan)]
    projection: View,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Run through a background line plot task on the worker pool
    /// instead of the staged pipeline. Per-stage timings are unavailable.
    #[arg(long)]
    task: bool,

    /// Full reduce config as a JSON string.
    ///
    /// When provided, all other reduce parameter flags are ignored.
    /// The JSON must be a valid `ReduceConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Loop classifier selection.
#[derive(Clone, Copy, ValueEnum)]
enum Classifier {
    /// Tarjan bridge finding over the endpoint graph (linear).
    LowLink,
    /// Union-find connectivity check per edge (quadratic).
    UnionFind,
}

/// Maps a [`LoopClassifierKind`] to the local CLI [`Classifier`] enum.
const fn classifier_from_reduce(kind: LoopClassifierKind) -> Classifier {
    match kind {
        LoopClassifierKind::LowLink => Classifier::LowLink,
        LoopClassifierKind::UnionFind => Classifier::UnionFind,
    }
}

/// The CLI default classifier, derived from
/// [`ReduceConfig::DEFAULT_LOOP_CLASSIFIER`] so the two cannot silently
/// diverge.
const CLI_DEFAULT_CLASSIFIER: Classifier =
    classifier_from_reduce(ReduceConfig::DEFAULT_LOOP_CLASSIFIER);

/// SVG projection selection.
#[derive(Clone, Copy, ValueEnum)]
enum View {
    /// Looking down: east right, north up.
    Plan,
    /// Section looking north: east right, up up.
    ProfileEast,
    /// Section looking west: north right, up up.
    ProfileNorth,
}

impl From<View> for speleo_export::Projection {
    fn from(view: View) -> Self {
        match view {
            View::Plan => Self::Plan,
            View::ProfileEast => Self::ProfileEast,
            View::ProfileNorth => Self::ProfileNorth,
        }
    }
}

/// Build a [`ReduceConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<ReduceConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        ReduceConfig {
            loop_classifier: match cli.loop_classifier {
                Classifier::LowLink => LoopClassifierKind::LowLink,
                Classifier::UnionFind => LoopClassifierKind::UnionFind,
            },
            vertical_tolerance: cli.vertical_tolerance,
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn read_region(path: &Path) -> Result<Region, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("Error parsing {}: {e}", path.display()))
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let region = match read_region(&cli.region_path) {
        Ok(region) => region,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Region: {} ({} caves, {} trips)",
        cli.region_path.display(),
        region.caves.len(),
        region.caves.iter().map(|c| c.trips.len()).sum::<usize>(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    if cli.task {
        return run_task(&cli, &region, config);
    }

    let clock = StdClock(Instant::now());
    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match speleo_reduce::diagnostics::process_with_diagnostics(
            region.clone(),
            config,
            &clock,
            &NeverCancel,
        ) {
            Ok((result, diagnostics)) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }

                // Write SVG on the first run only.
                if run == 0 {
                    write_svg(&cli, &config, &result);
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Reduction error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    // Print summary when multiple runs.
    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Reduce through a pool-mode [`LinePlotTask`], timing each run end to end.
fn run_task(cli: &Cli, region: &Region, config: ReduceConfig) -> ExitCode {
    let mut durations = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        // A fresh task per run: an unchanged region would be skipped by
        // fingerprint.
        let plot = LinePlotTask::new(config);
        let start = Instant::now();
        plot.set_region(region.clone());
        plot.wait_to_finish();
        let elapsed = start.elapsed();
        debug!("task run {} finished in {elapsed:?}", run + 1);
        durations.push(elapsed.as_secs_f64() * 1000.0);

        let Some(output) = plot.output() else {
            eprintln!("Reduction produced no output (see log for the error)");
            return ExitCode::FAILURE;
        };

        if run == 0 {
            info!(
                "fingerprint {}, {} changed trip(s)",
                output.fingerprint,
                output.changes.changed_trips().len()
            );
            let result = &output.result;
            if cli.json {
                match serde_json::to_string_pretty(result) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("Error serializing result: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                print_result_summary(result, elapsed);
            }
            write_svg(cli, &config, result);
        }
    }

    if cli.runs > 1 {
        print_duration_summary(&durations);
    }
    ExitCode::SUCCESS
}

fn print_result_summary(result: &LinePlotResult, elapsed: Duration) {
    println!("Line Plot\n{}", "=".repeat(60));
    println!(
        "Stations: {}  Segments: {}  Duration: {:.3}ms",
        result.points.len(),
        result.segment_count(),
        elapsed.as_secs_f64() * 1000.0,
    );
    println!();
    println!(
        "{:<24} {:>10} {:>10} {:>9} {:>9}",
        "Cave", "Length", "Depth", "Stations", "Loops"
    );
    println!("{}", "-".repeat(66));
    for cave in &result.caves {
        let stats = &cave.stats;
        println!(
            "{:<24} {:>9.2}m {:>9.2}m {:>9} {:>9}",
            cave.name, stats.length, stats.depth, stats.station_count, stats.loop_edge_count,
        );
    }
}

fn write_svg(cli: &Cli, config: &ReduceConfig, result: &LinePlotResult) {
    let Some(ref svg_path) = cli.svg else {
        return;
    };
    let title = cli
        .region_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("bench");
    let projection = speleo_export::Projection::from(cli.projection);
    let desc = format!("{projection} view, {config:?}");
    let config_json = serde_json::to_string(config).ok();
    let metadata = speleo_export::SvgMetadata {
        title: Some(title),
        description: Some(&desc),
        config_json: config_json.as_deref(),
    };
    let svg = speleo_export::to_svg(result, projection, &metadata);
    match std::fs::write(svg_path, &svg) {
        Ok(()) => {
            eprintln!(
                "SVG written to {} ({} bytes)",
                svg_path.display(),
                svg.len(),
            );
        }
        Err(e) => {
            eprintln!("Error writing SVG to {}: {e}", svg_path.display());
        }
    }
}

/// [`Clock`] backed by [`std::time::Instant`], measured from construction.
struct StdClock(Instant);

impl Clock for StdClock {
    fn now(&self) -> Duration {
        self.0.elapsed()
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&ReduceDiagnostics) -> Duration;

/// Print min/mean/max of per-run durations in milliseconds.
#[allow(clippy::cast_precision_loss)]
fn print_duration_summary(durations: &[f64]) {
    println!();
    println!("Summary ({} runs)\n{}", durations.len(), "=".repeat(60));

    if durations.is_empty() {
        println!("Warning: no runs to summarize");
        return;
    }

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[ReduceDiagnostics]) {
    debug_assert!(!all_diagnostics.is_empty(), "no diagnostics to summarize");

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();
    print_duration_summary(&durations);

    if all_diagnostics.is_empty() {
        return;
    }

    // Per-stage means.
    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Prepare", |d| d.prepare.duration),
        ("Decompose", |d| d.decompose.duration),
        ("Classify", |d| d.classify.duration),
        ("Resolve", |d| d.resolve.duration),
    ];

    for (name, extractor) in stage_extractors {
        let total: f64 = all_diagnostics
            .iter()
            .map(|d| extractor(d).as_secs_f64() * 1000.0)
            .sum();
        let stage_mean = total / all_diagnostics.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
