//! vectrace-bench: CLI tool for engine parameter experimentation and diagnostics.
//!
//! Decodes an image file, runs the vectorization engine on it with
//! configurable parameters, and prints the metrics record. Useful for:
//!
//! - Comparing strategy hints (`auto` vs `primitives` vs `tracing` vs `hybrid`)
//! - Tuning the overlap threshold, detector confidence, and tracer tolerance
//! - Measuring per-component durations under different budgets
//! - Inspecting the SVG that a given configuration produces
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin vectrace-bench -- [OPTIONS] <IMAGE_PATH>
//! ```
//!
//! Logs go to stderr; set `RUST_LOG` (default `warn`) to see strategy
//! and fusion decisions.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;
use vectrace_engine::{
    Component, DetectorParams, Engine, EngineConfig, FusionConfig, SourceImage, StrategyHint,
    TracerParams, VectorizeMetrics, VectorizeRequest,
};

/// Engine parameter experimentation and diagnostics for vectrace.
///
/// Runs the vectorization engine on a given image with configurable
/// parameters and prints the per-component timing and strategy report.
#[derive(Parser)]
#[command(name = "vectrace-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Soft time budget in milliseconds.
    #[arg(long, default_value_t = 5000)]
    budget_ms: u64,

    /// Hard deadline in milliseconds; on expiry the first available
    /// strategy result is emitted without fusion.
    #[arg(long)]
    hard_deadline_ms: Option<u64>,

    /// Strategy selection.
    #[arg(long, value_enum, default_value_t = Strategy::Auto)]
    strategy: Strategy,

    /// Quality target in [0, 1]; refinement stops once reached.
    #[arg(long)]
    quality_target: Option<f64>,

    /// Evaluate strategies of one stage concurrently.
    #[arg(long)]
    parallel: bool,

    /// Fusion overlap threshold (fraction of the smaller element's box).
    #[arg(long, default_value_t = FusionConfig::DEFAULT_OVERLAP_THRESHOLD)]
    overlap_threshold: f64,

    /// Minimum confidence for detected primitives.
    #[arg(long, default_value_t = DetectorParams::DEFAULT_CONFIDENCE_THRESHOLD)]
    confidence_threshold: f64,

    /// Douglas-Peucker tolerance for traced contours, in pixels.
    #[arg(long, default_value_t = TracerParams::DEFAULT_TOLERANCE)]
    simplify_tolerance: f64,

    /// Write SVG output to file.
    #[arg(long)]
    svg: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output metrics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Full engine config as a JSON string.
    ///
    /// When provided, the individual engine parameter flags are ignored.
    /// Missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Strategy hint selection.
#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    /// Choose from the detected content type.
    Auto,
    /// Primitive detection first, tracing second.
    Primitives,
    /// Classical tracing first, detection second.
    Tracing,
    /// Both strategies in one stage, merged by fusion.
    Hybrid,
}

impl From<Strategy> for StrategyHint {
    fn from(s: Strategy) -> Self {
        match s {
            Strategy::Auto => Self::Auto,
            Strategy::Primitives => Self::Primitives,
            Strategy::Tracing => Self::Tracing,
            Strategy::Hybrid => Self::Hybrid,
        }
    }
}

/// Build an [`EngineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<EngineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let mut config = EngineConfig::default();
    config.fusion.overlap_threshold = cli.overlap_threshold;
    config.detector.confidence_threshold = cli.confidence_threshold;
    config.tracer.tolerance = cli.simplify_tolerance;
    config.orchestrator.parallel = cli.parallel;
    Ok(config)
}

fn request_from_cli(cli: &Cli) -> VectorizeRequest {
    VectorizeRequest {
        budget: Duration::from_millis(cli.budget_ms),
        strategy_hint: cli.strategy.into(),
        quality_target: cli.quality_target,
        hard_deadline: cli.hard_deadline_ms.map(Duration::from_millis),
    }
}

/// Install the stderr log subscriber, honouring `RUST_LOG`.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    let engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let request = request_from_cli(&cli);

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };
    let source = match image::load_from_memory(&image_bytes)
        .map_err(|e| e.to_string())
        .and_then(|img| SourceImage::from_rgba(img.to_rgba8()).map_err(|e| e.to_string()))
    {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error decoding {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({} bytes, {}x{})",
        cli.image_path.display(),
        image_bytes.len(),
        source.width(),
        source.height(),
    );
    eprintln!("Request: {request:?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_metrics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match engine.vectorize(&source, &request) {
            Ok(out) => {
                if cli.json {
                    match serde_json::to_string_pretty(&out.metrics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing metrics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", out.metrics.report());
                }

                // Write SVG on the first run only.
                if run == 0
                    && let Some(ref svg_path) = cli.svg
                {
                    write_svg(&cli, engine.config(), &out.document, svg_path);
                }

                all_metrics.push(out.metrics);
            }
            Err(e) => {
                eprintln!("Engine error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_metrics);
    }

    ExitCode::SUCCESS
}

fn write_svg(
    cli: &Cli,
    config: &EngineConfig,
    document: &vectrace_engine::VectorDocument,
    svg_path: &std::path::Path,
) {
    let title = cli
        .image_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("bench");
    let desc = format!(
        "budget={}ms strategy={:?}",
        cli.budget_ms,
        StrategyHint::from(cli.strategy)
    );
    let config_json = serde_json::to_string(config).ok();
    let metadata = vectrace_export::SvgMetadata {
        title: Some(title),
        description: Some(&desc),
        config_json: config_json.as_deref(),
    };
    let svg = vectrace_export::to_svg(document, &metadata);
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

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_metrics: &[VectorizeMetrics]) {
    println!();
    println!("Summary ({} runs)\n{}", all_metrics.len(), "=".repeat(60));

    if all_metrics.is_empty() {
        println!("Warning: no metrics to summarize");
        return;
    }

    let ms = |d: Duration| d.as_secs_f64() * 1000.0;
    let durations: Vec<f64> = all_metrics.iter().map(|m| ms(m.processing_time)).collect();
    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    println!("Processing time: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    let scores: Vec<f64> = all_metrics
        .iter()
        .filter_map(|m| m.quality.as_ref().map(|q| q.score))
        .collect();
    if !scores.is_empty() {
        let mean_score = scores.iter().sum::<f64>() / scores.len() as f64;
        println!("Quality: mean={mean_score:.3} over {} assessed runs", scores.len());
    }

    println!();
    println!("{:<24} {:>12}", "Component", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let components = [
        Component::ContentAnalysis,
        Component::PrimitiveDetection,
        Component::ClassicalTracing,
        Component::Refinement,
        Component::Fusion,
        Component::QualityAssessment,
        Component::DocumentEmission,
    ];
    for component in components {
        let total: f64 = all_metrics
            .iter()
            .map(|m| ms(m.component_time(component)))
            .sum();
        if total <= 0.0 {
            continue;
        }
        let component_mean = total / all_metrics.len() as f64;
        println!("{:<24} {component_mean:>10.3}ms", component.label());
    }
}
