//! kontur: extract ranked outline contours from a raster image.
//!
//! Loads an image, downscales it to a pixel budget, waits for the image
//! backend, then submits one or more detections through the serialized
//! task executor and prints the ranked contours.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin kontur -- [OPTIONS] <IMAGE_PATH>
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr,
//! results to stdout.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use kontur_pipeline::surface::DEFAULT_MAX_PIXELS;
use kontur_pipeline::{
    DetectOptions, EdgeMode, NativeHeap, Observer, PipelineError, PipelineResult, Point,
    ResourceError, Surface,
};
use kontur_tasks::{ReadinessPolicy, Session, SessionConfig};
use serde::Serialize;

/// Extract ranked outline contours from a raster image.
#[derive(Parser)]
#[command(name = "kontur", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Edge detector.
    #[arg(long, value_enum, default_value_t = Mode::Auto)]
    mode: Mode,

    /// Threshold spread around the mean intensity, in (0, 1).
    #[arg(long, default_value_t = DetectOptions::DEFAULT_SENSITIVITY)]
    sensitivity: f64,

    /// Downscale images larger than this many pixels.
    #[arg(long, default_value_t = DEFAULT_MAX_PIXELS, value_parser = clap::builder::RangedU64ValueParser::<u64>::new().range(1..))]
    max_pixels: u64,

    /// Number of detections to queue on the same image.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output results as JSON, including contour points.
    #[arg(long)]
    json: bool,

    /// Detection options as a JSON string.
    ///
    /// When provided, `--mode` and `--sensitivity` are ignored. The JSON
    /// must be a valid `DetectOptions` serialization; missing fields take
    /// their defaults.
    #[arg(long)]
    options_json: Option<String>,

    /// Give up waiting for the image backend after this many milliseconds.
    #[arg(long, default_value_t = 10_000)]
    readiness_timeout_ms: u64,
}

/// Edge detector selection.
#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Canny with thresholds adapted to mean intensity.
    Auto,
    /// Equal-weight sum of first derivatives.
    Gradient,
    /// Second-derivative magnitude.
    Curvature,
}

impl From<Mode> for EdgeMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Auto => Self::Auto,
            Mode::Gradient => Self::Gradient,
            Mode::Curvature => Self::Curvature,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("error parsing --options-json: {0}")]
    Options(#[from] serde_json::Error),

    #[error("error loading {path}: {source}")]
    Image {
        path: String,
        source: image::ImageError,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("error reading contour geometry: {0}")]
    Geometry(#[from] ResourceError),
}

/// Forwards executor and detector notifications to the log.
struct LogObserver;

impl Observer for LogObserver {
    fn progress_started(&self, description: &str) {
        tracing::info!(task = description, "started");
    }

    fn progress_ended(&self) {
        tracing::debug!("task ended");
    }

    fn user_message(&self, text: &str, duration: Duration) {
        tracing::info!(display_ms = duration.as_millis(), "{text}");
    }
}

#[derive(Serialize)]
struct RunReport {
    run: usize,
    total: usize,
    primary: ContourReport,
    secondary: Vec<ContourReport>,
}

#[derive(Serialize)]
struct ContourReport {
    area: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    points: Option<Vec<Point>>,
}

fn options_from_cli(cli: &Cli) -> Result<DetectOptions, CliError> {
    let options = match cli.options_json {
        Some(ref json) => serde_json::from_str(json)?,
        None => DetectOptions {
            mode: cli.mode.into(),
            sensitivity: cli.sensitivity,
        },
    };
    options.validate()?;
    Ok(options)
}

fn load_surface(path: &Path) -> Result<Surface, CliError> {
    let image = image::open(path).map_err(|source| CliError::Image {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Surface::from(image.to_rgba8()))
}

fn report(
    session: &Session,
    run: usize,
    result: &PipelineResult,
    with_points: bool,
) -> Result<RunReport, CliError> {
    let contour = |c: &kontur_pipeline::Contour| -> Result<ContourReport, CliError> {
        Ok(ContourReport {
            area: c.area,
            points: if with_points {
                Some(session.shape(c)?)
            } else {
                None
            },
        })
    };
    Ok(RunReport {
        run,
        total: result.total,
        primary: contour(&result.primary)?,
        secondary: result
            .secondary
            .iter()
            .map(contour)
            .collect::<Result<_, _>>()?,
    })
}

fn print_report(report: &RunReport) {
    println!(
        "run {}: {} contour(s), primary area {:.1}",
        report.run, report.total, report.primary.area
    );
    if !report.secondary.is_empty() {
        let areas: Vec<String> = report
            .secondary
            .iter()
            .map(|c| format!("{:.1}", c.area))
            .collect();
        println!("  secondary areas: {}", areas.join(", "));
    }
}

/// Returns `Ok(true)` if every run succeeded.
async fn run(cli: &Cli) -> Result<bool, CliError> {
    let options = options_from_cli(cli)?;

    let mut surface = load_surface(&cli.image_path)?;
    let (width, height) = (surface.width(), surface.height());
    if surface.fit_to_pixel_budget(cli.max_pixels) {
        tracing::info!(
            from = %format!("{width}x{height}"),
            to = %format!("{}x{}", surface.width(), surface.height()),
            "downscaled to pixel budget"
        );
    }
    tracing::info!(
        path = %cli.image_path.display(),
        width = surface.width(),
        height = surface.height(),
        mode = %options.mode,
        sensitivity = options.sensitivity,
        runs = cli.runs,
        "loaded image"
    );

    let config = SessionConfig {
        readiness: ReadinessPolicy {
            timeout: Duration::from_millis(cli.readiness_timeout_ms),
            ..ReadinessPolicy::default()
        },
        ..SessionConfig::default()
    };
    let session = Session::with_observer(NativeHeap::new(), config, Arc::new(LogObserver));
    session.wait_until_ready().await?;

    let completions: Vec<_> = (0..cli.runs)
        .map(|_| session.detect(surface.clone(), options))
        .collect();

    let mut all_ok = true;
    let mut reports = Vec::with_capacity(cli.runs);
    for (run, completion) in completions.into_iter().enumerate() {
        let run = run + 1;
        match completion.await {
            Ok(result) => {
                let built = report(&session, run, &result, cli.json);
                result.release();
                let built = built?;
                if !cli.json {
                    print_report(&built);
                }
                reports.push(built);
            }
            Err(e) => {
                all_ok = false;
                tracing::error!(run, error = %e, "detection failed");
            }
        }
    }
    session.shutdown().await;

    if cli.json {
        match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing results: {e}");
                return Ok(false);
            }
        }
    }
    Ok(all_ok)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("kontur").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_build_options() {
        let cli = parse(&["img.png", "--mode", "curvature", "--sensitivity", "0.5"]);
        let options = options_from_cli(&cli).unwrap();
        assert_eq!(options.mode, EdgeMode::Curvature);
        assert!((options.sensitivity - 0.5).abs() < f64::EPSILON);
        assert_eq!(cli.max_pixels, DEFAULT_MAX_PIXELS);
        assert_eq!(cli.runs, 1);
    }

    #[test]
    fn options_json_overrides_flags() {
        let cli = parse(&[
            "img.png",
            "--mode",
            "curvature",
            "--options-json",
            r#"{"mode":"gradient"}"#,
        ]);
        let options = options_from_cli(&cli).unwrap();
        assert_eq!(options.mode, EdgeMode::Gradient);
        assert!((options.sensitivity - DetectOptions::DEFAULT_SENSITIVITY).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_sensitivity_is_rejected() {
        let cli = parse(&["img.png", "--sensitivity", "1.2"]);
        assert!(matches!(
            options_from_cli(&cli),
            Err(CliError::Pipeline(PipelineError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn malformed_options_json_is_rejected() {
        let cli = parse(&["img.png", "--options-json", "{"]);
        assert!(matches!(options_from_cli(&cli), Err(CliError::Options(_))));
    }

    #[test]
    fn zero_runs_is_rejected() {
        assert!(Cli::try_parse_from(["kontur", "img.png", "--runs", "0"]).is_err());
    }

    #[test]
    fn missing_image_is_a_load_error() {
        let err = load_surface(Path::new("/nonexistent/kontur-test.png")).unwrap_err();
        assert!(matches!(err, CliError::Image { .. }));
    }
}
