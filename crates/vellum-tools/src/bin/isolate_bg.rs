//! isolate-bg: remove paper texture and uneven lighting from a scan.
//!
//! Finds text with Sauvola, inpaints it away to estimate the background,
//! and writes `alpha * input / background` (or the background itself with
//! `--background`).
//!
//! # Usage
//!
//! ```text
//! isolate-bg [OPTIONS] <INPUT> <OUTPUT>
//! ```

#![allow(clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use vellum_pipeline::{InpaintInit, IsolationConfig, IsolationOutput, Raster, SauvolaConfig};
use vellum_tools::ToolError;
use vellum_tools::args::{SauvolaArgs, Verbosity};

const NAME: &str = "isolate-bg";

/// Inpaint initialisation selection.
#[derive(Clone, Copy, ValueEnum)]
enum Init {
    /// Per-channel mean of the unmasked pixels.
    Mean,
    /// Nearest unmasked pixel in L1 distance.
    #[value(aliases = ["nearest", "neighbor", "neighbor-L1", "default"])]
    NearestL1,
}

impl From<Init> for InpaintInit {
    fn from(init: Init) -> Self {
        match init {
            Init::Mean => Self::Mean,
            Init::NearestL1 => Self::NearestL1,
        }
    }
}

/// Estimate and divide out the background of a scanned page.
#[derive(Parser)]
#[command(name = NAME, version)]
struct Cli {
    /// Input image (PNG, JPEG, BMP, TIFF, WebP).
    input: PathBuf,

    /// Output image; the format follows the extension.
    output: PathBuf,

    #[command(flatten)]
    sauvola: SauvolaArgs,

    /// Inpaint initialisation.
    #[arg(
        short = 'I',
        long,
        alias = "inpaint-initmode",
        value_enum,
        default_value_t = Init::NearestL1
    )]
    inpaint_init: Init,

    /// Inpaint diffusion passes.
    #[arg(
        short = 'i',
        long,
        alias = "iteration",
        default_value_t = IsolationConfig::DEFAULT_INPAINT_ITERATIONS
    )]
    inpaint_iterations: u32,

    /// First mask denoise distance (removes specks).
    #[arg(
        short = 'j',
        long,
        alias = "mask-denoise-dist1",
        default_value_t = IsolationConfig::DEFAULT_DENOISE_DISTANCE_1
    )]
    denoise_1: f64,

    /// Second mask denoise distance (grows the text mask).
    #[arg(
        short = 'J',
        long,
        alias = "mask-denoise-dist2",
        default_value_t = IsolationConfig::DEFAULT_DENOISE_DISTANCE_2
    )]
    denoise_2: f64,

    /// Odd Gaussian kernel size for the background (1 disables).
    #[arg(
        short = 'A',
        long,
        alias = "background-blur",
        default_value_t = IsolationConfig::DEFAULT_BACKGROUND_BLUR
    )]
    blur: u32,

    /// Gain applied when dividing by the background.
    #[arg(
        short = 'a',
        long,
        alias = "background-alpha",
        default_value_t = IsolationConfig::DEFAULT_BACKGROUND_ALPHA
    )]
    alpha: f64,

    /// Write the background estimate instead of the normalized page.
    #[arg(short = 'B', long)]
    background: bool,

    /// Stretch the result to the full brightness range.
    #[arg(short = 'G', long)]
    stretch: bool,

    /// Convert a colour input to grayscale first.
    #[arg(short = 'g', long, alias = "input-as-grayscale")]
    grayscale: bool,

    /// Print per-stage timing and metrics to stderr.
    #[arg(long)]
    diagnostics: bool,

    /// Print diagnostics as JSON.
    #[arg(long, requires = "diagnostics")]
    json: bool,

    /// Full isolation config as a JSON string; other pipeline flags are
    /// ignored.
    #[arg(long)]
    config_json: Option<String>,

    #[command(flatten)]
    verbosity: Verbosity,
}

impl Cli {
    fn config(&self) -> Result<IsolationConfig, ToolError> {
        if let Some(json) = &self.config_json {
            return Ok(serde_json::from_str(json)?);
        }
        let window = self.sauvola.apply(SauvolaConfig::default());
        Ok(IsolationConfig {
            window_size: window.window_size,
            k: window.k,
            r_scale: window.r_scale,
            inpaint_init: self.inpaint_init.into(),
            inpaint_iterations: self.inpaint_iterations,
            denoise_distance_1: self.denoise_1,
            denoise_distance_2: self.denoise_2,
            background_blur: self.blur,
            background_alpha: self.alpha,
            output: if self.background {
                IsolationOutput::Background
            } else {
                IsolationOutput::Normalized
            },
            stretch_brightness: self.stretch,
        })
    }
}

fn run(cli: &Cli) -> Result<(), ToolError> {
    let config = cli.config()?;
    config.validate()?;
    tracing::info!(?config, "isolating background");

    let mut raster = vellum_tools::read_raster(&cli.input)?;
    if cli.grayscale {
        raster = Raster::Gray(raster.into_gray());
    }

    let result = vellum_pipeline::isolate::isolate_background_with_diagnostics(raster, config)?;
    if cli.diagnostics {
        if cli.json {
            eprintln!("{}", serde_json::to_string_pretty(&result.diagnostics)?);
        } else {
            eprintln!("{}", result.diagnostics.report());
        }
    }
    vellum_tools::save_output(&cli.output, result.output)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    vellum_tools::init_logging(cli.verbosity.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => vellum_tools::fail(NAME, &e),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec![NAME, "in.png", "out.png"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn defaults_match_library() {
        assert_eq!(parse(&[]).config().unwrap(), IsolationConfig::default());
    }

    #[test]
    fn flags_map_onto_config() {
        let config = parse(&[
            "-w", "31", "--inpaint-init", "mean", "--inpaint-iterations", "4", "--blur", "1",
            "--background", "--stretch",
        ])
        .config()
        .unwrap();
        assert_eq!(config.window_size, 31);
        assert_eq!(config.inpaint_init, InpaintInit::Mean);
        assert_eq!(config.inpaint_iterations, 4);
        assert_eq!(config.background_blur, 1);
        assert_eq!(config.output, IsolationOutput::Background);
        assert!(config.stretch_brightness);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn short_flags_before_positionals() {
        let cli = Cli::try_parse_from([
            NAME, "-g", "-w", "40", "-k", "0.3", "-r", "1.2", "-I", "mean", "-i", "8", "-j", "2",
            "-J", "6", "-A", "5", "-a", "0.8", "-B", "-G", "in.png", "out.png",
        ])
        .unwrap();
        assert!(cli.grayscale);
        assert_eq!(cli.output, PathBuf::from("out.png"));
        let config = cli.config().unwrap();
        assert_eq!(config.window_size, 40);
        assert_eq!(config.inpaint_init, InpaintInit::Mean);
        assert_eq!(config.inpaint_iterations, 8);
        assert!((config.denoise_distance_1 - 2.0).abs() < f64::EPSILON);
        assert!((config.denoise_distance_2 - 6.0).abs() < f64::EPSILON);
        assert_eq!(config.background_blur, 5);
        assert!((config.background_alpha - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.output, IsolationOutput::Background);
        assert!(config.stretch_brightness);
    }

    #[test]
    fn inpaint_init_accepts_neighbor_names() {
        for name in ["nearest", "neighbor", "neighbor-L1", "default", "nearest-l1"] {
            let config = parse(&["-I", name]).config().unwrap();
            assert_eq!(config.inpaint_init, InpaintInit::NearestL1, "{name}");
        }
        let config = parse(&["--inpaint-initmode", "mean"]).config().unwrap();
        assert_eq!(config.inpaint_init, InpaintInit::Mean);
    }

    #[test]
    fn json_needs_diagnostics() {
        assert!(Cli::try_parse_from([NAME, "a.png", "b.png", "--json"]).is_err());
        assert!(Cli::try_parse_from([NAME, "a.png", "b.png", "--diagnostics", "--json"]).is_ok());
    }

    #[test]
    fn config_json_is_used_verbatim() {
        let cli = parse(&["--config-json", r#"{"background_blur": 3, "stretch_brightness": true}"#]);
        let config = cli.config().unwrap();
        assert_eq!(config.background_blur, 3);
        assert!(config.stretch_brightness);
        assert_eq!(config.window_size, IsolationConfig::default().window_size);
    }
}
