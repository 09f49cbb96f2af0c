//! binarize-sauvola: adaptive binarization of a scanned page.
//!
//! # Usage
//!
//! ```text
//! binarize-sauvola [OPTIONS] <INPUT> <OUTPUT>
//! ```
//!
//! Options may come before or after `IN OUT`. The output policy defaults to a plain 0/255 image. `-T`, `-V`, `-P`
//! and `-X` (or `--output-type`) select the threshold map, the variable
//! grayscale ramp, the per-pixel statistics image and the multi-window
//! variable output.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use vellum_pipeline::{Raster, ResampleFilter, SauvolaConfig, SauvolaOutput};
use vellum_tools::ToolError;
use vellum_tools::args::{SauvolaArgs, Verbosity};

const NAME: &str = "binarize-sauvola";

/// Binarize an image with Sauvola's adaptive threshold.
#[derive(Parser)]
#[command(name = NAME, disable_version_flag = true)]
struct Cli {
    /// Input image (PNG, JPEG, BMP, TIFF, WebP).
    input: PathBuf,

    /// Output image; the format follows the extension.
    output: PathBuf,

    #[command(flatten)]
    sauvola: SauvolaArgs,

    /// Multiplier applied to the threshold.
    #[arg(short = 't', long, default_value_t = SauvolaConfig::DEFAULT_THRESHOLD_SCALE)]
    threshold_scale: f64,

    /// Offset added to the threshold, as a fraction of 255.
    #[arg(
        short = 'b',
        long,
        default_value_t = SauvolaConfig::DEFAULT_THRESHOLD_BIAS,
        allow_negative_numbers = true
    )]
    threshold_bias: f64,

    /// Output policy: b|binary|binarized, t|threshold, v|variable,
    /// p|pixels|pixelinfo, multiw|variable-multiw.
    #[arg(long, group = "policy")]
    output_type: Option<SauvolaOutput>,

    /// Write the threshold map.
    #[arg(short = 'T', long, group = "policy")]
    threshold_map: bool,

    /// Write the variable grayscale ramp.
    #[arg(short = 'V', long, group = "policy")]
    variable: bool,

    /// Write per-pixel statistics (inverted value, 2x stddev, mean).
    #[arg(short = 'P', long, group = "policy")]
    pixel_info: bool,

    /// Variable output with one window per channel (1 to 3 sizes).
    #[arg(
        short = 'X',
        long,
        alias = "multi-window-size",
        value_delimiter = ',',
        num_args = 1,
        value_name = "W1,W2,W3",
        conflicts_with_all = ["threshold_map", "variable", "pixel_info"]
    )]
    multi_windows: Option<Vec<u32>>,

    /// Resize the input by this factor before binarizing.
    #[arg(short = 'S', long, default_value_t = 1.0)]
    prescale: f64,

    /// Full Sauvola config as a JSON string; other threshold flags are
    /// ignored.
    #[arg(long)]
    config_json: Option<String>,

    #[command(flatten)]
    verbosity: Verbosity,
}

impl Cli {
    fn output_policy(&self) -> Result<SauvolaOutput, ToolError> {
        let chosen = if self.threshold_map {
            Some(SauvolaOutput::ThresholdMap)
        } else if self.variable {
            Some(SauvolaOutput::Variable)
        } else if self.pixel_info {
            Some(SauvolaOutput::PixelDiagnostic)
        } else {
            self.output_type.clone()
        };

        match (chosen, &self.multi_windows) {
            (None | Some(SauvolaOutput::MultiWindow { .. }), Some(windows)) => {
                Ok(SauvolaOutput::MultiWindow {
                    windows: windows.clone(),
                })
            }
            (Some(SauvolaOutput::MultiWindow { .. }), None) => Err(ToolError::Usage(
                "variable-multiw output needs window sizes from -X".to_string(),
            )),
            (Some(other), Some(_)) => Err(ToolError::Usage(format!(
                "-X cannot be combined with {other} output"
            ))),
            (chosen, None) => Ok(chosen.unwrap_or_default()),
        }
    }

    fn config(&self) -> Result<SauvolaConfig, ToolError> {
        if let Some(json) = &self.config_json {
            return Ok(serde_json::from_str(json)?);
        }
        Ok(self.sauvola.apply(SauvolaConfig {
            threshold_scale: self.threshold_scale,
            threshold_bias: self.threshold_bias,
            output: self.output_policy()?,
            ..SauvolaConfig::default()
        }))
    }
}

fn run(cli: &Cli) -> Result<(), ToolError> {
    let config = cli.config()?;
    config.validate()?;
    tracing::info!(?config, "binarizing");

    let gray = vellum_tools::read_gray(&cli.input)?;
    let (gray, resized) = vellum_pipeline::prescale::prescale(&gray, cli.prescale, ResampleFilter::default())?;
    if resized {
        tracing::info!(width = gray.width(), height = gray.height(), "prescaled input");
    }

    let out: Raster = vellum_pipeline::sauvola::sauvola(&gray, &config)?;
    vellum_tools::save_output(&cli.output, out)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    vellum_tools::init_logging(cli.verbosity.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => vellum_tools::fail(NAME, &e),
    }
}
