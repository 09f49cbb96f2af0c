//! binarize: simple global or adaptive thresholding.
//!
//! # Usage
//!
//! ```text
//! binarize [OPTIONS] <INPUT> [OUTPUT]
//! ```
//!
//! With `-O` the chosen Otsu level is printed to stdout as a fraction of
//! 255, so the output file may be omitted.

#![allow(clippy::print_stdout)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use vellum_pipeline::{GlobalThreshold, Raster, ResampleFilter};
use vellum_tools::ToolError;
use vellum_tools::args::Verbosity;

const NAME: &str = "binarize";

/// Threshold an image globally (constant or Otsu) or adaptively.
#[derive(Parser)]
#[command(name = NAME, version)]
struct Cli {
    /// Input image (PNG, JPEG, BMP, TIFF, WebP).
    input: PathBuf,

    /// Output image; optional with `-O`.
    output: Option<PathBuf>,

    /// Constant threshold in [0, 1].
    #[arg(short = 't', long, default_value_t = GlobalThreshold::DEFAULT_LEVEL, group = "method")]
    threshold: f64,

    /// Use Otsu's method.
    #[arg(short = 'O', long, group = "method")]
    otsu: bool,

    /// Adaptive threshold against the local box mean.
    #[arg(short = 'M', long, group = "method")]
    adaptive_mean: bool,

    /// Adaptive threshold against the local Gaussian mean.
    #[arg(short = 'G', long, group = "method")]
    adaptive_gaussian: bool,

    /// Adaptive window size (odd, greater than 1).
    #[arg(short = 'w', long, default_value_t = GlobalThreshold::DEFAULT_WINDOW)]
    window: u32,

    /// Amount subtracted from the local mean, in [0, 1].
    #[arg(short = 'c', long, default_value_t = 0.0)]
    bias: f64,

    /// Resize the input by this factor before thresholding.
    #[arg(short = 'S', long, default_value_t = 1.0)]
    prescale: f64,

    #[command(flatten)]
    verbosity: Verbosity,
}

impl Cli {
    const fn method(&self) -> GlobalThreshold {
        if self.otsu {
            GlobalThreshold::Otsu
        } else if self.adaptive_mean {
            GlobalThreshold::AdaptiveMean {
                window: self.window,
                bias: self.bias,
            }
        } else if self.adaptive_gaussian {
            GlobalThreshold::AdaptiveGaussian {
                window: self.window,
                bias: self.bias,
            }
        } else {
            GlobalThreshold::Constant {
                level: self.threshold,
            }
        }
    }
}

fn run(cli: &Cli) -> Result<(), ToolError> {
    let method = cli.method();
    method.validate()?;
    if cli.output.is_none() && method != GlobalThreshold::Otsu {
        return Err(ToolError::Usage(
            "an output file is required unless -O is given".to_string(),
        ));
    }

    let gray = vellum_tools::read_gray(&cli.input)?;
    let (gray, _) = vellum_pipeline::prescale::prescale(&gray, cli.prescale, ResampleFilter::default())?;
    let result = vellum_pipeline::global_threshold::threshold(&gray, method)?;

    if let (GlobalThreshold::Otsu, Some(level)) = (method, result.level) {
        println!("{}", f64::from(level) / 255.0);
    }
    match &cli.output {
        Some(path) => vellum_tools::save_output(path, Raster::Gray(result.image)),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    vellum_tools::init_logging(cli.verbosity.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => vellum_tools::fail(NAME, &e),
    }
}
