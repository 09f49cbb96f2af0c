//! Sauvola local thresholding.
//!
//! Every pixel is classified from the mean `m` and standard deviation
//! `s` of the window around it:
//!
//! ```text
//! threshold = scale * m * (1 + k * (s / R - 1)) + bias
//! ```
//!
//! where `R = r_scale * 127.5` and `bias = threshold_bias * 255`. The
//! [`SauvolaOutput`] policy decides what is written for each pixel: a
//! binary decision, the threshold itself, a variable intensity between
//! the `k = 1` and `k = 0` boundaries, a per-pixel diagnostic triple, or
//! a composite of several variable-intensity runs.
//!
//! Window statistics come from [`IntegralStats`], so the cost per pixel
//! is independent of the window size.

use std::fmt;
use std::str::FromStr;

use image::{GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::integral::{IntegralStats, WindowStats, check_window};
use crate::types::{PipelineError, Raster};

/// Largest number of windows a [`SauvolaOutput::MultiWindow`] run packs
/// into one RGB image.
pub const MAX_MULTI_WINDOWS: usize = 3;

/// What to write for each pixel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SauvolaOutput {
    /// 255 where the pixel is brighter than its threshold, else 0.
    #[default]
    Binary,
    /// The threshold itself, clamped to `0..=255`.
    ThresholdMap,
    /// Where the pixel sits between the `k = 1` boundary (0) and the
    /// `k = 0` boundary (255). Requires `r_scale >= 1`.
    Variable,
    /// RGB triple of inverted intensity, `2 * stddev` and mean.
    PixelDiagnostic,
    /// [`Variable`](Self::Variable) computed for up to three windows,
    /// one per RGB channel. If fewer than three windows are given the
    /// last one fills the remaining channels. Requires `r_scale >= 1`.
    MultiWindow {
        /// Window sizes for the R, G and B channels.
        windows: Vec<u32>,
    },
}

impl SauvolaOutput {
    /// Whether this policy interpolates between the `k` boundaries.
    #[must_use]
    pub const fn is_variable(&self) -> bool {
        matches!(self, Self::Variable | Self::MultiWindow { .. })
    }
}

impl fmt::Display for SauvolaOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("binary"),
            Self::ThresholdMap => f.write_str("threshold"),
            Self::Variable => f.write_str("variable"),
            Self::PixelDiagnostic => f.write_str("pixelinfo"),
            Self::MultiWindow { windows } => {
                f.write_str("variable-multiw")?;
                for (i, w) in windows.iter().enumerate() {
                    f.write_str(if i == 0 { ":" } else { "," })?;
                    write!(f, "{w}")?;
                }
                Ok(())
            }
        }
    }
}

/// Parses the command-line spellings of each policy.
///
/// The multi-window policy parses with an empty window list; callers
/// fill it in from a separate argument.
impl FromStr for SauvolaOutput {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "b" | "binary" | "binarized" => Ok(Self::Binary),
            "t" | "threshold" => Ok(Self::ThresholdMap),
            "v" | "variable" => Ok(Self::Variable),
            "p" | "pixels" | "pixelinfo" => Ok(Self::PixelDiagnostic),
            "multiw" | "variable-multiw" => Ok(Self::MultiWindow {
                windows: Vec::new(),
            }),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown output type '{other}'"
            ))),
        }
    }
}

/// Parameters for [`sauvola`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SauvolaConfig {
    /// Side of the square analysis window in pixels.
    pub window_size: u32,
    /// Sauvola bias `k`. Larger values lower the threshold in flat
    /// regions.
    pub k: f64,
    /// Standard-deviation normalizer as a multiple of 127.5.
    pub r_scale: f64,
    /// Multiplier applied to the threshold.
    pub threshold_scale: f64,
    /// Offset added to the threshold, as a fraction of 255.
    pub threshold_bias: f64,
    /// Output policy.
    pub output: SauvolaOutput,
}

impl SauvolaConfig {
    /// Default window size.
    pub const DEFAULT_WINDOW_SIZE: u32 = 60;
    /// Default `k`.
    pub const DEFAULT_K: f64 = 0.4;
    /// Default `r_scale`.
    pub const DEFAULT_R_SCALE: f64 = 1.0;
    /// Default `threshold_scale`.
    pub const DEFAULT_THRESHOLD_SCALE: f64 = 1.0;
    /// Default `threshold_bias`.
    pub const DEFAULT_THRESHOLD_BIAS: f64 = 0.0;

    /// Check every parameter against its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first
    /// offending parameter.
    pub fn validate(&self) -> Result<(), PipelineError> {
        check_window(self.window_size)?;
        if !self.k.is_finite() || self.k < 0.0 {
            return Err(invalid(format!("k must be non-negative, got {}", self.k)));
        }
        if !self.r_scale.is_finite() || self.r_scale <= 0.0 {
            return Err(invalid(format!(
                "r_scale must be positive, got {}",
                self.r_scale
            )));
        }
        if self.output.is_variable() && self.r_scale < 1.0 {
            return Err(invalid(format!(
                "r_scale must be at least 1 for {} output, got {}",
                self.output, self.r_scale
            )));
        }
        if !self.threshold_scale.is_finite() || self.threshold_scale <= 0.0 {
            return Err(invalid(format!(
                "threshold_scale must be positive, got {}",
                self.threshold_scale
            )));
        }
        if !self.threshold_bias.is_finite() {
            return Err(invalid(format!(
                "threshold_bias must be finite, got {}",
                self.threshold_bias
            )));
        }
        if let SauvolaOutput::MultiWindow { windows } = &self.output {
            if windows.is_empty() {
                return Err(invalid("variable-multiw output needs at least one window"));
            }
            if windows.len() > MAX_MULTI_WINDOWS {
                return Err(invalid(format!(
                    "variable-multiw output takes at most {MAX_MULTI_WINDOWS} windows, got {}",
                    windows.len()
                )));
            }
            for &w in windows {
                check_window(w)?;
            }
        }
        Ok(())
    }
}

impl Default for SauvolaConfig {
    fn default() -> Self {
        Self {
            window_size: Self::DEFAULT_WINDOW_SIZE,
            k: Self::DEFAULT_K,
            r_scale: Self::DEFAULT_R_SCALE,
            threshold_scale: Self::DEFAULT_THRESHOLD_SCALE,
            threshold_bias: Self::DEFAULT_THRESHOLD_BIAS,
            output: SauvolaOutput::Binary,
        }
    }
}

fn invalid(msg: impl Into<String>) -> PipelineError {
    PipelineError::InvalidConfig(msg.into())
}

/// Threshold coefficients in pixel units.
#[derive(Debug, Clone, Copy)]
struct Coefficients {
    k: f64,
    r: f64,
    scale: f64,
    bias: f64,
}

impl Coefficients {
    fn new(config: &SauvolaConfig) -> Self {
        Self {
            k: config.k,
            r: config.r_scale * 127.5,
            scale: config.threshold_scale,
            bias: 255.0 * config.threshold_bias,
        }
    }

    /// Sauvola threshold, truncated toward zero.
    fn threshold(self, stats: WindowStats) -> f64 {
        let t = self.scale * stats.mean * self.k.mul_add(stats.stddev / self.r - 1.0, 1.0)
            + self.bias;
        t.trunc()
    }

    fn binary(self, center: f64, stats: WindowStats) -> u8 {
        if center > self.threshold(stats) { 255 } else { 0 }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn threshold_level(self, stats: WindowStats) -> u8 {
        self.threshold(stats).clamp(0.0, 255.0) as u8
    }

    /// Position of `center` between the `k = 1` and `k = 0` thresholds.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn variable(self, center: f64, stats: WindowStats) -> u8 {
        let upper = self.scale.mul_add(stats.mean, self.bias);
        let lower = (self.scale * stats.mean).mul_add(stats.stddev / self.r, self.bias);
        let span = upper - lower;
        if span <= 0.0 {
            return if center > upper { 255 } else { 0 };
        }
        if center >= upper {
            return 255;
        }
        if center <= lower {
            return 0;
        }
        (255.0 * ((center - lower) / span)).clamp(0.0, 255.0) as u8
    }
}

/// Apply `f` to every pixel with the statistics of its `window`.
fn map_window(
    image: &GrayImage,
    window: u32,
    f: impl Fn(f64, WindowStats) -> u8,
) -> Result<GrayImage, PipelineError> {
    let stats = IntegralStats::from_image(image, window)?;
    Ok(GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([f(f64::from(image.get_pixel(x, y).0[0]), stats.query(x, y))])
    }))
}

/// Run Sauvola thresholding over `image` with the policy in `config`.
///
/// [`SauvolaOutput::PixelDiagnostic`] and
/// [`SauvolaOutput::MultiWindow`] produce an RGB raster; every other
/// policy produces a single-channel one.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` fails
/// [`SauvolaConfig::validate`], [`PipelineError::EmptyImage`] for a
/// zero-sized image, or [`PipelineError::ImageTooLarge`] if padding the
/// image for the window would overflow.
#[tracing::instrument(skip_all, fields(window = config.window_size, output = %config.output))]
pub fn sauvola(image: &GrayImage, config: &SauvolaConfig) -> Result<Raster, PipelineError> {
    config.validate()?;
    let coeffs = Coefficients::new(config);
    let window = config.window_size;

    let raster = match &config.output {
        SauvolaOutput::Binary => {
            Raster::Gray(map_window(image, window, |c, s| coeffs.binary(c, s))?)
        }
        SauvolaOutput::ThresholdMap => {
            Raster::Gray(map_window(image, window, |_, s| coeffs.threshold_level(s))?)
        }
        SauvolaOutput::Variable => {
            Raster::Gray(map_window(image, window, |c, s| coeffs.variable(c, s))?)
        }
        SauvolaOutput::PixelDiagnostic => Raster::Rgb(pixel_diagnostic(image, window)?),
        SauvolaOutput::MultiWindow { windows } => {
            Raster::Rgb(multi_window(image, windows, coeffs)?)
        }
    };

    tracing::debug!(
        width = image.width(),
        height = image.height(),
        channels = raster.channels(),
        "sauvola complete"
    );
    Ok(raster)
}

/// Binary Sauvola mask of `image`, whatever policy `config` names.
///
/// # Errors
///
/// See [`sauvola`].
pub fn binarize(image: &GrayImage, config: &SauvolaConfig) -> Result<GrayImage, PipelineError> {
    let binary = SauvolaConfig {
        output: SauvolaOutput::Binary,
        ..config.clone()
    };
    Ok(sauvola(image, &binary)?.into_gray())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn pixel_diagnostic(image: &GrayImage, window: u32) -> Result<RgbImage, PipelineError> {
    let stats = IntegralStats::from_image(image, window)?;
    Ok(RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let center = image.get_pixel(x, y).0[0];
        let s = stats.query(x, y);
        Rgb([255 - center, (2.0 * s.stddev) as u8, s.mean as u8])
    }))
}

fn multi_window(
    image: &GrayImage,
    windows: &[u32],
    coeffs: Coefficients,
) -> Result<RgbImage, PipelineError> {
    let planes = windows
        .iter()
        .map(|&w| map_window(image, w, |c, s| coeffs.variable(c, s)))
        .collect::<Result<Vec<_>, _>>()?;
    let last = planes.len().saturating_sub(1);
    let sample = |channel: usize, x: u32, y: u32| planes[channel.min(last)].get_pixel(x, y).0[0];

    Ok(RgbImage::from_fn(image.width(), image.height(), |x, y| {
        Rgb([sample(0, x, y), sample(1, x, y), sample(2, x, y)])
    }))
}
