//! Background isolation diagnostics: timing and metrics for each stage.
//!
//! Every run of the [`isolate`](crate::isolate) pipeline records how
//! long each stage took and a few numbers describing what it did (mask
//! coverage, inpainted pixel count, zero-background pass-throughs,
//! stretch range). These are intended for parameter tuning.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::inpaint::InpaintInit;
use crate::isolate::IsolationOutput;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single isolation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationDiagnostics {
    /// Executed stages in order. Brightness stretch only appears when it
    /// was enabled.
    pub stages: Vec<StageDiagnostics>,
    /// Wall-clock duration of the whole run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Input image summary.
    pub summary: IsolationSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Sauvola binarization of the luminance view.
    Threshold {
        /// Analysis window size.
        window_size: u32,
        /// Sauvola `k`.
        k: f64,
        /// Standard-deviation normalizer multiple.
        r_scale: f64,
        /// Pixels classified as foreground (text).
        foreground_pixels: u64,
        /// Total pixel count.
        total_pixels: u64,
    },
    /// Mask denoising.
    RefineMask {
        /// First inset distance (removes small specks).
        denoise_distance_1: f64,
        /// Second inset distance.
        denoise_distance_2: f64,
        /// Foreground pixels before refinement.
        foreground_before: u64,
        /// Foreground pixels after refinement.
        foreground_after: u64,
    },
    /// Background reconstruction under the mask.
    Inpaint {
        /// Initialisation strategy.
        init: InpaintInit,
        /// Diffusion passes.
        iterations: u32,
        /// Pixels filled.
        inpainted_pixels: u64,
    },
    /// Background blur.
    Blur {
        /// Kernel size (1 means skipped).
        size: u32,
        /// Derived sigma.
        sigma: f32,
    },
    /// Final compositing.
    Compose {
        /// Which image was produced.
        output: IsolationOutput,
        /// Normalization gain.
        alpha: f64,
        /// Samples passed through because the background was zero.
        zero_background_samples: u64,
    },
    /// Brightness stretch.
    Stretch {
        /// Minimum luminance before stretching.
        min: u8,
        /// Maximum luminance before stretching.
        max: u8,
        /// Whether the image was rescaled (false for flat images).
        applied: bool,
    },
}

impl StageMetrics {
    /// Human-readable stage name.
    #[must_use]
    pub const fn stage_name(&self) -> &'static str {
        match self {
            Self::Threshold { .. } => "Threshold",
            Self::RefineMask { .. } => "Refine Mask",
            Self::Inpaint { .. } => "Inpaint",
            Self::Blur { .. } => "Blur",
            Self::Compose { .. } => "Compose",
            Self::Stretch { .. } => "Stretch",
        }
    }
}

/// High-level summary of the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationSummary {
    /// Image width in pixels.
    pub image_width: u32,
    /// Image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Channels per pixel (1 or 3).
    pub channels: u8,
}

impl IsolationDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Isolation Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels, {} channel(s))",
            self.summary.image_width,
            self.summary.image_height,
            self.summary.pixel_count,
            self.summary.channels,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for stage in &self.stages {
            let ms = duration_ms(stage.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            lines.push(format!(
                "{:<16} {ms:>8.3}ms {pct:>9.1}%  {}",
                stage.metrics.stage_name(),
                format_metrics(&stage.metrics),
            ));
        }

        lines.join("\n")
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Threshold {
            window_size,
            k,
            r_scale,
            foreground_pixels,
            total_pixels,
        } => format!(
            "w={window_size} k={k:.2} r={r_scale:.2} fg={foreground_pixels} ({:.1}%)",
            percent(*foreground_pixels, *total_pixels),
        ),
        StageMetrics::RefineMask {
            denoise_distance_1,
            denoise_distance_2,
            foreground_before,
            foreground_after,
        } => format!(
            "d1={denoise_distance_1:.1} d2={denoise_distance_2:.1} fg {foreground_before}->{foreground_after}",
        ),
        StageMetrics::Inpaint {
            init,
            iterations,
            inpainted_pixels,
        } => format!("{init} x{iterations}, {inpainted_pixels} px filled"),
        StageMetrics::Blur { size, sigma } => {
            if *size <= 1 {
                "skipped".to_string()
            } else {
                format!("size={size} sigma={sigma:.2}")
            }
        }
        StageMetrics::Compose {
            output,
            alpha,
            zero_background_samples,
        } => format!("{output} alpha={alpha:.2} zero-bg={zero_background_samples}"),
        StageMetrics::Stretch { min, max, applied } => {
            if *applied {
                format!("{min}..{max} -> 0..255")
            } else {
                format!("flat ({min}), unchanged")
            }
        }
    }
}

/// Count nonzero pixels in a mask.
pub(crate) fn count_foreground(mask: &image::GrayImage) -> u64 {
    mask.pixels().map(|p| u64::from(p.0[0] != 0)).sum()
}
