//! Background isolation: estimate the paper background of a scanned
//! page and divide it out.
//!
//! The pipeline runs strictly forward:
//!
//! 1. Sauvola-binarize the luminance view to find text.
//! 2. Denoise the text mask with two insets.
//! 3. Inpaint the original image under the mask.
//! 4. Blur the background estimate.
//! 5. Emit either `alpha * input / background` or the background itself.
//! 6. Optionally stretch the result to the full brightness range.
//!
//! [`Isolation`] lets the caller drive the stages one at a time and
//! inspect each intermediate:
//!
//! ```rust
//! # use vellum_pipeline::{Isolation, IsolationConfig, PipelineError, Raster};
//! # fn run(page: Raster) -> Result<(), PipelineError> {
//! let result = Isolation::new(page, IsolationConfig::default())
//!     .threshold()?
//!     .refine_mask()
//!     .inpaint()?
//!     .blur()
//!     .compose()?
//!     .stretch()
//!     .into_result();
//! println!("{}", result.diagnostics.report());
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state. The
//! original image is carried to the end because compositing needs it.

use std::fmt;
use std::time::Instant;

use image::{GrayImage, ImageBuffer, Pixel};
use serde::{Deserialize, Serialize};

use crate::diagnostics::{
    IsolationDiagnostics, IsolationSummary, StageDiagnostics, StageMetrics, count_foreground,
};
use crate::inpaint::InpaintInit;
use crate::morphology::{DistanceNorm, inset, negate};
use crate::sauvola::{SauvolaConfig, SauvolaOutput};
use crate::types::{PipelineError, Raster};

/// Which image the pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IsolationOutput {
    /// Input divided by the background estimate, scaled by alpha.
    #[default]
    Normalized,
    /// The background estimate itself.
    Background,
}

impl fmt::Display for IsolationOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normalized => f.write_str("normalized"),
            Self::Background => f.write_str("background"),
        }
    }
}

/// Parameters for background isolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Sauvola window size for the text mask.
    pub window_size: u32,
    /// Sauvola `k` for the text mask.
    pub k: f64,
    /// Sauvola standard-deviation normalizer multiple.
    pub r_scale: f64,
    /// How masked pixels are seeded before diffusion.
    pub inpaint_init: InpaintInit,
    /// Diffusion passes.
    pub inpaint_iterations: u32,
    /// Inset applied to the text mask (drops specks smaller than this).
    pub denoise_distance_1: f64,
    /// Inset applied to the complement (grows the text mask).
    pub denoise_distance_2: f64,
    /// Odd Gaussian kernel size for the background; 1 disables blur.
    pub background_blur: u32,
    /// Gain applied when dividing by the background, in `[0, 1]`.
    pub background_alpha: f64,
    /// Which image to produce.
    pub output: IsolationOutput,
    /// Stretch the output to the full brightness range.
    pub stretch_brightness: bool,
}

impl IsolationConfig {
    /// Default inpaint iteration count.
    pub const DEFAULT_INPAINT_ITERATIONS: u32 = 16;
    /// Default first denoise distance.
    pub const DEFAULT_DENOISE_DISTANCE_1: f64 = 1.0;
    /// Default second denoise distance.
    pub const DEFAULT_DENOISE_DISTANCE_2: f64 = 5.0;
    /// Default background blur size.
    pub const DEFAULT_BACKGROUND_BLUR: u32 = 9;
    /// Default background alpha.
    pub const DEFAULT_BACKGROUND_ALPHA: f64 = 0.9;

    /// Sauvola parameters used for the text mask.
    #[must_use]
    pub fn sauvola(&self) -> SauvolaConfig {
        SauvolaConfig {
            window_size: self.window_size,
            k: self.k,
            r_scale: self.r_scale,
            threshold_scale: 1.0,
            threshold_bias: 0.0,
            output: SauvolaOutput::Binary,
        }
    }

    /// Check every parameter against its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first
    /// offending parameter.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.sauvola().validate()?;
        for (name, d) in [
            ("denoise_distance_1", self.denoise_distance_1),
            ("denoise_distance_2", self.denoise_distance_2),
        ] {
            if !d.is_finite() || d < 0.0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be non-negative, got {d}"
                )));
            }
        }
        if self.background_blur == 0 || self.background_blur % 2 == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "background_blur must be odd and at least 1, got {}",
                self.background_blur
            )));
        }
        if !(0.0..=1.0).contains(&self.background_alpha) {
            return Err(PipelineError::InvalidConfig(format!(
                "background_alpha must be within [0, 1], got {}",
                self.background_alpha
            )));
        }
        Ok(())
    }
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            window_size: SauvolaConfig::DEFAULT_WINDOW_SIZE,
            k: SauvolaConfig::DEFAULT_K,
            r_scale: SauvolaConfig::DEFAULT_R_SCALE,
            inpaint_init: InpaintInit::default(),
            inpaint_iterations: Self::DEFAULT_INPAINT_ITERATIONS,
            denoise_distance_1: Self::DEFAULT_DENOISE_DISTANCE_1,
            denoise_distance_2: Self::DEFAULT_DENOISE_DISTANCE_2,
            background_blur: Self::DEFAULT_BACKGROUND_BLUR,
            background_alpha: Self::DEFAULT_BACKGROUND_ALPHA,
            output: IsolationOutput::default(),
            stretch_brightness: false,
        }
    }
}

/// Output image plus the diagnostics of the run that produced it.
#[derive(Debug, Clone)]
pub struct IsolationResult {
    /// The normalized image or background estimate.
    pub output: Raster,
    /// Per-stage timing and metrics.
    pub diagnostics: IsolationDiagnostics,
}

/// Run the whole pipeline and return the output image.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an invalid `config`,
/// [`PipelineError::ImageTooLarge`] if the Sauvola window cannot be
/// padded, and [`PipelineError::NoUnmaskedPixels`] if the text mask
/// covers the whole page.
pub fn isolate_background(image: Raster, config: IsolationConfig) -> Result<Raster, PipelineError> {
    Ok(isolate_background_with_diagnostics(image, config)?.output)
}

/// [`isolate_background`], keeping the per-stage diagnostics.
///
/// # Errors
///
/// See [`isolate_background`].
#[tracing::instrument(skip_all, fields(width = image.width(), height = image.height()))]
pub fn isolate_background_with_diagnostics(
    image: Raster,
    config: IsolationConfig,
) -> Result<IsolationResult, PipelineError> {
    Ok(Isolation::new(image, config)
        .threshold()?
        .refine_mask()
        .inpaint()?
        .blur()
        .compose()?
        .stretch()
        .into_result())
}

/// Divide `input` by `background` per sample.
///
/// Each output sample is `clamp(alpha * input / background, 0, 1) * 255`,
/// truncated. A zero background sample passes the input sample through
/// unchanged. Returns the normalized raster and the number of
/// pass-through samples.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if the two rasters differ in
/// size or channel count.
pub fn normalize(
    input: &Raster,
    background: &Raster,
    alpha: f64,
) -> Result<(Raster, u64), PipelineError> {
    let mismatch = || {
        PipelineError::InvalidConfig(format!(
            "background is {}x{}x{} but input is {}x{}x{}",
            background.width(),
            background.height(),
            background.channels(),
            input.width(),
            input.height(),
            input.channels(),
        ))
    };
    if input.dimensions() != background.dimensions() {
        return Err(mismatch());
    }

    let (raster, passed) = match (input, background) {
        (Raster::Gray(i), Raster::Gray(b)) => {
            let (out, n) = normalize_buffer(i, b, alpha);
            (Raster::Gray(out), n)
        }
        (Raster::Rgb(i), Raster::Rgb(b)) => {
            let (out, n) = normalize_buffer(i, b, alpha);
            (Raster::Rgb(out), n)
        }
        _ => return Err(mismatch()),
    };
    if passed > 0 {
        tracing::warn!(samples = passed, "zero background samples passed through unnormalized");
    }
    Ok((raster, passed))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn normalize_buffer<P>(
    input: &ImageBuffer<P, Vec<u8>>,
    background: &ImageBuffer<P, Vec<u8>>,
    alpha: f64,
) -> (ImageBuffer<P, Vec<u8>>, u64)
where
    P: Pixel<Subpixel = u8>,
{
    let mut out = input.clone();
    let mut passed = 0u64;
    for (o, &b) in out.iter_mut().zip(background.iter()) {
        if b == 0 {
            passed += 1;
        } else {
            let ratio = (alpha * f64::from(*o) / f64::from(b)).clamp(0.0, 1.0);
            *o = (ratio * 255.0) as u8;
        }
    }
    (out, passed)
}

/// Stretch `raster` so its luminance spans the full `0..=255` range.
///
/// The minimum and maximum are taken over the luminance view; every
/// channel is mapped with the same linear function, clamped and
/// truncated, which keeps colour ratios. Flat images are left unchanged. Returns
/// the luminance range found and whether the stretch was applied.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn stretch_brightness(raster: &mut Raster) -> (u8, u8, bool) {
    let luma = raster.to_gray();
    let min = luma.pixels().map(|p| p.0[0]).min().unwrap_or(0);
    let max = luma.pixels().map(|p| p.0[0]).max().unwrap_or(0);
    if min >= max {
        tracing::warn!(level = min, "image is flat, brightness stretch skipped");
        return (min, max, false);
    }

    let (lo, range) = (f64::from(min), f64::from(max - min));
    let samples: &mut [u8] = match raster {
        Raster::Gray(img) => &mut **img,
        Raster::Rgb(img) => &mut **img,
    };
    for v in samples.iter_mut() {
        *v = ((f64::from(*v) - lo) * 255.0 / range).clamp(0.0, 255.0) as u8;
    }
    (min, max, true)
}

// ───────────────────────── Entry point ───────────────────────────────

/// Entry point of the staged pipeline.
pub struct Isolation;

impl Isolation {
    /// Start a pipeline over `image`.
    ///
    /// Nothing runs until [`Pending::threshold`] is called; the config is
    /// validated there.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(image: Raster, config: IsolationConfig) -> Pending {
        Pending {
            config,
            image,
            started: Instant::now(),
        }
    }
}

/// Timings gathered so far.
#[derive(Debug)]
struct Log {
    started: Instant,
    stages: Vec<StageDiagnostics>,
}

impl Log {
    fn record(&mut self, since: Instant, metrics: StageMetrics) {
        self.stages.push(StageDiagnostics {
            duration: since.elapsed(),
            metrics,
        });
    }
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing.
#[must_use = "pipeline stages are consumed by advancing, call .threshold() to continue"]
pub struct Pending {
    config: IsolationConfig,
    image: Raster,
    started: Instant,
}

impl Pending {
    /// The input image.
    #[must_use]
    pub const fn image(&self) -> &Raster {
        &self.image
    }

    /// Validate the config and binarize the luminance view.
    ///
    /// The resulting mask is 255 on paper and 0 on text.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for an invalid config and
    /// [`PipelineError::ImageTooLarge`] if the window cannot be padded.
    pub fn threshold(self) -> Result<Thresholded, PipelineError> {
        self.config.validate()?;
        let t = Instant::now();
        let binary = crate::sauvola::binarize(&self.image.to_gray(), &self.config.sauvola())?;

        let total = self.image.dimensions().pixel_count();
        let foreground = total - count_foreground(&binary);
        tracing::debug!(window = self.config.window_size, foreground, "text mask computed");

        let mut log = Log {
            started: self.started,
            stages: Vec::new(),
        };
        log.record(
            t,
            StageMetrics::Threshold {
                window_size: self.config.window_size,
                k: self.config.k,
                r_scale: self.config.r_scale,
                foreground_pixels: foreground,
                total_pixels: total,
            },
        );
        Ok(Thresholded {
            config: self.config,
            image: self.image,
            binary,
            log,
        })
    }
}

// ───────────────────────── Stage 1: Thresholded ──────────────────────

/// Pipeline state after Sauvola binarization.
#[must_use = "pipeline stages are consumed by advancing, call .refine_mask() to continue"]
pub struct Thresholded {
    config: IsolationConfig,
    image: Raster,
    binary: GrayImage,
    log: Log,
}

impl Thresholded {
    /// The Sauvola binary image (255 = paper, 0 = text).
    #[must_use]
    pub const fn binary(&self) -> &GrayImage {
        &self.binary
    }

    /// Turn the binary image into a denoised fill mask.
    ///
    /// Negate, inset by the first distance, negate, inset by the second,
    /// negate. The result is 255 where the background must be
    /// reconstructed.
    pub fn refine_mask(self) -> Refined {
        let t = Instant::now();
        let mut mask = self.binary;
        negate(&mut mask);
        let before = count_foreground(&mask);
        inset(&mut mask, self.config.denoise_distance_1, DistanceNorm::L2);
        negate(&mut mask);
        inset(&mut mask, self.config.denoise_distance_2, DistanceNorm::L2);
        negate(&mut mask);
        let after = count_foreground(&mask);
        tracing::debug!(before, after, "fill mask refined");

        let mut log = self.log;
        log.record(
            t,
            StageMetrics::RefineMask {
                denoise_distance_1: self.config.denoise_distance_1,
                denoise_distance_2: self.config.denoise_distance_2,
                foreground_before: before,
                foreground_after: after,
            },
        );
        Refined {
            config: self.config,
            image: self.image,
            mask,
            log,
        }
    }
}

// ───────────────────────── Stage 2: Refined ──────────────────────────

/// Pipeline state after mask refinement.
#[must_use = "pipeline stages are consumed by advancing, call .inpaint() to continue"]
pub struct Refined {
    config: IsolationConfig,
    image: Raster,
    mask: GrayImage,
    log: Log,
}

impl Refined {
    /// The fill mask (255 = reconstruct, 0 = keep).
    #[must_use]
    pub const fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// Reconstruct the background under the mask.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoUnmaskedPixels`] if the mask covers
    /// the whole image.
    pub fn inpaint(self) -> Result<Inpainted, PipelineError> {
        let t = Instant::now();
        let background = crate::inpaint::inpaint(
            &self.image,
            &self.mask,
            self.config.inpaint_init,
            self.config.inpaint_iterations,
        )?;

        let mut log = self.log;
        log.record(
            t,
            StageMetrics::Inpaint {
                init: self.config.inpaint_init,
                iterations: self.config.inpaint_iterations,
                inpainted_pixels: count_foreground(&self.mask),
            },
        );
        Ok(Inpainted {
            config: self.config,
            image: self.image,
            background,
            log,
        })
    }
}

// ───────────────────────── Stage 3: Inpainted ────────────────────────

/// Pipeline state after inpainting.
#[must_use = "pipeline stages are consumed by advancing, call .blur() to continue"]
pub struct Inpainted {
    config: IsolationConfig,
    image: Raster,
    background: Raster,
    log: Log,
}

impl Inpainted {
    /// The unblurred background estimate.
    #[must_use]
    pub const fn background(&self) -> &Raster {
        &self.background
    }

    /// Blur the background estimate.
    pub fn blur(self) -> Blurred {
        let t = Instant::now();
        let size = self.config.background_blur;
        let background = crate::blur::blur_raster(&self.background, size);

        let mut log = self.log;
        log.record(
            t,
            StageMetrics::Blur {
                size,
                sigma: crate::blur::kernel_sigma(size),
            },
        );
        Blurred {
            config: self.config,
            image: self.image,
            background,
            log,
        }
    }
}

// ───────────────────────── Stage 4: Blurred ──────────────────────────

/// Pipeline state after blurring the background.
#[must_use = "pipeline stages are consumed by advancing, call .compose() to continue"]
pub struct Blurred {
    config: IsolationConfig,
    image: Raster,
    background: Raster,
    log: Log,
}

impl Blurred {
    /// The blurred background estimate.
    #[must_use]
    pub const fn background(&self) -> &Raster {
        &self.background
    }

    /// Produce the configured output image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the background does
    /// not match the input in size or channels.
    pub fn compose(self) -> Result<Composed, PipelineError> {
        let t = Instant::now();
        let (output, zero_background_samples) = match self.config.output {
            IsolationOutput::Normalized => {
                normalize(&self.image, &self.background, self.config.background_alpha)?
            }
            IsolationOutput::Background => (self.background, 0),
        };

        let mut log = self.log;
        log.record(
            t,
            StageMetrics::Compose {
                output: self.config.output,
                alpha: self.config.background_alpha,
                zero_background_samples,
            },
        );
        Ok(Composed {
            config: self.config,
            output,
            log,
        })
    }
}

// ───────────────────────── Stage 5: Composed ─────────────────────────

/// Pipeline state after compositing.
#[must_use = "pipeline stages are consumed by advancing, call .stretch() to continue"]
pub struct Composed {
    config: IsolationConfig,
    output: Raster,
    log: Log,
}

impl Composed {
    /// The composed output before any brightness stretch.
    #[must_use]
    pub const fn output(&self) -> &Raster {
        &self.output
    }

    /// Stretch brightness if the config asks for it.
    pub fn stretch(self) -> Stretched {
        let mut log = self.log;
        let mut output = self.output;
        if self.config.stretch_brightness {
            let t = Instant::now();
            let (min, max, applied) = stretch_brightness(&mut output);
            log.record(t, StageMetrics::Stretch { min, max, applied });
        }
        Stretched { output, log }
    }
}

// ───────────────────────── Stage 6: Stretched ────────────────────────

/// Final pipeline state.
pub struct Stretched {
    output: Raster,
    log: Log,
}

impl Stretched {
    /// The final output image.
    #[must_use]
    pub const fn output(&self) -> &Raster {
        &self.output
    }

    /// Consume the pipeline, returning the output and diagnostics.
    #[must_use]
    pub fn into_result(self) -> IsolationResult {
        let dims = self.output.dimensions();
        let diagnostics = IsolationDiagnostics {
            stages: self.log.stages,
            total_duration: self.log.started.elapsed(),
            summary: IsolationSummary {
                image_width: dims.width,
                image_height: dims.height,
                pixel_count: dims.pixel_count(),
                channels: self.output.channels(),
            },
        };
        IsolationResult {
            output: self.output,
            diagnostics,
        }
    }
}
