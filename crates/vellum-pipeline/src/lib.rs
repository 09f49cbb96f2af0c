//! vellum-pipeline: Binarization and background isolation for scanned
//! pages (sans-IO).
//!
//! The building blocks are:
//!
//! - [`sauvola`]: adaptive thresholding over windowed mean and standard
//!   deviation, backed by integral images in [`integral`].
//! - [`morphology`]: mask editing (negate, clear border regions,
//!   distance-based inset and outset).
//! - [`inpaint`]: filling masked pixels from their surroundings.
//! - [`isolate`]: the full background isolation chain built on the
//!   three above.
//! - [`global_threshold`]: constant, Otsu and adaptive-mean thresholds.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! byte slices and image buffers. File handling and command-line parsing
//! live in `vellum-tools`.

pub mod blur;
pub mod decode;
pub mod diagnostics;
pub mod global_threshold;
pub mod inpaint;
pub mod integral;
pub mod isolate;
pub mod morphology;
pub mod prescale;
pub mod sauvola;
pub mod types;

pub use diagnostics::{IsolationDiagnostics, StageDiagnostics, StageMetrics};
pub use global_threshold::{GlobalThreshold, ThresholdResult};
pub use image::{GrayImage, RgbImage};
pub use inpaint::InpaintInit;
pub use integral::WINDOW_SIZE_LIMIT;
pub use isolate::{Isolation, IsolationConfig, IsolationOutput, IsolationResult};
pub use morphology::{DistanceNorm, MaskCommand};
pub use prescale::ResampleFilter;
pub use sauvola::{SauvolaConfig, SauvolaOutput};
pub use types::{Dimensions, PipelineError, Raster};

/// Decode `image_bytes` and binarize the luminance with Sauvola.
///
/// Convenience wrapper over [`decode::decode_gray`] and
/// [`sauvola::sauvola`]; the output shape follows `config.output`.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] or [`PipelineError::ImageDecode`]
/// for unreadable bytes, and any error [`sauvola::sauvola`] returns.
pub fn binarize_bytes(image_bytes: &[u8], config: &SauvolaConfig) -> Result<Raster, PipelineError> {
    let gray = decode::decode_gray(image_bytes)?;
    sauvola::sauvola(&gray, config)
}

/// Decode `image_bytes` and run background isolation.
///
/// Grayscale inputs stay grayscale; everything else is processed as RGB.
///
/// # Errors
///
/// Returns decode errors for unreadable bytes and any error
/// [`isolate::isolate_background_with_diagnostics`] returns.
pub fn isolate_bytes(
    image_bytes: &[u8],
    config: IsolationConfig,
) -> Result<IsolationResult, PipelineError> {
    let raster = decode::decode_any(image_bytes)?;
    isolate::isolate_background_with_diagnostics(raster, config)
}
