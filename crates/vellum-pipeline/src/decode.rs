//! Image decoding into pipeline rasters.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, TIFF, WebP) and produces
//! either a single-channel grayscale image (for binarization and mask
//! operations) or a [`Raster`] that keeps colour when the source has it
//! (for background isolation).
//!
//! This is the first step of every tool: raw bytes in, raster out.

use image::{DynamicImage, GrayImage};

use crate::types::{PipelineError, Raster};

/// Decode raw image bytes.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
/// Returns [`PipelineError::EmptyImage`] if the decoded image has zero
/// width or height.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    if img.width() == 0 || img.height() == 0 {
        return Err(PipelineError::EmptyImage);
    }
    Ok(img)
}

/// Decode raw image bytes and convert to grayscale.
///
/// Colour sources go through the same BT.601 luma as
/// [`Raster::to_gray`].
///
/// # Errors
///
/// See [`decode`].
pub fn decode_gray(bytes: &[u8]) -> Result<GrayImage, PipelineError> {
    Ok(to_raster(&decode(bytes)?).into_gray())
}

/// Decode raw image bytes, keeping colour if the source has it.
///
/// Colour sources become [`Raster::Rgb`] (alpha is dropped); grayscale
/// sources become [`Raster::Gray`].
///
/// # Errors
///
/// See [`decode`].
pub fn decode_any(bytes: &[u8]) -> Result<Raster, PipelineError> {
    Ok(to_raster(&decode(bytes)?))
}

/// Convert an already-decoded image into a [`Raster`].
#[must_use]
pub fn to_raster(image: &DynamicImage) -> Raster {
    if image.color().has_color() {
        Raster::Rgb(image.to_rgb8())
    } else {
        Raster::Gray(image.to_luma8())
    }
}
