//! Gaussian blur of the background estimate.
//!
//! The blur strength is given as an odd kernel size, the way scanning
//! tools usually expose it, and converted to a sigma with the usual
//! `0.3 * ((size - 1) / 2 - 1) + 0.8` rule. A size of 1 means no blur.
//! Colour rasters are blurred per channel by imageproc's generic filter.

use image::{ImageBuffer, Pixel};

use crate::types::Raster;

/// Sigma for an odd Gaussian kernel `size`.
///
/// Returns 0 for sizes below 3, which means "no blur".
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn kernel_sigma(size: u32) -> f32 {
    if size < 3 {
        return 0.0;
    }
    0.3f32.mul_add((size - 1) as f32 * 0.5 - 1.0, 0.8)
}

/// Blur an 8-bit buffer of any channel layout with the Gaussian for
/// kernel `size`. Sizes below 3 return a copy.
#[must_use = "returns the blurred image"]
pub fn blur_kernel<P>(image: &ImageBuffer<P, Vec<u8>>, size: u32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let sigma = kernel_sigma(size);
    if sigma <= 0.0 {
        return image.clone();
    }
    imageproc::filter::gaussian_blur_f32(image, sigma)
}

/// Blur every channel of `raster` with the Gaussian for kernel `size`.
#[must_use = "returns the blurred raster"]
pub fn blur_raster(raster: &Raster, size: u32) -> Raster {
    tracing::debug!(size, sigma = kernel_sigma(size), "blurring background");
    match raster {
        Raster::Gray(img) => Raster::Gray(blur_kernel(img, size)),
        Raster::Rgb(img) => Raster::Rgb(blur_kernel(img, size)),
    }
}
