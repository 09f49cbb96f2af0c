//! Image pre-scaling before local analysis.
//!
//! Resizes the grayscale input by a positive factor so that the
//! analysis window covers a different physical extent of the page.
//! All size arithmetic is checked before any allocation happens.
//!
//! A factor of 1.0, or one that leaves both dimensions unchanged after
//! truncation, returns the image untouched.

use std::fmt;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::types::{MAX_IMAGE_EXTENT, PipelineError};

/// Resampling filter used when pre-scaling.
///
/// Ordered from fastest/lowest-quality to slowest/highest-quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResampleFilter {
    /// Nearest-neighbor: fastest, blocky artifacts.
    Nearest,
    /// Bilinear interpolation: fast, decent quality.
    Triangle,
    /// Bicubic (Catmull-Rom): moderate speed, good quality.
    CatmullRom,
    /// Gaussian: moderate speed, smooth output.
    Gaussian,
    /// Lanczos with 3 lobes: slowest, sharpest.
    #[default]
    Lanczos3,
}

impl ResampleFilter {
    /// Convert to the `image` crate's `FilterType`.
    const fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Triangle => image::imageops::FilterType::Triangle,
            Self::CatmullRom => image::imageops::FilterType::CatmullRom,
            Self::Gaussian => image::imageops::FilterType::Gaussian,
            Self::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for ResampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => f.write_str("Nearest"),
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Gaussian => f.write_str("Gaussian"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Compute the pre-scaled size of a `width` x `height` image.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `factor` is not a finite
/// positive number, [`PipelineError::ImageTooLarge`] if either scaled
/// dimension or the scaled area would exceed [`MAX_IMAGE_EXTENT`], and
/// [`PipelineError::EmptyImage`] if a scaled dimension truncates to zero.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn scaled_size(width: u32, height: u32, factor: f64) -> Result<(u32, u32), PipelineError> {
    if !factor.is_finite() || factor <= 0.0 {
        return Err(PipelineError::InvalidConfig(format!(
            "prescale factor must be positive, got {factor}"
        )));
    }

    let limit = MAX_IMAGE_EXTENT as f64;
    let too_large = || PipelineError::ImageTooLarge {
        width: (factor * f64::from(width)) as u64,
        height: (factor * f64::from(height)) as u64,
    };
    if factor.mul_add(f64::from(width), 1.0) >= limit
        || factor.mul_add(f64::from(height), 1.0) >= limit
    {
        return Err(too_large());
    }

    // Both products are below i32::MAX here, so truncation into u32 is exact.
    let new_width = (factor * f64::from(width)) as u32;
    let new_height = (factor * f64::from(height)) as u32;
    if new_width == 0 || new_height == 0 {
        return Err(PipelineError::EmptyImage);
    }
    if u64::from(new_width) * u64::from(new_height) > MAX_IMAGE_EXTENT {
        return Err(too_large());
    }
    Ok((new_width, new_height))
}

/// Pre-scale a grayscale image by `factor` using `filter`.
///
/// Returns the (possibly unchanged) image and whether resampling was
/// actually applied.
///
/// # Errors
///
/// See [`scaled_size`].
pub fn prescale(
    image: &GrayImage,
    factor: f64,
    filter: ResampleFilter,
) -> Result<(GrayImage, bool), PipelineError> {
    if (factor - 1.0).abs() < f64::EPSILON {
        return Ok((image.clone(), false));
    }

    let (new_width, new_height) = scaled_size(image.width(), image.height(), factor)?;
    if (new_width, new_height) == image.dimensions() {
        return Ok((image.clone(), false));
    }

    tracing::debug!(
        from_width = image.width(),
        from_height = image.height(),
        new_width,
        new_height,
        %filter,
        "prescaling image"
    );
    let resized = image::imageops::resize(image, new_width, new_height, filter.to_image_filter());
    Ok((resized, true))
}
