//! Simple thresholding: a constant level, Otsu's method, or an
//! adaptive local mean.
//!
//! These are the quick alternatives to [`sauvola`](crate::sauvola) for
//! clean scans. Every method writes 255 for pixels above the threshold
//! and 0 otherwise.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::integral::IntegralStats;
use crate::types::PipelineError;

/// Thresholding method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GlobalThreshold {
    /// Fixed level as a fraction of 255.
    Constant {
        /// Threshold in `[0, 1]`.
        level: f64,
    },
    /// Level chosen by Otsu's method.
    Otsu,
    /// Box-window mean minus a bias.
    AdaptiveMean {
        /// Odd window size greater than 1.
        window: u32,
        /// Amount subtracted from the local mean, as a fraction of 255.
        bias: f64,
    },
    /// Gaussian-weighted local mean minus a bias.
    AdaptiveGaussian {
        /// Odd kernel size greater than 1.
        window: u32,
        /// Amount subtracted from the local mean, as a fraction of 255.
        bias: f64,
    },
}

impl GlobalThreshold {
    /// Default constant level.
    pub const DEFAULT_LEVEL: f64 = 0.5;
    /// Default adaptive window size.
    pub const DEFAULT_WINDOW: u32 = 3;

    /// Check the method's parameters.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a level or bias
    /// outside `[0, 1]` or an adaptive window that is even or not
    /// greater than 1.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match *self {
            Self::Constant { level } => unit_range("threshold", level),
            Self::Otsu => Ok(()),
            Self::AdaptiveMean { window, bias } | Self::AdaptiveGaussian { window, bias } => {
                if window <= 1 || window % 2 == 0 {
                    return Err(PipelineError::InvalidConfig(format!(
                        "adaptive window must be odd and greater than 1, got {window}"
                    )));
                }
                unit_range("bias", bias)
            }
        }
    }
}

impl Default for GlobalThreshold {
    fn default() -> Self {
        Self::Constant {
            level: Self::DEFAULT_LEVEL,
        }
    }
}

fn unit_range(name: &str, value: f64) -> Result<(), PipelineError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

/// Binary image plus the global level used, when there was one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdResult {
    /// 0/255 output.
    pub image: GrayImage,
    /// Global threshold level (constant and Otsu methods).
    pub level: Option<u8>,
}

/// Threshold `image` with `method`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `method` fails
/// [`GlobalThreshold::validate`], or any error from building the
/// adaptive window statistics.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn threshold(image: &GrayImage, method: GlobalThreshold) -> Result<ThresholdResult, PipelineError> {
    method.validate()?;
    let result = match method {
        GlobalThreshold::Constant { level } => {
            let cut = (level * 255.0).floor() as u8;
            ThresholdResult {
                image: above(image, cut),
                level: Some(cut),
            }
        }
        GlobalThreshold::Otsu => {
            let cut = imageproc::contrast::otsu_level(image);
            tracing::info!(level = cut, "otsu threshold");
            ThresholdResult {
                image: above(image, cut),
                level: Some(cut),
            }
        }
        GlobalThreshold::AdaptiveMean { window, bias } => {
            let stats = IntegralStats::from_image(image, window)?;
            let offset = (bias * 255.0).ceil();
            ThresholdResult {
                image: GrayImage::from_fn(image.width(), image.height(), |x, y| {
                    let local = stats.query(x, y).mean.round();
                    binary(f64::from(image.get_pixel(x, y).0[0]) > local - offset)
                }),
                level: None,
            }
        }
        GlobalThreshold::AdaptiveGaussian { window, bias } => {
            let local = crate::blur::blur_kernel(image, window);
            let offset = (bias * 255.0).ceil();
            ThresholdResult {
                image: GrayImage::from_fn(image.width(), image.height(), |x, y| {
                    let m = f64::from(local.get_pixel(x, y).0[0]);
                    binary(f64::from(image.get_pixel(x, y).0[0]) > m - offset)
                }),
                level: None,
            }
        }
    };
    Ok(result)
}

fn above(image: &GrayImage, cut: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        binary(image.get_pixel(x, y).0[0] > cut)
    })
}

const fn binary(on: bool) -> Luma<u8> {
    Luma([if on { 255 } else { 0 }])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn dot_on_page() -> GrayImage {
        GrayImage::from_fn(9, 9, |x, y| Luma([if (x, y) == (4, 4) { 30 } else { 210 }]))
    }

    #[test]
    fn constant_splits_at_half_range() {
        let img = GrayImage::from_vec(4, 1, vec![0, 127, 128, 255]).unwrap();
        let out = threshold(&img, GlobalThreshold::default()).unwrap();
        assert_eq!(out.image.as_raw(), &vec![0, 0, 255, 255]);
        assert_eq!(out.level, Some(127));
    }

    #[test]
    fn otsu_separates_bimodal_image() {
        let img = GrayImage::from_fn(10, 10, |x, _| Luma([if x < 5 { 30 } else { 200 }]));
        let out = threshold(&img, GlobalThreshold::Otsu).unwrap();
        let level = out.level.unwrap();
        assert!((30..200).contains(&level), "level {level}");
        for (x, _, p) in out.image.enumerate_pixels() {
            assert_eq!(p.0[0], if x < 5 { 0 } else { 255 });
        }
    }

    #[test]
    fn adaptive_mean_without_bias_rejects_flat_regions() {
        let img = GrayImage::from_pixel(6, 6, Luma([90]));
        let method = GlobalThreshold::AdaptiveMean { window: 3, bias: 0.0 };
        let out = threshold(&img, method).unwrap();
        assert!(out.image.pixels().all(|p| p.0[0] == 0));
        assert_eq!(out.level, None);
    }

    #[test]
    fn adaptive_mean_bias_accepts_flat_regions() {
        let img = GrayImage::from_pixel(6, 6, Luma([90]));
        let method = GlobalThreshold::AdaptiveMean { window: 3, bias: 0.1 };
        let out = threshold(&img, method).unwrap();
        assert!(out.image.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn adaptive_methods_find_dark_dot() {
        for method in [
            GlobalThreshold::AdaptiveMean { window: 3, bias: 0.05 },
            GlobalThreshold::AdaptiveGaussian { window: 5, bias: 0.05 },
        ] {
            let out = threshold(&dot_on_page(), method).unwrap();
            assert_eq!(out.image.get_pixel(4, 4).0[0], 0, "{method:?}");
            assert_eq!(out.image.get_pixel(0, 0).0[0], 255, "{method:?}");
            assert_eq!(out.image.get_pixel(8, 8).0[0], 255, "{method:?}");
        }
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        let bad = [
            GlobalThreshold::Constant { level: 1.5 },
            GlobalThreshold::Constant { level: -0.1 },
            GlobalThreshold::AdaptiveMean { window: 4, bias: 0.0 },
            GlobalThreshold::AdaptiveMean { window: 1, bias: 0.0 },
            GlobalThreshold::AdaptiveGaussian { window: 5, bias: 2.0 },
        ];
        for method in bad {
            assert!(
                matches!(method.validate(), Err(PipelineError::InvalidConfig(_))),
                "expected rejection for {method:?}"
            );
        }
    }
}
