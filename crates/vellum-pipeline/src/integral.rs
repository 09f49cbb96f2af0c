//! Windowed mean and standard deviation via integral images.
//!
//! A grayscale image is first extended by replicating its border so
//! that every pixel has a full `window x window` neighbourhood, then
//! two summed-area tables (sum and sum of squares) are built over the
//! padded image. Any window's mean and population standard deviation
//! can then be read back in O(1) with four lookups per table.
//!
//! # Window placement
//!
//! The padded image carries `ceil(window / 2)` replicated pixels on the
//! leading edge and `floor(window / 2)` on the trailing edge. The window
//! reported for original pixel `(x, y)` covers original rows
//! `y - ceil(window / 2) + 1 ..= y + floor(window / 2)` (and the same for
//! columns), which is centred for odd windows and reaches one pixel
//! further down/right for even ones. Both cases yield exactly `window`
//! samples per axis.
//!
//! # Overflow
//!
//! Sums are accumulated in `u64`. [`WINDOW_SIZE_LIMIT`] is the largest
//! window for which `window² · 255²` still fits, and
//! [`padded_size`] rejects image/window combinations whose padded area
//! exceeds [`MAX_IMAGE_EXTENT`], which also bounds the grand total of the
//! sum-of-squares table well below `u64::MAX`.

use image::GrayImage;

use crate::types::{MAX_IMAGE_EXTENT, PipelineError};

/// Largest supported window size: `16843009² · 255² < 2⁶⁴`.
pub const WINDOW_SIZE_LIMIT: u32 = 16_843_009;

/// Mean and population standard deviation of one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    /// Arithmetic mean of the window's samples.
    pub mean: f64,
    /// Population standard deviation of the window's samples.
    pub stddev: f64,
}

/// Leading and trailing padding for `window`.
#[must_use]
pub const fn padding(window: u32) -> (u32, u32) {
    (window.div_ceil(2), window / 2)
}

/// Validate a window size against [`WINDOW_SIZE_LIMIT`].
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `window` is zero or
/// exceeds the limit.
pub fn check_window(window: u32) -> Result<(), PipelineError> {
    if window < 1 {
        return Err(PipelineError::InvalidConfig(
            "window size is too small".to_string(),
        ));
    }
    if window > WINDOW_SIZE_LIMIT {
        return Err(PipelineError::InvalidConfig(format!(
            "window size {window} is too large (limit {WINDOW_SIZE_LIMIT})"
        )));
    }
    Ok(())
}

/// Size of the padded image for a `width` x `height` image and `window`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an out-of-range window,
/// [`PipelineError::EmptyImage`] for a zero-sized image, and
/// [`PipelineError::ImageTooLarge`] if the padded image would exceed
/// [`MAX_IMAGE_EXTENT`] along either axis or in area.
pub fn padded_size(width: u32, height: u32, window: u32) -> Result<(u32, u32), PipelineError> {
    check_window(window)?;
    if width == 0 || height == 0 {
        return Err(PipelineError::EmptyImage);
    }

    let padded_width = u64::from(width) + u64::from(window);
    let padded_height = u64::from(height) + u64::from(window);
    if padded_width > MAX_IMAGE_EXTENT
        || padded_height > MAX_IMAGE_EXTENT
        || padded_width * padded_height > MAX_IMAGE_EXTENT
    {
        return Err(PipelineError::ImageTooLarge {
            width: padded_width,
            height: padded_height,
        });
    }

    // Both are bounded by MAX_IMAGE_EXTENT, which fits in u32.
    let to_u32 = |v: u64| u32::try_from(v).map_err(|_| PipelineError::ImageTooLarge {
        width: padded_width,
        height: padded_height,
    });
    Ok((to_u32(padded_width)?, to_u32(padded_height)?))
}

/// Extend `image` by replicating its border pixels for `window`.
///
/// # Errors
///
/// See [`padded_size`].
pub fn pad_replicate(image: &GrayImage, window: u32) -> Result<GrayImage, PipelineError> {
    let (width, height) = image.dimensions();
    let (padded_width, padded_height) = padded_size(width, height, window)?;
    let (lead, _) = padding(window);

    Ok(GrayImage::from_fn(padded_width, padded_height, |x, y| {
        let sx = x.saturating_sub(lead).min(width - 1);
        let sy = y.saturating_sub(lead).min(height - 1);
        *image.get_pixel(sx, sy)
    }))
}

/// Owned summed-area table.
///
/// Cell `(x, y)` holds the sum of all source samples with column `< x`
/// and row `< y`; row and column 0 are the empty prefix.
#[derive(Debug, Clone)]
struct IntegralGrid {
    width: usize,
    data: Vec<u64>,
}

impl IntegralGrid {
    fn from_fn(image: &GrayImage, f: impl Fn(u64) -> u64) -> Self {
        let width = image.width() as usize + 1;
        let height = image.height() as usize + 1;
        let mut data = vec![0u64; width * height];

        for (y, row) in image.rows().enumerate() {
            let mut accum = 0u64;
            for (x, pixel) in row.enumerate() {
                accum += f(u64::from(pixel.0[0]));
                data[(y + 1) * width + x + 1] = data[y * width + x + 1] + accum;
            }
        }

        Self { width, data }
    }

    fn at(&self, x: usize, y: usize) -> u64 {
        self.data[y * self.width + x]
    }

    /// Sum over the half-open rectangle `[x0, x1) x [y0, y1)`.
    fn rect_sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        // Grouped so no intermediate goes negative.
        (self.at(x1, y1) + self.at(x0, y0)) - (self.at(x0, y1) + self.at(x1, y0))
    }
}

/// Paired sum / sum-of-squares integral images over a padded image.
#[derive(Debug, Clone)]
pub struct IntegralStats {
    window: u32,
    width: u32,
    height: u32,
    sum: IntegralGrid,
    sum_sq: IntegralGrid,
}

impl IntegralStats {
    /// Build the integral images over an already padded image.
    ///
    /// `padded` must be exactly `window` pixels wider and taller than the
    /// image it was padded from (see [`pad_replicate`]).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for an out-of-range
    /// window or a padded image too small to hold one original pixel.
    pub fn build(padded: &GrayImage, window: u32) -> Result<Self, PipelineError> {
        check_window(window)?;
        let (padded_width, padded_height) = padded.dimensions();
        if padded_width <= window || padded_height <= window {
            return Err(PipelineError::InvalidConfig(format!(
                "padded image {padded_width}x{padded_height} is too small for window {window}"
            )));
        }

        Ok(Self {
            window,
            width: padded_width - window,
            height: padded_height - window,
            sum: IntegralGrid::from_fn(padded, |v| v),
            sum_sq: IntegralGrid::from_fn(padded, |v| v * v),
        })
    }

    /// Pad `image` and build its integral images in one step.
    ///
    /// # Errors
    ///
    /// See [`pad_replicate`].
    pub fn from_image(image: &GrayImage, window: u32) -> Result<Self, PipelineError> {
        let padded = pad_replicate(image, window)?;
        Self::build(&padded, window)
    }

    /// Window size these tables were built for.
    #[must_use]
    pub const fn window(&self) -> u32 {
        self.window
    }

    /// Width of the original (unpadded) image.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height of the original (unpadded) image.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Raw `(sum, sum of squares)` of the window for original pixel
    /// `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` lies outside the original image.
    #[must_use]
    pub fn block_sums(&self, x: u32, y: u32) -> (u64, u64) {
        let w = self.window as usize;
        let x0 = x as usize + 1;
        let y0 = y as usize + 1;
        (
            self.sum.rect_sum(x0, y0, x0 + w, y0 + w),
            self.sum_sq.rect_sum(x0, y0, x0 + w, y0 + w),
        )
    }

    /// Mean and population standard deviation of the window for
    /// original pixel `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` lies outside the original image.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn query(&self, x: u32, y: u32) -> WindowStats {
        let (total, total_sq) = self.block_sums(x, y);
        let area = f64::from(self.window) * f64::from(self.window);
        let mean = total as f64 / area;
        // Uniform windows can cancel to a tiny negative variance.
        let variance = (total_sq as f64 / area - mean * mean).max(0.0);
        WindowStats {
            mean,
            stddev: variance.sqrt(),
        }
    }
}
