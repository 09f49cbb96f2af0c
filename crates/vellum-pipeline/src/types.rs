//! Shared types for the vellum processing pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference masks and
/// single-channel rasters without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can reference colour
/// rasters without depending on `image` directly.
pub use image::RgbImage;

/// Largest image extent (per axis and in total area) any stage will
/// allocate for. Matches the signed 32-bit addressing limit of common
/// image codecs.
pub const MAX_IMAGE_EXTENT: u64 = i32::MAX as u64;

/// An 8-bit raster that is either single-channel or 3-channel colour.
///
/// Each stage takes ownership of the raster it transforms and hands a
/// new (or mutated) raster downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Raster {
    /// Single-channel intensity.
    Gray(GrayImage),
    /// Three-channel colour in R, G, B order.
    Rgb(RgbImage),
}

impl Raster {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            Self::Gray(img) => img.width(),
            Self::Rgb(img) => img.width(),
        }
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        match self {
            Self::Gray(img) => img.height(),
            Self::Rgb(img) => img.height(),
        }
    }

    /// Image dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width(),
            height: self.height(),
        }
    }

    /// Number of channels per pixel (1 or 3).
    #[must_use]
    pub const fn channels(&self) -> u8 {
        match self {
            Self::Gray(_) => 1,
            Self::Rgb(_) => 3,
        }
    }

    /// Luminance view of the raster.
    ///
    /// Single-channel rasters are returned as-is; colour rasters are
    /// converted with BT.601 weights (see [`bt601_luma`]).
    #[must_use = "returns the grayscale view"]
    pub fn to_gray(&self) -> GrayImage {
        match self {
            Self::Gray(img) => img.clone(),
            Self::Rgb(img) => bt601_luma(img),
        }
    }

    /// Consume the raster, converting colour to grayscale if needed.
    #[must_use = "returns the grayscale raster"]
    pub fn into_gray(self) -> GrayImage {
        match self {
            Self::Gray(img) => img,
            Self::Rgb(img) => bt601_luma(&img),
        }
    }

    /// Convert into a `DynamicImage` for encoding.
    #[must_use]
    pub fn into_dynamic(self) -> image::DynamicImage {
        match self {
            Self::Gray(img) => image::DynamicImage::ImageLuma8(img),
            Self::Rgb(img) => image::DynamicImage::ImageRgb8(img),
        }
    }

    /// Whether every sample is either 0 or 255.
    #[must_use]
    pub fn is_bilevel(&self) -> bool {
        let raw = match self {
            Self::Gray(img) => img.as_raw(),
            Self::Rgb(img) => img.as_raw(),
        };
        raw.iter().all(|&v| v == 0 || v == 255)
    }
}

impl From<GrayImage> for Raster {
    fn from(img: GrayImage) -> Self {
        Self::Gray(img)
    }
}

impl From<RgbImage> for Raster {
    fn from(img: RgbImage) -> Self {
        Self::Rgb(img)
    }
}

/// BT.601 luma (`0.299 R + 0.587 G + 0.114 B`) in 14-bit fixed point,
/// rounded to nearest.
#[must_use = "returns the luma image"]
pub fn bt601_luma(image: &RgbImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const SHIFT: u32 = 14;

    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let sum = R * u32::from(r) + G * u32::from(g) + B * u32::from(b);
        let luma = (sum + (1 << (SHIFT - 1))) >> SHIFT;
        image::Luma([u8::try_from(luma).unwrap_or(u8::MAX)])
    })
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Errors that can occur during pipeline processing.
///
/// Uses custom `Serialize`/`Deserialize` because `image::ImageError`
/// does not implement serde traits. The `ImageDecode` variant is
/// serialized as its `Display` string.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The image data could not be decoded.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input byte slice was empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The image (or the pre-scaled image) has zero width or height.
    #[error("image is empty")]
    EmptyImage,

    /// A parameter is outside its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested image/window combination would overflow
    /// addressable image size.
    #[error("image of {width}x{height} pixels is too large to process")]
    ImageTooLarge {
        /// Requested width (saturated to `u64`).
        width: u64,
        /// Requested height (saturated to `u64`).
        height: u64,
    },

    /// The mask covers the whole image, leaving no known pixel to
    /// initialise inpainting from.
    #[error("no unmasked pixels to inpaint from")]
    NoUnmaskedPixels,
}

/// Serde-compatible proxy for `PipelineError`.
#[derive(Serialize, Deserialize)]
enum PipelineErrorProxy {
    ImageDecode(String),
    EmptyInput,
    EmptyImage,
    InvalidConfig(String),
    ImageTooLarge { width: u64, height: u64 },
    NoUnmaskedPixels,
}

impl Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::ImageDecode(e) => PipelineErrorProxy::ImageDecode(e.to_string()),
            Self::EmptyInput => PipelineErrorProxy::EmptyInput,
            Self::EmptyImage => PipelineErrorProxy::EmptyImage,
            Self::InvalidConfig(s) => PipelineErrorProxy::InvalidConfig(s.clone()),
            Self::ImageTooLarge { width, height } => PipelineErrorProxy::ImageTooLarge {
                width: *width,
                height: *height,
            },
            Self::NoUnmaskedPixels => PipelineErrorProxy::NoUnmaskedPixels,
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PipelineError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = PipelineErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            PipelineErrorProxy::ImageDecode(msg) => {
                Self::ImageDecode(image::ImageError::IoError(std::io::Error::other(msg)))
            }
            PipelineErrorProxy::EmptyInput => Self::EmptyInput,
            PipelineErrorProxy::EmptyImage => Self::EmptyImage,
            PipelineErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
            PipelineErrorProxy::ImageTooLarge { width, height } => {
                Self::ImageTooLarge { width, height }
            }
            PipelineErrorProxy::NoUnmaskedPixels => Self::NoUnmaskedPixels,
        })
    }
}
