//! Loading input images and saving results.

use std::ffi::OsStr;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageError};
use vellum_pipeline::{GrayImage, PipelineError, Raster};

/// Errors surfaced by the binaries.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The input file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// Input path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The output file could not be encoded or written.
    #[error("cannot write {}: {source}", path.display())]
    Write {
        /// Output path.
        path: PathBuf,
        /// Underlying encoder or I/O error.
        source: ImageError,
    },

    /// The pipeline rejected the input or parameters.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A `--config-json` value or diagnostics output could not be
    /// (de)serialized.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Arguments that parse individually but do not make sense together.
    #[error("{0}")]
    Usage(String),
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ToolError> {
    let bytes = std::fs::read(path).map_err(|source| ToolError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "loaded input");
    Ok(bytes)
}

/// Read and decode `path`, keeping colour when the file has it.
///
/// # Errors
///
/// Returns [`ToolError::Read`] if the file cannot be read and
/// [`ToolError::Pipeline`] if it cannot be decoded.
pub fn read_raster(path: &Path) -> Result<Raster, ToolError> {
    Ok(vellum_pipeline::decode::decode_any(&read_bytes(path)?)?)
}

/// Read and decode `path` as grayscale.
///
/// # Errors
///
/// See [`read_raster`].
pub fn read_gray(path: &Path) -> Result<GrayImage, ToolError> {
    Ok(vellum_pipeline::decode::decode_gray(&read_bytes(path)?)?)
}

fn is_png(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
}

/// Encode `raster` to `path`, choosing the format from the extension.
///
/// Bilevel images written as PNG use the best compression level.
///
/// # Errors
///
/// Returns [`ToolError::Write`] if encoding or writing fails.
pub fn save_output(path: &Path, raster: Raster) -> Result<(), ToolError> {
    let write_err = |source| ToolError::Write {
        path: path.to_path_buf(),
        source,
    };

    if is_png(path) && raster.is_bilevel() {
        let file = File::create(path).map_err(|e| write_err(ImageError::IoError(e)))?;
        let encoder = PngEncoder::new_with_quality(
            BufWriter::new(file),
            CompressionType::Best,
            FilterType::Adaptive,
        );
        let (width, height) = (raster.width(), raster.height());
        let (raw, color) = match &raster {
            Raster::Gray(img) => (img.as_raw(), ExtendedColorType::L8),
            Raster::Rgb(img) => (img.as_raw(), ExtendedColorType::Rgb8),
        };
        encoder
            .write_image(raw, width, height, color)
            .map_err(write_err)?;
    } else {
        raster.into_dynamic().save(path).map_err(write_err)?;
    }
    tracing::info!(path = %path.display(), "wrote output");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Luma;

    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vellum-tools-{}-{name}", std::process::id()))
    }

    #[test]
    fn bilevel_png_roundtrips() {
        let path = scratch("bilevel.png");
        let img = GrayImage::from_fn(9, 7, |x, y| Luma([if (x + y) % 3 == 0 { 255 } else { 0 }]));
        save_output(&path, Raster::Gray(img.clone())).unwrap();

        let back = read_gray(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn gray_png_keeps_single_channel() {
        let path = scratch("gray.png");
        let img = GrayImage::from_fn(5, 5, |x, _| Luma([u8::try_from(x * 40).unwrap()]));
        save_output(&path, Raster::Gray(img)).unwrap();

        let back = read_raster(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(back.channels(), 1);
    }

    #[test]
    fn missing_input_names_the_path() {
        let path = scratch("does-not-exist.png");
        let err = read_raster(&path).unwrap_err();
        assert!(matches!(err, ToolError::Read { .. }));
        assert!(err.to_string().contains("does-not-exist.png"));
    }

    #[test]
    fn png_extension_is_case_insensitive() {
        assert!(is_png(Path::new("out.PNG")));
        assert!(is_png(Path::new("dir/out.png")));
        assert!(!is_png(Path::new("out.tif")));
        assert!(!is_png(Path::new("png")));
    }
}
