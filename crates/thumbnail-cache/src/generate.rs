//! Thumbnail codec: decode a source image, downsize it and write a PNG
//!
//! The output lands at a deterministic path inside the folder's cache
//! directory (`{size_tag}_{stem}.png`). Encoded bytes are written to a
//! temporary file in the same directory and renamed into place, so a reader
//! never observes a half-written thumbnail.

use crate::{ThumbnailConfig, ThumbnailError};
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

/// Deterministic cache path for a source image name
pub fn thumbnail_path(cache_dir: &Path, image_name: &str, config: &ThumbnailConfig) -> PathBuf {
    let stem = Path::new(image_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_name.to_string());
    cache_dir.join(format!("{}_{}.png", config.size_tag, stem))
}

/// Generate a thumbnail for `source` inside `cache_dir`, returning its path
pub fn generate_thumbnail(
    source: &Path,
    cache_dir: &Path,
    config: &ThumbnailConfig,
) -> Result<PathBuf, ThumbnailError> {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ThumbnailError::Decode {
            path: source.to_path_buf(),
            reason: "path has no file name".to_string(),
        })?;

    let img = decode(source)?;
    let resized = fit_within(img, config.max_dimension);
    let data = encode(&resized, ImageFormat::Png, source)?;

    let target = thumbnail_path(cache_dir, &name, config);
    write_atomic(&target, &data)?;
    Ok(target)
}

/// Read the pixel dimensions of an image without decoding the full raster
pub fn image_dimensions(path: &Path) -> Result<(u32, u32), ThumbnailError> {
    ImageReader::open(path)
        .map_err(|e| ThumbnailError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| ThumbnailError::io(path, e))?
        .into_dimensions()
        .map_err(|e| ThumbnailError::decode(path, e))
}

pub(crate) fn decode(path: &Path) -> Result<DynamicImage, ThumbnailError> {
    ImageReader::open(path)
        .map_err(|e| ThumbnailError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| ThumbnailError::io(path, e))?
        .decode()
        .map_err(|e| ThumbnailError::decode(path, e))
}

/// Resize so the long edge is at most `max_dim`, preserving aspect ratio.
/// Images already inside the box are returned untouched.
pub(crate) fn fit_within(img: DynamicImage, max_dim: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    let max_existing = width.max(height);

    if max_existing <= max_dim {
        return img;
    }

    let ratio = max_dim as f64 / max_existing as f64;
    let new_width = ((width as f64 * ratio).round() as u32).max(1);
    let new_height = ((height as f64 * ratio).round() as u32).max(1);

    img.resize_exact(new_width, new_height, image::imageops::FilterType::Lanczos3)
}

pub(crate) fn encode(
    img: &DynamicImage,
    format: ImageFormat,
    source: &Path,
) -> Result<Vec<u8>, ThumbnailError> {
    // JPEG has no alpha channel
    let converted;
    let img = if format == ImageFormat::Jpeg && img.color().has_alpha() {
        converted = DynamicImage::ImageRgb8(img.to_rgb8());
        &converted
    } else {
        img
    };

    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), format)
        .map_err(|e| ThumbnailError::Encode {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(buffer)
}

/// Write `data` to a temp file next to `target` and rename it over `target`
pub(crate) fn write_atomic(target: &Path, data: &[u8]) -> Result<(), ThumbnailError> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ThumbnailError::io(target, e))?;
    tmp.write_all(data).map_err(|e| ThumbnailError::io(target, e))?;
    tmp.persist(target)
        .map_err(|e| ThumbnailError::io(target, e.error))?;
    Ok(())
}
