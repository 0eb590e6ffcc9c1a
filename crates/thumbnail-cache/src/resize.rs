//! Backup and in-place rescaling of original images

use crate::generate::{decode, encode, write_atomic};
use crate::ThumbnailError;
use image::{GenericImageView, ImageFormat};
use std::fs;
use std::path::{Path, PathBuf};

/// Largest image, in pixels, a resize may produce
pub const MAX_RESIZED_PIXELS: u64 = 100_000_000;

/// Copy `source` into `backup_dir` under the same file name.
///
/// An existing backup is left alone so the directory always holds the
/// pristine original, however many times the image has been resized.
pub fn backup_original(source: &Path, backup_dir: &Path) -> Result<PathBuf, ThumbnailError> {
    let name = source.file_name().ok_or_else(|| ThumbnailError::Decode {
        path: source.to_path_buf(),
        reason: "path has no file name".to_string(),
    })?;
    let target = backup_dir.join(name);
    if target.exists() {
        return Ok(target);
    }

    fs::create_dir_all(backup_dir).map_err(|e| ThumbnailError::io(backup_dir, e))?;
    let data = fs::read(source).map_err(|e| ThumbnailError::io(source, e))?;
    write_atomic(&target, &data)?;
    Ok(target)
}

/// Re-encode `source` at `percent` of its dimensions, replacing the file.
///
/// Results above [`MAX_RESIZED_PIXELS`] are refused and leave the file as is.
pub fn resize_in_place(source: &Path, percent: f64) -> Result<(u32, u32), ThumbnailError> {
    let format = ImageFormat::from_path(source).map_err(|e| ThumbnailError::decode(source, e))?;
    let img = decode(source)?;

    let (width, height) = img.dimensions();
    let (new_width, new_height) = scaled_dimensions(width, height, percent).ok_or_else(|| {
        ThumbnailError::Encode {
            path: source.to_path_buf(),
            reason: format!(
                "cannot scale {width}x{height} by {percent}%: limit is {MAX_RESIZED_PIXELS} pixels"
            ),
        }
    })?;

    let resized = img.resize_exact(new_width, new_height, image::imageops::FilterType::Lanczos3);
    let data = encode(&resized, format, source)?;
    write_atomic(source, &data)?;
    Ok((new_width, new_height))
}

fn scaled_dimensions(width: u32, height: u32, percent: f64) -> Option<(u32, u32)> {
    if !percent.is_finite() || percent <= 0.0 {
        return None;
    }
    let scale = percent / 100.0;
    let new_width = (width as f64 * scale).round().max(1.0);
    let new_height = (height as f64 * scale).round().max(1.0);
    if new_width * new_height > MAX_RESIZED_PIXELS as f64 {
        return None;
    }
    Some((new_width as u32, new_height as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use image::RgbImage;
    use tempfile::tempdir;

    #[test]
    fn test_resize_halves_dimensions() -> Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("city.png");
        RgbImage::new(640, 480).save(&source)?;

        assert_eq!(resize_in_place(&source, 50.0)?, (320, 240));
        assert_eq!(image::image_dimensions(&source)?, (320, 240));
        Ok(())
    }

    #[test]
    fn test_resize_jpeg_keeps_format() -> Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("city.jpg");
        RgbImage::new(100, 100).save(&source)?;

        resize_in_place(&source, 150.0)?;
        let reader = image::ImageReader::open(&source)?.with_guessed_format()?;
        assert_eq!(reader.format(), Some(ImageFormat::Jpeg));
        assert_eq!(reader.into_dimensions()?, (150, 150));
        Ok(())
    }

    #[test]
    fn test_oversized_resize_is_refused() -> Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("tiny.png");
        RgbImage::new(2, 2).save(&source)?;
        let original = fs::read(&source)?;

        for percent in [1e30, 1e6, f64::INFINITY] {
            let err = resize_in_place(&source, percent).unwrap_err();
            assert!(matches!(err, ThumbnailError::Encode { .. }), "{percent}: {err}");
        }
        assert_eq!(fs::read(&source)?, original);
        Ok(())
    }

    #[test]
    fn test_scaled_dimensions_bounds() {
        assert_eq!(scaled_dimensions(640, 480, 50.0), Some((320, 240)));
        assert_eq!(scaled_dimensions(3, 3, 1.0), Some((1, 1)));
        assert_eq!(scaled_dimensions(10_000, 10_000, 100.0), Some((10_000, 10_000)));
        assert_eq!(scaled_dimensions(10_000, 10_000, 101.0), None);
        assert_eq!(scaled_dimensions(2, 2, 1e30), None);
        assert_eq!(scaled_dimensions(2, 2, f64::NAN), None);
    }

    #[test]
    fn test_backup_keeps_pristine_copy() -> Result<()> {
        let dir = tempdir()?;
        let backup_dir = dir.path().join("backup");
        let source = dir.path().join("a.png");
        fs::write(&source, b"original")?;

        let first = backup_original(&source, &backup_dir)?;
        assert_eq!(fs::read(&first)?, b"original");

        fs::write(&source, b"edited")?;
        let second = backup_original(&source, &backup_dir)?;
        assert_eq!(first, second);
        assert_eq!(fs::read(&second)?, b"original");
        Ok(())
    }
}
