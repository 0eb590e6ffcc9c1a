//! Image discovery inside a single folder (non-recursive)

use std::fs;
use std::io;
use std::path::Path;

/// Extensions recognised as source images
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Match `.JPG`, `.Png`, ... as well. Off by default: only the exact
    /// lowercase extensions are listed.
    pub case_insensitive: bool,
}

pub fn is_image_name(name: &str, options: ScanOptions) -> bool {
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    if stem.is_empty() {
        return false;
    }
    if options.case_insensitive {
        IMAGE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext))
    } else {
        IMAGE_EXTENSIONS.contains(&ext)
    }
}

/// List image file names in `folder`, sorted by name
pub fn list_images(folder: &Path, options: ScanOptions) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_image_name(name, options) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
