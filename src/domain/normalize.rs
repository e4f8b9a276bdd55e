use image::ImageFormat;
use std::path::{Path, PathBuf};

use super::work::CONVERTIBLE_IMAGE_EXTENSIONS;
use crate::error::NormalizeError;

pub fn needs_conversion(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| CONVERTIBLE_IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Target path for a converted image: same stem, `.jpg`, inside `dir`.
pub fn converted_path(source: &Path, dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    dir.join(format!("{}.jpg", stem))
}

/// Re-encode `source` as a JPEG at `output`. Decoding runs on the blocking pool.
pub async fn convert_to_jpeg(source: &Path, output: &Path) -> Result<(), NormalizeError> {
    let source = source.to_path_buf();
    let output = output.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), NormalizeError> {
        // JPEG has no alpha channel
        let decoded = image::open(&source)?.to_rgb8();
        decoded.save_with_format(&output, ImageFormat::Jpeg)?;
        Ok(())
    })
    .await?
}
