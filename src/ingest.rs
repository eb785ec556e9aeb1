use std::{io::Cursor, path::Path};

use anyhow::{Context, Result};
use image::{
    codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, GenericImageView, ImageFormat,
};
use log::info;

use crate::{
    error::StoryError,
    models::{EncodedImage, ImageEncoding},
    settings::ViewerSettings,
};

/// Bounds applied to every ingested image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self::from(&ViewerSettings::default())
    }
}

impl From<&ViewerSettings> for IngestLimits {
    fn from(settings: &ViewerSettings) -> Self {
        Self {
            max_width: settings.max_width,
            max_height: settings.max_height,
            jpeg_quality: settings.jpeg_quality.clamp(1, 100),
        }
    }
}

/// Largest size within the bounds that keeps the aspect ratio. Never upscales.
pub fn fit_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let (w, h) = (width as f64, height as f64);
    let aspect = w / h;
    let (fit_w, fit_h) = if w / max_width as f64 > h / max_height as f64 {
        (max_width as f64, max_width as f64 / aspect)
    } else {
        (max_height as f64 * aspect, max_height as f64)
    };

    ((fit_w.round() as u32).max(1), (fit_h.round() as u32).max(1))
}

/// Decodes `bytes`, shrinks them to fit `limits` and re-encodes. PNG input
/// stays PNG; anything else becomes JPEG.
pub fn encode_bytes(bytes: &[u8], limits: IngestLimits) -> Result<EncodedImage> {
    let format = image::guess_format(bytes).map_err(|err| StoryError::Decode(err.to_string()))?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|err| StoryError::Decode(err.to_string()))?;

    let (width, height) = decoded.dimensions();
    let (target_w, target_h) = fit_dimensions(width, height, limits.max_width, limits.max_height);
    let resized = if (target_w, target_h) == (width, height) {
        decoded
    } else {
        decoded.resize_exact(target_w, target_h, FilterType::Triangle)
    };

    let mut buffer = Vec::new();
    let encoding = if format == ImageFormat::Png {
        resized
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .context("failed to encode PNG")?;
        ImageEncoding::Png
    } else {
        DynamicImage::ImageRgb8(resized.to_rgb8())
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, limits.jpeg_quality))
            .context("failed to encode JPEG")?;
        ImageEncoding::Jpeg
    };

    info!(
        "Ingested {:?} {}x{} -> {} {}x{} ({} bytes)",
        format,
        width,
        height,
        encoding.mime(),
        target_w,
        target_h,
        buffer.len()
    );

    Ok(EncodedImage::new(encoding, buffer))
}

/// Reads and encodes a user-supplied file. Decoding runs on the blocking pool.
pub async fn ingest_file(path: &Path, limits: IngestLimits) -> Result<EncodedImage> {
    let bytes = tokio::fs::read(path).await.map_err(|source| StoryError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    tokio::task::spawn_blocking(move || encode_bytes(&bytes, limits))
        .await
        .context("image decode task failed to join")?
}
