//! Image compression
//!
//! Visitor photos are shrunk before upload so a kiosk on a slow uplink does
//! not push multi-megabyte camera images. Decoding and encoding are CPU bound
//! and run on the blocking pool.

use crate::config::CompressionSettings;
use crate::values::VisitorFile;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

/// Dimensions never shrink below this many pixels on the long edge.
pub const MIN_DIMENSION: u32 = 64;

const JPEG_QUALITIES: [u8; 6] = [90, 80, 70, 60, 50, 40];

#[derive(Debug, Clone, Error)]
pub enum CompressError {
    #[error("unsupported image type: {0}")]
    Unsupported(String),
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("could not encode image: {0}")]
    Encode(String),
    #[error("compression task failed: {0}")]
    Task(String),
}

/// Shrinks an uploaded image to fit the configured limits.
#[async_trait]
pub trait ImageCompressor: Send + Sync {
    async fn compress(&self, file: &VisitorFile) -> Result<VisitorFile, CompressError>;
}

/// [`ImageCompressor`] backed by the `image` crate.
#[derive(Debug, Clone, Default)]
pub struct ImageCrateCompressor {
    settings: CompressionSettings,
}

impl ImageCrateCompressor {
    pub fn new(settings: CompressionSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ImageCompressor for ImageCrateCompressor {
    async fn compress(&self, file: &VisitorFile) -> Result<VisitorFile, CompressError> {
        let file = file.clone();
        let settings = self.settings.clone();
        let original = file.len();
        let compressed = tokio::task::spawn_blocking(move || compress_image(&file, &settings))
            .await
            .map_err(|e| CompressError::Task(e.to_string()))??;
        tracing::debug!(
            file = %compressed.file_name,
            before = original,
            after = compressed.len(),
            "Compressed image"
        );
        Ok(compressed)
    }
}

/// Re-encode `file` so it fits within `settings`, keeping its format.
///
/// JPEG quality is lowered first; if that is not enough the long edge shrinks
/// by a fifth per round down to [`MIN_DIMENSION`]. When even that does not fit,
/// the smallest encoding produced is returned.
pub fn compress_image(
    file: &VisitorFile,
    settings: &CompressionSettings,
) -> Result<VisitorFile, CompressError> {
    let format = ImageFormat::from_mime_type(&file.mime)
        .ok_or_else(|| CompressError::Unsupported(file.mime.clone()))?;
    let img = image::load_from_memory_with_format(&file.bytes, format)
        .map_err(|e| CompressError::Decode(e.to_string()))?;

    let longest = img.width().max(img.height());
    if file.len() <= settings.max_bytes && longest <= settings.max_dimension {
        return Ok(file.clone());
    }

    let mut target = longest.min(settings.max_dimension).max(1);
    let mut smallest: Option<Vec<u8>> = None;
    loop {
        let resized = if target < longest {
            img.resize(target, target, FilterType::Triangle)
        } else {
            img.clone()
        };

        for encoded in encodings(&resized, format) {
            let encoded = encoded?;
            if encoded.len() <= settings.max_bytes {
                return Ok(file.with_bytes(encoded));
            }
            if smallest.as_ref().map_or(true, |s| encoded.len() < s.len()) {
                smallest = Some(encoded);
            }
        }

        if target <= MIN_DIMENSION {
            break;
        }
        target = (target * 4 / 5).max(MIN_DIMENSION);
    }

    match smallest {
        Some(bytes) => {
            tracing::warn!(
                file = %file.file_name,
                size = bytes.len(),
                limit = settings.max_bytes,
                "Image still above size limit after compression"
            );
            Ok(file.with_bytes(bytes))
        }
        None => Ok(file.clone()),
    }
}

/// Candidate encodings, most faithful first.
fn encodings(
    img: &DynamicImage,
    format: ImageFormat,
) -> Box<dyn Iterator<Item = Result<Vec<u8>, CompressError>> + '_> {
    if format == ImageFormat::Jpeg {
        let rgb = img.to_rgb8();
        Box::new(JPEG_QUALITIES.into_iter().map(move |quality| {
            let mut out = Vec::new();
            JpegEncoder::new_with_quality(&mut out, quality)
                .encode_image(&rgb)
                .map_err(|e| CompressError::Encode(e.to_string()))?;
            Ok(out)
        }))
    } else {
        Box::new(std::iter::once_with(move || {
            let mut out = Cursor::new(Vec::new());
            img.write_to(&mut out, format)
                .map_err(|e| CompressError::Encode(e.to_string()))?;
            Ok(out.into_inner())
        }))
    }
}
