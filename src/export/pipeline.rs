//! Size reduction of embedded images.
//!
//! Compression is best effort. [`ImagePipeline::compress`] never fails: if an
//! image cannot be decoded, resized or re-encoded, the original bytes are
//! returned unchanged.

use std::{io::Cursor, path::Path};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{
    DynamicImage,
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType as PngFilter, PngEncoder},
    },
    imageops::FilterType,
};

use crate::domain::Config;

/// Encoded image bytes together with their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// The encoded image.
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`.
    pub mime: &'static str,
}

impl EncodedImage {
    /// Render as a `data:` URI.
    #[must_use]
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

/// MIME type for an image filename, by extension. Unknown extensions are
/// reported as PNG.
#[must_use]
pub fn mime_for_name(name: &str) -> &'static str {
    match extension(name).as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

fn extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
enum ImageError {
    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("WebP encoding failed: {0}")]
    WebP(String),
}

/// Resizes and re-encodes images for embedding in an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePipeline {
    max_width: u32,
    max_height: u32,
}

impl Default for ImagePipeline {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

impl ImagePipeline {
    /// A pipeline shrinking images to fit `max_width` × `max_height`.
    #[must_use]
    pub const fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width,
            max_height,
        }
    }

    /// A pipeline using the configured bounding box.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        let (max_width, max_height) = config.max_image_size();
        Self::new(max_width, max_height)
    }

    /// Re-encode `bytes` at `quality` (0-100).
    ///
    /// The image is shrunk to fit the bounding box, preserving its aspect
    /// ratio and never enlarging it. PNG stays PNG, WebP stays WebP, and
    /// everything else becomes JPEG. On any failure the original bytes are
    /// returned with the MIME type implied by `filename`.
    #[must_use]
    pub fn compress(&self, bytes: &[u8], filename: &str, quality: u8) -> EncodedImage {
        let quality = quality.min(100);
        match self.try_compress(bytes, filename, quality) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::debug!("Compression of {filename} failed, embedding original: {e}");
                EncodedImage {
                    bytes: bytes.to_vec(),
                    mime: mime_for_name(filename),
                }
            }
        }
    }

    fn try_compress(
        &self,
        bytes: &[u8],
        filename: &str,
        quality: u8,
    ) -> Result<EncodedImage, ImageError> {
        let image = self.fit(image::load_from_memory(bytes)?);

        match extension(filename).as_str() {
            "png" => Ok(EncodedImage {
                bytes: encode_png(&image, quality)?,
                mime: "image/png",
            }),
            "webp" => Ok(EncodedImage {
                bytes: encode_webp(&image, quality)?,
                mime: "image/webp",
            }),
            _ => Ok(EncodedImage {
                bytes: encode_jpeg(&image, quality)?,
                mime: "image/jpeg",
            }),
        }
    }

    fn fit(&self, image: DynamicImage) -> DynamicImage {
        if image.width() <= self.max_width && image.height() <= self.max_height {
            image
        } else {
            image.resize(self.max_width, self.max_height, FilterType::Lanczos3)
        }
    }
}

/// PNG is lossless, so quality only trades encoding effort: the higher the
/// quality, the less effort is spent compressing.
const fn png_compression(quality: u8) -> CompressionType {
    match 100u8.saturating_sub(quality) / 10 {
        0..=2 => CompressionType::Fast,
        3..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

fn encode_png(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    let encoder =
        PngEncoder::new_with_quality(&mut buffer, png_compression(quality), PngFilter::Adaptive);
    image.write_with_encoder(encoder)?;
    Ok(buffer.into_inner())
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.max(1));
    rgb.write_with_encoder(encoder)?;
    Ok(buffer.into_inner())
}

fn encode_webp(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let rgba = image.to_rgba8();
    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
    let encoded = encoder
        .encode_simple(false, f32::from(quality))
        .map_err(|e| ImageError::WebP(format!("{e:?}")))?;
    Ok(encoded.to_vec())
}
