// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image sources and decoding helpers
//!
//! Upload widgets hand over raw file bytes, camera captures hand over
//! `data:` URLs. Both end up as an [`ImageSource`], which is all the
//! pipeline needs: dimensions plus pixel access.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use thiserror::Error;

/// Maximum image size (10MB)
const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// Errors raised while decoding raw image data
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image data is too large: {0} bytes (max: {1} bytes)")]
    TooLarge(usize, usize),

    #[error("Invalid base64 encoding: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),

    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("Image data is empty")]
    EmptyData,
}

/// A decoded image the pipeline can read pixels from
pub trait ImageSource: Send + Sync {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// RGB value at `(x, y)`; callers stay within `width` x `height`
    fn pixel(&self, x: u32, y: u32) -> [u8; 3];

    /// Snapshot the source into an owned RGB buffer
    fn to_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.width(), self.height(), |x, y| Rgb(self.pixel(x, y)))
    }
}

impl ImageSource for RgbImage {
    fn width(&self) -> u32 {
        self.dimensions().0
    }

    fn height(&self) -> u32 {
        self.dimensions().1
    }

    fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.get_pixel(x, y).0
    }

    fn to_rgb(&self) -> RgbImage {
        self.clone()
    }
}

impl ImageSource for DynamicImage {
    fn width(&self) -> u32 {
        DynamicImage::width(self)
    }

    fn height(&self) -> u32 {
        DynamicImage::height(self)
    }

    fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let p = image::GenericImageView::get_pixel(self, x, y);
        [p[0], p[1], p[2]]
    }

    fn to_rgb(&self) -> RgbImage {
        self.to_rgb8()
    }
}

/// Decode raw image bytes (file uploads)
pub fn decode_image_bytes(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(ImageError::TooLarge(bytes.len(), MAX_IMAGE_SIZE));
    }

    if bytes.is_empty() {
        return Err(ImageError::EmptyData);
    }

    let format = detect_format(bytes)?;

    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ImageError::DecodeFailed(e.to_string()))
}

/// Decode a base64-encoded image
pub fn decode_base64_image(base64_str: &str) -> Result<DynamicImage, ImageError> {
    if base64_str.is_empty() {
        return Err(ImageError::EmptyData);
    }

    let bytes = STANDARD.decode(base64_str.trim())?;
    decode_image_bytes(&bytes)
}

/// Decode a `data:image/...;base64,` URL as produced by camera captures
///
/// # Example
/// ```ignore
/// let image = decode_data_url("data:image/jpeg;base64,/9j/4AAQ...")?;
/// ```
pub fn decode_data_url(url: &str) -> Result<DynamicImage, ImageError> {
    let rest = url
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| ImageError::InvalidDataUrl("missing data: prefix".to_string()))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ImageError::InvalidDataUrl("missing payload".to_string()))?;

    if !header.ends_with(";base64") {
        return Err(ImageError::InvalidDataUrl(format!(
            "unsupported encoding: {}",
            header
        )));
    }

    decode_base64_image(payload)
}

/// Detect image format from magic bytes
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat, ImageError> {
    if bytes.len() < 4 {
        return Err(ImageError::UnsupportedFormat);
    }

    match bytes {
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Ok(ImageFormat::Png),

        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Ok(ImageFormat::Jpeg),

        // WebP: RIFF .... WEBP
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Ok(ImageFormat::WebP),

        // GIF87a / GIF89a
        [0x47, 0x49, 0x46, 0x38, x, ..] if *x == 0x37 || *x == 0x39 => Ok(ImageFormat::Gif),

        // BMP: BM
        [0x42, 0x4D, ..] => Ok(ImageFormat::Bmp),

        _ => Err(ImageError::UnsupportedFormat),
    }
}
