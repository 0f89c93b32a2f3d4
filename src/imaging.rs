// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Captured image handling: decoding, rotation and JPEG re-encoding

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat};
use tracing::debug;

use crate::{MathLensError, Result};

/// Clockwise rotation in quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    None,
    Quarter,
    Half,
    ThreeQuarter,
}

impl Rotation {
    /// Accept any multiple of 90, including negative and above 360
    pub fn from_degrees(degrees: i32) -> Result<Self> {
        if degrees % 90 != 0 {
            return Err(MathLensError::UnsupportedRotation(degrees));
        }
        Ok(match degrees.rem_euclid(360) {
            0 => Self::None,
            90 => Self::Quarter,
            180 => Self::Half,
            _ => Self::ThreeQuarter,
        })
    }

    pub fn degrees(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Quarter => 90,
            Self::Half => 180,
            Self::ThreeQuarter => 270,
        }
    }
}

/// Rotate clockwise. Quarter turns swap width and height.
pub fn rotate(img: DynamicImage, rotation: Rotation) -> DynamicImage {
    match rotation {
        Rotation::None => img,
        Rotation::Quarter => img.rotate90(),
        Rotation::Half => img.rotate180(),
        Rotation::ThreeQuarter => img.rotate270(),
    }
}

/// Decode raw upload bytes
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes)
        .map_err(|e| MathLensError::InvalidInput(format!("Not a readable image: {}", e)))
}

/// MIME type of an encoded image, from its magic bytes
pub fn detect_mime(bytes: &[u8]) -> Result<&'static str> {
    let format = image::guess_format(bytes)
        .map_err(|_| MathLensError::InvalidInput("Unrecognized image format".to_string()))?;
    Ok(format.to_mime_type())
}

/// Encode as JPEG. Alpha is dropped since JPEG has no transparency.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)?;
    Ok(buffer)
}

/// Re-encode whatever was uploaded as a JPEG byte stream
pub fn to_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>> {
    if image::guess_format(bytes).ok() == Some(ImageFormat::Jpeg) {
        return Ok(bytes.to_vec());
    }
    encode_jpeg(&decode(bytes)?, quality)
}

/// Rotate encoded image bytes, returning JPEG
pub fn rotate_bytes(bytes: &[u8], rotation: Rotation, quality: u8) -> Result<Vec<u8>> {
    if rotation == Rotation::None {
        return to_jpeg(bytes, quality);
    }
    let img = rotate(decode(bytes)?, rotation);
    encode_jpeg(&img, quality)
}

/// Shrink large photos before sending them to the model
pub fn prepare_for_model(bytes: &[u8], max_dimension: u32, quality: u8) -> Result<Vec<u8>> {
    let img = decode(bytes)?;
    let (width, height) = img.dimensions();

    if width <= max_dimension && height <= max_dimension {
        return to_jpeg(bytes, quality);
    }

    debug!("Resizing {}x{} image to fit {}px", width, height, max_dimension);
    let img = img.resize(max_dimension, max_dimension, image::imageops::FilterType::Triangle);
    encode_jpeg(&img, quality)
}
