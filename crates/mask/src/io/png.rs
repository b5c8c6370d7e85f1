use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};

use crate::error::{MaskError, Result};

/// Decode collaborator or upload bytes into a binary mask (0 or 255).
///
/// Images with an alpha channel are read through their alpha, so an RGBA
/// overlay PNG decodes to the painted region. Everything else is read through
/// luma, where any non-zero value counts as set.
pub fn decode_mask(bytes: &[u8]) -> Result<GrayImage> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| MaskError::Decode(e.to_string()))?;
    Ok(binarize(&decoded))
}

pub fn binarize(image: &DynamicImage) -> GrayImage {
    if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            Luma([if rgba.get_pixel(x, y)[3] > 0 { 255 } else { 0 }])
        })
    } else {
        let mut gray = image.to_luma8();
        for pixel in gray.pixels_mut() {
            pixel[0] = if pixel[0] > 0 { 255 } else { 0 };
        }
        gray
    }
}

/// Encode any image as PNG bytes.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

pub fn to_base64_png(image: &DynamicImage) -> Result<String> {
    Ok(STANDARD.encode(encode_png(image)?))
}

/// Decode a base64 payload. Malformed input is a decode failure.
pub fn from_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| MaskError::Decode(format!("invalid base64: {e}")))
}
