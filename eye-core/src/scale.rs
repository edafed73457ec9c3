//! Resize and PNG export of BGRA frames.
//!
//! The pixel math is delegated to the `image` crate. Resampling does not
//! care about channel order, so BGRA data is handed to it as RGBA and only
//! swizzled when a PNG is produced.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};

use crate::error::EngineError;
use crate::frame::frame_len;

fn as_image(data: &[u8], width: u32, height: u32) -> Result<RgbaImage, EngineError> {
    let expected = frame_len(width, height);
    if data.len() != expected {
        return Err(EngineError::InvalidArgument(format!(
            "frame of {width}x{height} needs {expected} bytes, got {}",
            data.len()
        )));
    }
    RgbaImage::from_raw(width, height, data.to_vec())
        .ok_or_else(|| EngineError::InvalidArgument("frame buffer too small".into()))
}

/// Resample a BGRA frame to exactly `target_width`×`target_height`.
pub fn resize_bgra(
    data: &[u8],
    width: u32,
    height: u32,
    target_width: u32,
    target_height: u32,
) -> Result<Vec<u8>, EngineError> {
    if target_width == 0 || target_height == 0 {
        return Err(EngineError::InvalidArgument(
            "resize target must be non-empty".into(),
        ));
    }
    let source = as_image(data, width, height)?;
    if width == target_width && height == target_height {
        return Ok(source.into_raw());
    }
    let resized = imageops::resize(&source, target_width, target_height, FilterType::Triangle);
    Ok(resized.into_raw())
}

/// Largest size with the aspect ratio of `width`×`height` that fits in
/// `max_width`×`max_height`. Never returns a zero dimension.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 || max_width == 0 || max_height == 0 {
        return (max_width.max(1), max_height.max(1));
    }
    let frame_ratio = width as f64 / height as f64;
    let max_ratio = max_width as f64 / max_height as f64;
    let (w, h) = if frame_ratio > max_ratio {
        (max_width, (height as f64 * max_width as f64 / width as f64) as u32)
    } else {
        ((width as f64 * max_height as f64 / height as f64) as u32, max_height)
    };
    (w.max(1), h.max(1))
}

/// Encode a BGRA frame as PNG.
pub fn encode_png_bgra(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, EngineError> {
    let mut image = as_image(data, width, height)?;
    for pixel in image.pixels_mut() {
        pixel.0.swap(0, 2);
    }
    let mut out = Vec::new();
    image.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

/// Scale a BGRA frame to fit within the given bounds and encode it as PNG.
pub fn preview_png(
    data: &[u8],
    width: u32,
    height: u32,
    max_width: u32,
    max_height: u32,
) -> Result<Vec<u8>, EngineError> {
    let (w, h) = fit_within(width, height, max_width, max_height);
    let scaled = resize_bgra(data, width, height, w, h)?;
    encode_png_bgra(&scaled, w, h)
}
