//! Decoded raster frames.
//!
//! - `Frame`: owned RGB24 pixels plus dimensions, produced by image decoding or a
//!   `FrameSource`, consumed by detector backends.

use image::{ImageBuffer, Rgb};

use crate::error::{VisionError, VisionResult};

/// Message returned to clients when an uploaded image cannot be decoded.
pub const UNDECODABLE_IMAGE: &str = "Could not decode image file";

/// One decoded frame. Pixels are tightly packed RGB24, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap RGB24 pixels. Fails if the buffer length does not match the dimensions.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> VisionResult<Self> {
        if width == 0 || height == 0 {
            return Err(VisionError::invalid_input(format!(
                "frame dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| VisionError::invalid_input("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(VisionError::invalid_input(format!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Black frame of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            pixels: vec![0u8; width as usize * height as usize * 3],
            width,
            height,
        }
    }

    /// Decode an encoded image (JPEG, PNG, WebP) into an RGB frame.
    pub fn decode_image(bytes: &[u8]) -> VisionResult<Self> {
        let decoded = image::load_from_memory(bytes).map_err(|err| {
            log::debug!("image decode failed: {}", err);
            VisionError::invalid_input(UNDECODABLE_IMAGE)
        })?;
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(VisionError::invalid_input(UNDECODABLE_IMAGE));
        }
        Ok(Self {
            pixels: rgb.into_raw(),
            width,
            height,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Borrowed image view for resizing and other `image` operations.
    pub fn as_image(&self) -> VisionResult<ImageBuffer<Rgb<u8>, &[u8]>> {
        ImageBuffer::from_raw(self.width, self.height, self.pixels.as_slice())
            .ok_or_else(|| VisionError::processing("frame buffer does not match dimensions"))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
