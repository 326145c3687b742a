//! Frame buffers flowing through the stream pipeline.
//!
//! - `Frame`: immutable RGB24 buffer with its acquisition time and origin.
//! - `EncodedFrame`: a JPEG-compressed frame shared with stream subscribers.
//!
//! A frame lives for one cycle. Only the encoded form of the last good frame
//! is retained, for reuse while paused or degraded.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb, RgbImage};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bytes per pixel of every frame in the pipeline.
pub const CHANNELS: usize = 3;

/// JPEG quality used when the configuration does not say otherwise.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// A compressed frame ready for delivery. Cloning shares the buffer.
pub type EncodedFrame = Arc<Vec<u8>>;

/// Where a frame came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOrigin {
    Device,
    Synthetic,
}

/// An RGB24 image captured in one cycle.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub origin: FrameOrigin,
    captured_at: DateTime<Local>,
    capture_instant: Instant,
}

impl Frame {
    /// Wrap an RGB24 buffer. The length must match `width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32, origin: FrameOrigin) -> Result<Self> {
        let expected = expected_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            origin,
            captured_at: Local::now(),
            capture_instant: Instant::now(),
        })
    }

    pub fn from_image(image: RgbImage, origin: FrameOrigin) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            origin,
            captured_at: Local::now(),
            capture_instant: Instant::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Borrowed image view over the pixel buffer.
    ///
    /// Returns `None` for a zero-sized frame.
    pub fn view(&self) -> Option<ImageBuffer<Rgb<u8>, &[u8]>> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())
    }

    /// Consume the frame into an owned image for drawing and encoding.
    pub fn into_image(self) -> RgbImage {
        let (width, height) = (self.width, self.height);
        ImageBuffer::from_raw(width, height, self.data).unwrap_or_else(|| RgbImage::new(width, height))
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn age(&self) -> Duration {
        self.capture_instant.elapsed()
    }

    pub fn is_synthetic(&self) -> bool {
        self.origin == FrameOrigin::Synthetic
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("origin", &self.origin)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// Byte length of an RGB24 buffer of the given size.
pub(crate) fn expected_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

/// JPEG-encode an image.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .context("jpeg encode")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_length_mismatch() {
        assert!(Frame::new(vec![0u8; 10], 4, 4, FrameOrigin::Device).is_err());
        assert!(Frame::new(vec![0u8; 48], 4, 4, FrameOrigin::Device).is_ok());
    }

    #[test]
    fn frame_round_trips_into_image() {
        let mut data = vec![0u8; 2 * 2 * 3];
        data[3] = 200;
        let frame = Frame::new(data, 2, 2, FrameOrigin::Synthetic).unwrap();
        assert!(frame.is_synthetic());
        let image = frame.into_image();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(1, 0).0, [200, 0, 0]);
    }

    #[test]
    fn zero_sized_frame_has_no_view() {
        let frame = Frame::new(Vec::new(), 0, 0, FrameOrigin::Device).unwrap();
        assert!(frame.view().is_none());
    }

    #[test]
    fn encode_produces_jpeg_markers() {
        let image = RgbImage::from_pixel(16, 16, Rgb([10, 120, 240]));
        let bytes = encode_jpeg(&image, DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }
}
