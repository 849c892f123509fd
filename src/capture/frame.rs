use bytes::Bytes;
use image::{ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::clock::FrameTiming;

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Presentation timing in the capture timebase
    pub timing: FrameTiming,

    /// Host time the buffer was dequeued, for latency tracking
    pub captured_at: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Rgba32,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> Option<u32> {
        match self {
            PixelFormat::Rgb24 => Some(3),
            PixelFormat::Rgba32 => Some(4),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }
}

impl Frame {
    /// Wrap a decoded RGBA image as a frame
    pub fn from_rgba(image: RgbaImage, sequence: u64, timing: FrameTiming) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: Bytes::from(image.into_raw()),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride: width * 4,
                format: PixelFormat::Rgba32,
            }),
            timing,
            captured_at: Instant::now(),
        }
    }

    /// Same metadata and timing with different pixel data
    pub fn with_data(&self, data: Bytes) -> Self {
        Self {
            data,
            meta: self.meta.clone(),
            timing: self.timing,
            captured_at: self.captured_at,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.meta.width, self.meta.height)
    }

    /// Borrow the pixels as an RGBA image.
    ///
    /// Returns `None` when the frame is not tightly packed RGBA32 or the
    /// buffer length disagrees with the metadata.
    pub fn as_rgba(&self) -> Option<ImageBuffer<Rgba<u8>, &[u8]>> {
        let meta = &self.meta;
        if meta.format != PixelFormat::Rgba32
            || meta.stride != meta.width * 4
            || self.data.len() != (meta.stride * meta.height) as usize
        {
            return None;
        }
        ImageBuffer::from_raw(meta.width, meta.height, &self.data[..])
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .field("timing", &self.timing)
            .finish()
    }
}
