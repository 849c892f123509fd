//! V4L2 camera capture feeding the frame pipeline

use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use tracing::{info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::{decoder, CaptureSource, Frame, PixelFormat};
use crate::clock::{FrameTiming, Timestamp};
use crate::CaptureConfig;

/// Timescale of V4L2 buffer timestamps (microseconds)
const V4L2_TIMESCALE: u32 = 1_000_000;

/// Memory-mapped V4L2 capture
pub struct V4l2Capture {
    // Keeps the device handle alive for the stream
    _device: Device,
    stream: MmapStream<'static>,
    config: CaptureConfig,
    width: u32,
    height: u32,
    frame_duration: Timestamp,
    sequence: u64,
}

impl V4l2Capture {
    /// Open the device and start streaming at the requested size
    pub fn new(config: CaptureConfig, width: u32, height: u32, fps: u32) -> Result<Self> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device)?;

        // Query capabilities
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = match config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
            PixelFormat::Rgba32 => return Err(eyre!("Cameras do not deliver RGBA32")),
        };
        let fmt = device.set_format(&fmt)?;

        if (fmt.width, fmt.height) != (width, height) {
            return Err(eyre!(
                "Device negotiated {}x{}, stream requires {}x{}",
                fmt.width,
                fmt.height,
                width,
                height
            ));
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)?;
        info!(
            "Capture stream started with {} buffers",
            config.buffer_count
        );

        Ok(Self {
            _device: device,
            stream,
            config,
            width,
            height,
            frame_duration: Timestamp::new(1, fps),
            sequence: 0,
        })
    }
}

impl CaptureSource for V4l2Capture {
    #[instrument(skip(self))]
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let (buf, meta) = self.stream.next()?;
        let captured_at = Instant::now();

        if meta.bytesused == 0 {
            return Ok(None);
        }
        let used = (meta.bytesused as usize).min(buf.len());
        let rgba = decoder::decode_frame(&buf[..used], self.config.format, self.width, self.height)?;

        let device_time = Duration::from_secs(meta.timestamp.sec as u64)
            + Duration::from_micros(meta.timestamp.usec as u64);
        let timing = FrameTiming {
            pts: Timestamp::from_duration(device_time, V4L2_TIMESCALE),
            duration: self.frame_duration.rescale(V4L2_TIMESCALE),
        };

        let mut frame = Frame::from_rgba(rgba, self.sequence, timing);
        frame.captured_at = captured_at;
        self.sequence += 1;

        Ok(Some(frame))
    }
}
