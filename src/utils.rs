use crate::capture::frame::PixelFormat;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

/// Map a V4L2 fourcc to a format the decoder understands
pub fn pixel_format_for(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"MJPG" => Some(PixelFormat::Mjpeg),
        b"YUYV" => Some(PixelFormat::Yuyv4),
        b"RGB3" => Some(PixelFormat::Rgb24),
        _ => None,
    }
}

/// Auto-detect best capture device.
///
/// Loopback devices are skipped so the virtual camera never captures its
/// own output.
pub fn auto_detect_device() -> Result<FoundDevice> {
    use std::path::Path;

    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) || caps.driver == "v4l2 loopback" {
            debug!("Skipping {} ({})", path, caps.driver);
            continue;
        }

        // Prefer MJPEG, then whatever else we can decode
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };
        let mut supported: Vec<PixelFormat> = formats
            .iter()
            .filter_map(|fmt| pixel_format_for(fmt.fourcc))
            .collect();
        supported.sort_by_key(|f| match f {
            PixelFormat::Mjpeg => 0,
            PixelFormat::Yuyv4 => 1,
            _ => 2,
        });

        if let Some(format) = supported.first().copied() {
            info!("Found {:?} device: {} - {}", format, path, caps.card);
            return Ok(FoundDevice { path, format });
        }
    }

    Err(eyre!("No suitable capture device found"))
}
