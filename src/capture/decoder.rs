use color_eyre::{eyre::eyre, Result};
use image::RgbaImage;
use jpeg_decoder::Decoder;

use super::frame::PixelFormat;

/// Decode a raw capture buffer into tightly packed RGBA32
pub fn decode_frame(data: &[u8], format: PixelFormat, width: u32, height: u32) -> Result<RgbaImage> {
    let pixels = match format {
        PixelFormat::Mjpeg => decode_mjpeg(data, width, height)?,
        PixelFormat::Rgb24 => {
            check_len(data, width, height, 3)?;
            rgb_to_rgba(&data[..(width * height * 3) as usize])
        }
        PixelFormat::Rgba32 => {
            check_len(data, width, height, 4)?;
            data[..(width * height * 4) as usize].to_vec()
        }
        PixelFormat::Yuyv4 => {
            check_len(data, width, height, 2)?;
            yuyv_to_rgba(&data[..(width * height * 2) as usize])
        }
    };

    RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| eyre!("Decoded buffer does not fit {}x{}", width, height))
}

fn check_len(data: &[u8], width: u32, height: u32, bpp: u32) -> Result<()> {
    let expected = (width * height * bpp) as usize;
    if data.len() < expected {
        return Err(eyre!(
            "Short buffer: {} bytes, expected {}",
            data.len(),
            expected
        ));
    }
    Ok(())
}

fn decode_mjpeg(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder.decode()?;
    let info = decoder
        .info()
        .ok_or_else(|| eyre!("JPEG header missing"))?;

    if (info.width as u32, info.height as u32) != (width, height) {
        return Err(eyre!(
            "JPEG is {}x{}, stream expects {}x{}",
            info.width,
            info.height,
            width,
            height
        ));
    }

    match info.pixel_format {
        jpeg_decoder::PixelFormat::RGB24 => Ok(rgb_to_rgba(&pixels)),
        jpeg_decoder::PixelFormat::L8 => Ok(pixels.iter().flat_map(|&l| [l, l, l, 255]).collect()),
        other => Err(eyre!("Unsupported JPEG pixel format: {:?}", other)),
    }
}

fn rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
    for chunk in rgb.chunks_exact(3) {
        rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
    }
    rgba
}

/// BT.601 limited-range YUYV (4:2:2) to RGBA
fn yuyv_to_rgba(yuyv: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(yuyv.len() * 2);
    for chunk in yuyv.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgba.extend_from_slice(&yuv_to_rgba(y0, u, v));
        rgba.extend_from_slice(&yuv_to_rgba(y1, u, v));
    }
    rgba
}

fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = (y as i32 - 16).max(0) * 298;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(c + 409 * e),
        clamp(c - 100 * d - 208 * e),
        clamp(c + 516 * d),
        255,
    ]
}
