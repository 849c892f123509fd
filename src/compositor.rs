//! Blends the live frame over the substitute background

use std::time::Instant;

use bytes::Bytes;
use image::Rgba;
use tracing::trace;

use crate::capture::Frame;
use crate::mask::{Background, Mask};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Composite `frame` over `background` using `mask` as foreground alpha.
///
/// Without a mask the frame passes through untouched. Without a background
/// the frame is blended against full transparency. Inputs are never
/// modified; a mask or frame with unexpected geometry also passes through.
pub fn composite(frame: &Frame, mask: Option<&Mask>, background: Option<&Background>) -> Frame {
    let Some(mask) = mask else {
        return frame.clone();
    };
    let Some(pixels) = frame.as_rgba() else {
        trace!("Frame is not RGBA32, passing through");
        return frame.clone();
    };
    let (width, height) = pixels.dimensions();
    if mask.dimensions() != (width, height) {
        trace!(
            mask = ?mask.dimensions(),
            frame = ?(width, height),
            "Mask size mismatch, passing through"
        );
        return frame.clone();
    }

    let fitted = background.map(|bg| bg.fitted(width, height));
    let mut bg_pixels = fitted.as_ref().map(|image| image.pixels());
    let mut out = Vec::with_capacity(pixels.len());
    for (fg, m) in pixels.pixels().zip(mask.alpha().pixels()) {
        let bg = bg_pixels
            .as_mut()
            .and_then(Iterator::next)
            .copied()
            .unwrap_or(TRANSPARENT);
        out.extend_from_slice(&blend(*fg, bg, m.0[0]));
    }

    frame.with_data(Bytes::from(out))
}

/// Straight-alpha "over": foreground weighted by `mask` on top of `bg`
fn blend(fg: Rgba<u8>, bg: Rgba<u8>, mask: u8) -> [u8; 4] {
    match mask {
        255 if fg.0[3] == 255 => return fg.0,
        0 => return bg.0,
        _ => {}
    }

    let fa = (mask as f32 / 255.0) * (fg.0[3] as f32 / 255.0);
    let ba = bg.0[3] as f32 / 255.0;
    let out_a = fa + ba * (1.0 - fa);
    if out_a <= 0.0 {
        return [0, 0, 0, 0];
    }

    let channel = |c: usize| {
        let v = (fg.0[c] as f32 * fa + bg.0[c] as f32 * ba * (1.0 - fa)) / out_a;
        v.round().clamp(0.0, 255.0) as u8
    };
    [
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}

/// Real-time compositing stage with per-frame timing
#[derive(Debug, Default)]
pub struct Compositor {
    frames: u64,
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(
        &mut self,
        frame: &Frame,
        mask: Option<&Mask>,
        background: Option<&Background>,
    ) -> Frame {
        let started = Instant::now();
        let out = composite(frame, mask, background);
        self.frames += 1;
        if mask.is_some() {
            metrics::histogram!("composite_time_us").record(started.elapsed().as_micros() as f64);
        }
        out
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FrameTiming, Timestamp};
    use image::{GrayImage, Luma, RgbaImage};

    fn frame() -> Frame {
        let image = RgbaImage::from_fn(6, 4, |x, y| Rgba([x as u8 * 40, y as u8 * 60, 200, 255]));
        let timing = FrameTiming {
            pts: Timestamp::new(3, 30),
            duration: Timestamp::new(1, 30),
        };
        Frame::from_rgba(image, 3, timing)
    }

    fn background() -> Background {
        Background::new(RgbaImage::from_pixel(6, 4, Rgba([10, 20, 30, 255])))
    }

    #[test]
    fn no_mask_passes_through() {
        let input = frame();
        let out = composite(&input, None, Some(&background()));
        assert_eq!(out.data, input.data);
        assert_eq!(out.timing, input.timing);
    }

    #[test]
    fn full_mask_keeps_frame() {
        let input = frame();
        let out = composite(&input, Some(&Mask::uniform(6, 4, 255)), Some(&background()));
        assert_eq!(out.data, input.data);
    }

    #[test]
    fn zero_mask_shows_background() {
        let input = frame();
        let bg = background();
        let out = composite(&input, Some(&Mask::uniform(6, 4, 0)), Some(&bg));
        assert_eq!(&out.data[..], bg.image().as_raw().as_slice());
    }

    #[test]
    fn zero_mask_resamples_background() {
        let input = frame();
        let bg = Background::new(RgbaImage::from_fn(12, 9, |x, y| {
            Rgba([x as u8 * 20, y as u8 * 25, 90, 255])
        }));
        let out = composite(&input, Some(&Mask::uniform(6, 4, 0)), Some(&bg));
        assert_eq!(&out.data[..], bg.fitted(6, 4).as_raw().as_slice());
    }

    #[test]
    fn background_follows_pixel_position() {
        let input = frame();
        let bg = Background::new(RgbaImage::from_fn(6, 4, |x, y| {
            Rgba([x as u8, y as u8, 7, 255])
        }));
        let mask = Mask::new(GrayImage::from_fn(6, 4, |x, y| {
            Luma([if (x + y) % 2 == 0 { 0 } else { 255 }])
        }));
        let out = composite(&input, Some(&mask), Some(&bg));
        let out = out.as_rgba().unwrap();
        let src = input.as_rgba().unwrap();
        for (x, y, px) in out.enumerate_pixels() {
            if (x + y) % 2 == 0 {
                assert_eq!(px, bg.image().get_pixel(x, y), "({x}, {y})");
            } else {
                assert_eq!(px, src.get_pixel(x, y), "({x}, {y})");
            }
        }
    }

    #[test]
    fn missing_background_is_transparent() {
        let input = frame();
        let out = composite(&input, Some(&Mask::uniform(6, 4, 0)), None);
        assert!(out.data.iter().all(|&b| b == 0));

        let half = composite(&input, Some(&Mask::uniform(6, 4, 128)), None);
        let px = half.as_rgba().unwrap().get_pixel(2, 1).0;
        let src = input.as_rgba().unwrap().get_pixel(2, 1).0;
        assert_eq!(&px[..3], &src[..3]);
        assert_eq!(px[3], 128);
    }

    #[test]
    fn half_mask_mixes() {
        let input = frame();
        let mask = Mask::new(GrayImage::from_pixel(6, 4, Luma([128])));
        let out = composite(&input, Some(&mask), Some(&background()));
        let px = out.as_rgba().unwrap().get_pixel(0, 0).0;
        // frame (0, 0, 200) over background (10, 20, 30)
        assert_eq!(px, [5, 10, 115, 255]);
    }

    #[test]
    fn inputs_are_untouched() {
        let input = frame();
        let before = input.data.clone();
        let mask = Mask::uniform(6, 4, 90);
        let _ = composite(&input, Some(&mask), Some(&background()));
        assert_eq!(input.data, before);
        assert_eq!(mask, Mask::uniform(6, 4, 90));
    }

    #[test]
    fn mismatched_mask_passes_through() {
        let input = frame();
        let out = composite(&input, Some(&Mask::uniform(3, 2, 0)), Some(&background()));
        assert_eq!(out.data, input.data);
    }
}
