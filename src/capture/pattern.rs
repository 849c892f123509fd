//! Synthetic test-pattern source for running without a camera

use std::time::{Duration, Instant};

use color_eyre::Result;
use image::{Rgba, RgbaImage};

use crate::capture::{CaptureSource, Frame};
use crate::clock::{FrameTiming, Timestamp};

/// Emits a scrolling gradient with a green band at a fixed rate
pub struct PatternSource {
    width: u32,
    height: u32,
    fps: u32,
    interval: Duration,
    next_tick: Instant,
    sequence: u64,
}

impl PatternSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            interval: Duration::from_secs(1) / fps,
            next_tick: Instant::now(),
            sequence: 0,
        }
    }

    /// Render the pattern for a given frame index
    pub fn render(&self, index: u64) -> RgbaImage {
        let width = self.width.max(1);
        let shift = ((index * 4) % width as u64) as u32;
        let band = self.width / 4;
        let band_start = shift as i64;
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let offset = (x as i64 - band_start).rem_euclid(self.width as i64);
            if offset < band as i64 {
                Rgba([0, 255, 0, 255])
            } else {
                let r = ((x + shift) % width * 255 / width) as u8;
                let b = (y * 255 / self.height.max(1)) as u8;
                Rgba([r, 96, b, 255])
            }
        })
    }
}

impl CaptureSource for PatternSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let now = Instant::now();
        if self.next_tick > now {
            std::thread::sleep(self.next_tick - now);
        }
        self.next_tick += self.interval;

        let timing = FrameTiming {
            pts: Timestamp::new(self.sequence as i64, self.fps),
            duration: Timestamp::new(1, self.fps),
        };
        let frame = Frame::from_rgba(self.render(self.sequence), self.sequence, timing);
        self.sequence += 1;
        Ok(Some(frame))
    }
}
