//! Frame queue consumer writing to a v4l2loopback device

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use flume::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info};
use v4l::video::Output;
use v4l::{Device, FourCC};

use crate::pipeline::{FrameQueue, OutputSample, StreamFormat};

/// Writes RGB24 frames into a loopback video device
pub struct LoopbackSink {
    file: File,
    width: u32,
    height: u32,
    scratch: Vec<u8>,
}

impl LoopbackSink {
    /// Open `path` and configure it for the stream's resolution
    pub fn open(path: &str, format: &StreamFormat) -> Result<Self> {
        info!("Opening loopback output: {}", path);

        let device = Device::with_path(path)?;
        let mut fmt = Output::format(&device)?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = FourCC::new(b"RGB3");
        fmt.stride = format.width * 3;
        fmt.size = format.width * format.height * 3;
        let fmt = Output::set_format(&device, &fmt)?;

        if (fmt.width, fmt.height) != (format.width, format.height) {
            return Err(eyre!(
                "Loopback device accepted {}x{}, stream is {}x{}",
                fmt.width,
                fmt.height,
                format.width,
                format.height
            ));
        }

        let file = OpenOptions::new().write(true).open(path)?;
        Ok(Self {
            file,
            width: format.width,
            height: format.height,
            scratch: Vec::with_capacity((format.width * format.height * 3) as usize),
        })
    }

    pub fn write_sample(&mut self, sample: &OutputSample) -> Result<()> {
        if sample.frame.dimensions() != (self.width, self.height) {
            return Err(eyre!("Sample size does not match loopback format"));
        }
        flatten_rgba(&sample.frame.data, &mut self.scratch);
        self.file.write_all(&self.scratch)?;
        Ok(())
    }
}

/// Composite straight-alpha RGBA over black into packed RGB24
pub fn flatten_rgba(rgba: &[u8], out: &mut Vec<u8>) {
    out.clear();
    for px in rgba.chunks_exact(4) {
        let a = px[3] as u16;
        for &c in &px[..3] {
            out.push(((c as u16 * a + 127) / 255) as u8);
        }
    }
}

/// Drain `queue` whenever the producer signals `notify`, until `running`
/// is cleared. Samples are written to `sink` if present, else discarded.
pub fn run_consumer(
    queue: Arc<FrameQueue>,
    notify: Receiver<()>,
    mut sink: Option<LoopbackSink>,
    running: Arc<AtomicBool>,
) {
    let mut delivered = 0u64;
    let mut window_start = Instant::now();

    while running.load(Ordering::Acquire) {
        match notify.recv_timeout(Duration::from_millis(100)) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        while let Some(sample) = queue.pop() {
            if let Some(sink) = sink.as_mut() {
                if let Err(e) = sink.write_sample(&sample) {
                    error!("Loopback write failed: {}", e);
                }
            }
            delivered += 1;
            let latency = sample.frame.captured_at.elapsed();
            metrics::histogram!("frame_latency_ms").record(latency.as_secs_f64() * 1000.0);
        }

        if window_start.elapsed() >= Duration::from_secs(1) {
            let stats = queue.stats();
            debug!(
                delivered,
                written = stats.written,
                dropped = stats.dropped,
                "Consumer throughput"
            );
            window_start = Instant::now();
        }
    }
    info!(delivered, "Consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_over_black() {
        let mut out = Vec::new();
        flatten_rgba(&[200, 100, 50, 255, 200, 100, 50, 0, 255, 255, 255, 128], &mut out);
        assert_eq!(out, vec![200, 100, 50, 0, 0, 0, 128, 128, 128]);
    }

    #[test]
    fn flatten_reuses_buffer() {
        let mut out = vec![9; 32];
        flatten_rgba(&[1, 2, 3, 255], &mut out);
        assert_eq!(out, vec![1, 2, 3]);
    }
}
