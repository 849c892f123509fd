//! Wraps composited frames into samples and enqueues them

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use tracing::trace;

use crate::capture::{Frame, PixelFormat};
use crate::clock::{Clock, FrameTiming, Timestamp};
use crate::error::PipelineError;
use crate::pipeline::queue::{FrameQueue, SampleHandle};
use crate::StreamConfig;

/// Fixed stream parameters, negotiated once at configuration time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: PixelFormat,
    pub timescale: u32,
    pub frame_duration: Timestamp,
}

impl StreamFormat {
    pub fn from_config(config: &StreamConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            device_id: config.device_id.clone(),
            width: config.width,
            height: config.height,
            fps: config.fps,
            pixel_format: PixelFormat::Rgba32,
            timescale: config.timescale,
            frame_duration: Timestamp::new(1, config.fps).rescale(config.timescale),
        })
    }

    /// Whether `frame` can be delivered as-is in this stream
    pub fn accepts(&self, frame: &Frame) -> bool {
        frame.meta.format == self.pixel_format
            && frame.dimensions() == (self.width, self.height)
            && frame.as_rgba().is_some()
            && frame.timing.is_valid()
    }
}

/// The enqueued unit handed to the consumer
#[derive(Debug)]
pub struct OutputSample {
    pub frame: Frame,
    pub format: Arc<StreamFormat>,
    /// Timing in the stream timescale
    pub timing: FrameTiming,
    pub sequence: u64,
}

/// Why a frame did not reach the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    QueueFull,
    Clock,
    Malformed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::QueueFull => "queue_full",
            DropReason::Clock => "clock",
            DropReason::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Enqueued { sequence: u64 },
    Dropped(DropReason),
}

/// Consumer notification, called after every successful enqueue with the
/// device id and the new sample
pub struct QueueObserver(Box<dyn Fn(&str, &SampleHandle) + Send + Sync>);

impl QueueObserver {
    pub fn new(f: impl Fn(&str, &SampleHandle) + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }
}

pub struct Dispatcher {
    queue: Arc<FrameQueue>,
    clock: Box<dyn Clock>,
    format: Arc<StreamFormat>,
    observer: ArcSwapOption<QueueObserver>,
    sequence: u64,
}

impl Dispatcher {
    pub fn new(queue: Arc<FrameQueue>, clock: Box<dyn Clock>, format: Arc<StreamFormat>) -> Self {
        Self {
            queue,
            clock,
            format,
            observer: ArcSwapOption::empty(),
            sequence: 0,
        }
    }

    pub fn set_queue_observer(&self, observer: Option<QueueObserver>) {
        self.observer.store(observer.map(Arc::new));
    }

    /// Sequence number the next dispatched sample will carry
    pub fn next_sequence(&self) -> u64 {
        self.sequence
    }

    pub fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }

    pub fn format(&self) -> &Arc<StreamFormat> {
        &self.format
    }

    /// Timestamp and enqueue a composited frame. Never blocks.
    pub fn dispatch(&mut self, frame: Frame) -> DispatchOutcome {
        if self.queue.is_full() {
            return self.reject(DropReason::QueueFull);
        }

        let timing = frame.timing.rescale(self.format.timescale);
        if let Err(e) = self.clock.post_timing(timing.pts, Instant::now(), true) {
            trace!("Clock rejected frame: {}", e);
            return self.reject(DropReason::Clock);
        }

        let sequence = self.sequence;
        let sample = Arc::new(OutputSample {
            frame,
            format: self.format.clone(),
            timing,
            sequence,
        });

        // Single producer: the queue can only have shrunk since the check
        if self.queue.push(sample.clone()).is_err() {
            metrics::counter!("frames_dropped", "reason" => DropReason::QueueFull.as_str())
                .increment(1);
            return DispatchOutcome::Dropped(DropReason::QueueFull);
        }
        self.sequence += 1;
        metrics::counter!("frames_dispatched").increment(1);

        if let Some(observer) = self.observer.load().as_deref() {
            (observer.0)(&self.format.device_id, &sample);
        }

        DispatchOutcome::Enqueued { sequence }
    }

    /// Count a frame that will not be delivered
    pub fn reject(&self, reason: DropReason) -> DispatchOutcome {
        self.queue.record_drop();
        metrics::counter!("frames_dropped", "reason" => reason.as_str()).increment(1);
        DispatchOutcome::Dropped(reason)
    }
}
