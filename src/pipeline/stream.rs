//! The virtual camera stream: capture tick → composite → dispatch → mask trigger

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError};
use tracing::{debug, info, instrument, trace};

use crate::capture::Frame;
use crate::clock::{Clock, HostClock};
use crate::compositor::Compositor;
use crate::error::PipelineError;
use crate::mask::{MaskSettings, MaskStore, MaskUpdater, SegmentationModel, TriggerOutcome};
use crate::pipeline::dispatcher::{
    DispatchOutcome, Dispatcher, DropReason, QueueObserver, StreamFormat,
};
use crate::pipeline::queue::FrameQueue;
use crate::{MaskConfig, StreamConfig};

/// How long the producer waits for a capture tick before rechecking `running`
const TICK_WAIT: Duration = Duration::from_millis(100);

/// What happened to one capture tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The stream is not running
    Stopped,
    /// The tick carried no buffer
    Skipped,
    Dropped(DropReason),
    Enqueued {
        sequence: u64,
        /// Set when this sample was due to refresh the mask
        mask: Option<TriggerOutcome>,
    },
}

/// Real-time producer for one virtual camera stream.
///
/// Owned by the producer thread. The mask store, frame queue and running
/// flag are shared with the mask worker, the background fetch and the
/// consumer.
pub struct VirtualCamera {
    format: Arc<StreamFormat>,
    store: Arc<MaskStore>,
    compositor: Compositor,
    dispatcher: Dispatcher,
    updater: MaskUpdater,
    running: Arc<AtomicBool>,
    mask_interval: u64,
}

impl VirtualCamera {
    pub fn new(
        stream: &StreamConfig,
        mask: &MaskConfig,
        model: Box<dyn SegmentationModel>,
    ) -> Result<Self, PipelineError> {
        Self::with_clock(stream, mask, model, Box::new(HostClock::new()))
    }

    pub fn with_clock(
        stream: &StreamConfig,
        mask: &MaskConfig,
        model: Box<dyn SegmentationModel>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, PipelineError> {
        let format = Arc::new(StreamFormat::from_config(stream)?);
        mask.validate()?;

        let store = Arc::new(MaskStore::new());
        let queue = Arc::new(FrameQueue::new(stream.queue_capacity));
        let running = Arc::new(AtomicBool::new(false));

        let settings = MaskSettings {
            output_size: (format.width, format.height),
            foreground_class: mask.foreground_class,
            blur_sigma: mask.blur_sigma,
        };
        let updater = MaskUpdater::spawn(model, store.clone(), settings, running.clone())?;

        info!(
            device = %format.device_id,
            width = format.width,
            height = format.height,
            fps = format.fps,
            "Virtual camera configured"
        );

        Ok(Self {
            mask_interval: mask.interval.unwrap_or(format.fps as u64),
            dispatcher: Dispatcher::new(queue, clock, format.clone()),
            format,
            store,
            compositor: Compositor::new(),
            updater,
            running,
        })
    }

    pub fn start(&self) {
        info!("Starting stream");
        self.running.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        info!("Stopping stream");
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Shared flag other contexts can clear to stop the producer loop
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn format(&self) -> &Arc<StreamFormat> {
        &self.format
    }

    pub fn queue(&self) -> &Arc<FrameQueue> {
        self.dispatcher.queue()
    }

    pub fn mask_store(&self) -> &Arc<MaskStore> {
        &self.store
    }

    pub fn mask_updater(&self) -> &MaskUpdater {
        &self.updater
    }

    pub fn set_queue_observer(&self, observer: Option<QueueObserver>) {
        self.dispatcher.set_queue_observer(observer);
    }

    /// Handle one capture tick. Never blocks on the mask worker.
    pub fn on_frame(&mut self, frame: Option<Frame>) -> FrameOutcome {
        if !self.is_running() {
            return FrameOutcome::Stopped;
        }
        let Some(frame) = frame else {
            trace!("Empty capture tick");
            return FrameOutcome::Skipped;
        };
        if !self.format.accepts(&frame) {
            debug!(meta = ?frame.meta, "Dropping frame with unexpected format");
            self.dispatcher.reject(DropReason::Malformed);
            return FrameOutcome::Dropped(DropReason::Malformed);
        }

        let mask = self.store.get_mask();
        let background = self.store.get_background();
        let output = self
            .compositor
            .process(&frame, mask.as_deref(), background.as_deref());

        match self.dispatcher.dispatch(output) {
            DispatchOutcome::Enqueued { sequence } => {
                let mask = (sequence % self.mask_interval == 0).then(|| {
                    let outcome = self.updater.trigger(frame);
                    trace!(sequence, ?outcome, "Mask refresh due");
                    outcome
                });
                FrameOutcome::Enqueued { sequence, mask }
            }
            DispatchOutcome::Dropped(reason) => {
                trace!(?reason, "Frame dropped");
                FrameOutcome::Dropped(reason)
            }
        }
    }

    /// Producer loop: feed ticks from `frames` until stopped or the capture
    /// side hangs up
    #[instrument(skip_all, fields(device = %self.format.device_id))]
    pub fn run(&mut self, frames: Receiver<Option<Frame>>) {
        info!("Producer loop running");
        while self.is_running() {
            match frames.recv_timeout(TICK_WAIT) {
                Ok(frame) => {
                    self.on_frame(frame);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Capture source closed");
                    break;
                }
            }
        }
        let stats = self.queue().stats();
        info!(
            dispatched = self.dispatcher.next_sequence(),
            dropped = stats.dropped,
            "Producer loop finished"
        );
    }

    /// Stop the stream and wait for the mask worker to finish
    pub fn shutdown(mut self) {
        self.stop();
        self.updater.shutdown();
    }
}
