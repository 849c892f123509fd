//! Background worker that recomputes the segmentation mask

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Sender, TrySendError};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use tracing::{debug, info, instrument, warn};

use crate::capture::Frame;
use crate::error::{MaskError, ModelError, PipelineError};
use crate::mask::model::SegmentationModel;
use crate::mask::store::{Mask, MaskStore};

/// Parameters of a mask pass
#[derive(Debug, Clone, Copy)]
pub struct MaskSettings {
    /// Output (stream) resolution
    pub output_size: (u32, u32),
    pub foreground_class: u32,
    /// Gaussian blur sigma applied after upscaling; 0 disables the blur
    pub blur_sigma: f32,
}

/// Result of asking the worker to start a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    /// A pass was already in flight
    Skipped,
}

/// Compute a mask for `frame` synchronously.
///
/// Resizes to the model input, runs the model, thresholds the class map on
/// the foreground class, then upscales and blurs to output resolution.
#[instrument(skip_all, fields(sequence = frame.meta.sequence))]
pub fn compute_mask(
    model: &mut dyn SegmentationModel,
    frame: &Frame,
    settings: &MaskSettings,
) -> Result<Mask, MaskError> {
    let view = frame.as_rgba().ok_or(MaskError::MalformedFrame)?;
    let (input_width, input_height) = model.input_size();

    let resized = imageops::resize(&view, input_width, input_height, FilterType::Triangle);
    let input = DynamicImage::ImageRgba8(resized).into_rgb8();

    let classes = model.predict(&input)?;
    if classes.dimensions() != (input_width, input_height) {
        let (got_width, got_height) = classes.dimensions();
        return Err(ModelError::ShapeMismatch {
            width: input_width,
            height: input_height,
            got_width,
            got_height,
        }
        .into());
    }

    let indicator = GrayImage::from_fn(input_width, input_height, |x, y| {
        if classes.get(x, y) == settings.foreground_class {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let (width, height) = settings.output_size;
    let upscaled = imageops::resize(&indicator, width, height, FilterType::Triangle);
    let alpha = if settings.blur_sigma > 0.0 {
        imageops::blur(&upscaled, settings.blur_sigma)
    } else {
        upscaled
    };

    Ok(Mask::new(alpha))
}

#[derive(Debug, Default)]
struct PassCounters {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Handle to the mask worker thread.
///
/// At most one pass is in flight; triggers that arrive while the worker is
/// busy are skipped rather than queued.
pub struct MaskUpdater {
    tx: Option<Sender<Frame>>,
    busy: Arc<AtomicBool>,
    counters: Arc<PassCounters>,
    handle: Option<JoinHandle<()>>,
}

impl MaskUpdater {
    /// Spawn the worker. Passes publish into `store` only while `running`
    /// is set.
    pub fn spawn(
        mut model: Box<dyn SegmentationModel>,
        store: Arc<MaskStore>,
        settings: MaskSettings,
        running: Arc<AtomicBool>,
    ) -> Result<Self, PipelineError> {
        let (tx, rx) = flume::bounded::<Frame>(1);
        let busy = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(PassCounters::default());

        let handle = {
            let busy = busy.clone();
            let counters = counters.clone();
            thread::Builder::new()
                .name("mask-updater".into())
                .spawn(move || {
                    info!("Mask updater started");
                    for frame in rx.iter() {
                        let started = Instant::now();
                        let pass = panic::catch_unwind(AssertUnwindSafe(|| {
                            compute_mask(model.as_mut(), &frame, &settings)
                        }));
                        let result = pass.unwrap_or(Err(MaskError::Panicked)).and_then(
                            |mask| {
                                if running.load(Ordering::Acquire) {
                                    Ok(mask)
                                } else {
                                    Err(MaskError::Stopped)
                                }
                            },
                        );

                        match result {
                            Ok(mask) => {
                                store.publish_mask(mask);
                                counters.completed.fetch_add(1, Ordering::Relaxed);
                                metrics::counter!("mask_passes", "outcome" => "published")
                                    .increment(1);
                                debug!(elapsed = ?started.elapsed(), "Published new mask");
                            }
                            Err(MaskError::Panicked) => {
                                counters.failed.fetch_add(1, Ordering::Relaxed);
                                metrics::counter!("mask_passes", "outcome" => "panicked")
                                    .increment(1);
                                warn!("Segmentation model panicked, pass discarded");
                            }
                            Err(e) => {
                                counters.failed.fetch_add(1, Ordering::Relaxed);
                                metrics::counter!("mask_passes", "outcome" => "failed")
                                    .increment(1);
                                debug!("Mask pass aborted: {}", e);
                            }
                        }
                        metrics::histogram!("mask_pass_time_ms")
                            .record(started.elapsed().as_secs_f64() * 1000.0);

                        busy.store(false, Ordering::Release);
                    }
                    info!("Mask updater stopped");
                })?
        };

        Ok(Self {
            tx: Some(tx),
            busy,
            counters,
            handle: Some(handle),
        })
    }

    /// Hand `frame` to the worker unless a pass is already running
    pub fn trigger(&self, frame: Frame) -> TriggerOutcome {
        let Some(tx) = self.tx.as_ref() else {
            return TriggerOutcome::Skipped;
        };

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return TriggerOutcome::Skipped;
        }

        match tx.try_send(frame) {
            Ok(()) => TriggerOutcome::Started,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.busy.store(false, Ordering::Release);
                warn!("Mask worker unavailable, skipping trigger");
                TriggerOutcome::Skipped
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Number of passes that published a mask
    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    /// Number of passes that aborted
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Poll until no pass is in flight or `timeout` elapses
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Close the job channel and wait for the worker to exit
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Mask updater thread panicked");
            }
        }
    }
}

impl Drop for MaskUpdater {
    fn drop(&mut self) {
        // Closing the channel lets the worker exit once its current pass ends
        self.tx.take();
    }
}
