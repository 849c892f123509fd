pub mod decoder;
pub mod frame;
pub mod pattern;
pub mod v4l2;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use color_eyre::Result;
use flume::{Sender, TrySendError};
use tracing::{error, info};

pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use pattern::PatternSource;
pub use v4l2::V4l2Capture;

/// Anything that delivers frames at a fixed nominal rate.
///
/// `Ok(None)` is an empty tick: the buffer was absent and the tick is
/// skipped downstream.
pub trait CaptureSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Pause after a failed capture before asking the device again
pub const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Consecutive failures between repeated error logs
const ERROR_LOG_EVERY: u64 = 100;

/// Pull ticks from `source` into `frames` until `running` is cleared or the
/// receiver hangs up. Ticks are dropped when the producer is behind.
pub fn run_capture(
    mut source: Box<dyn CaptureSource>,
    frames: Sender<Option<Frame>>,
    running: Arc<AtomicBool>,
) {
    let mut failures = 0u64;
    while running.load(Ordering::Acquire) {
        let tick = match source.next_frame() {
            Ok(frame) => {
                if failures > 0 {
                    info!(failures, "Capture recovered");
                    failures = 0;
                }
                frame
            }
            Err(e) => {
                if failures % ERROR_LOG_EVERY == 0 {
                    error!(failures, "Capture error: {}", e);
                }
                failures += 1;
                thread::sleep(CAPTURE_RETRY_DELAY);
                None
            }
        };
        match frames.try_send(tick) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct Unplugged {
        calls: Arc<AtomicUsize>,
    }

    impl CaptureSource for Unplugged {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(eyre!("device gone"))
        }
    }

    #[test]
    fn failing_device_is_retried_with_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = flume::bounded(1);
        let source = Box::new(Unplugged {
            calls: calls.clone(),
        });

        let handle = {
            let running = running.clone();
            thread::spawn(move || run_capture(source, tx, running))
        };
        let window = Instant::now();
        thread::sleep(Duration::from_millis(100));
        running.store(false, Ordering::Release);
        handle.join().unwrap();

        let calls = calls.load(Ordering::SeqCst);
        let ceiling = (window.elapsed().as_millis() / CAPTURE_RETRY_DELAY.as_millis()) as usize + 2;
        assert!(calls >= 1);
        assert!(calls <= ceiling, "{calls} attempts in {:?}", window.elapsed());
        // Failed ticks still reach the producer as empty ticks
        assert!(rx.try_recv().unwrap().is_none());
    }

    #[test]
    fn stops_when_producer_hangs_up() {
        let (tx, rx) = flume::bounded(1);
        drop(rx);
        let source = Box::new(PatternSource::new(4, 2, 1000));
        run_capture(source, tx, Arc::new(AtomicBool::new(true)));
    }
}
