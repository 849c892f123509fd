use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use backdrop::clock::{FrameTiming, Timestamp};
use backdrop::error::ModelError;
use backdrop::mask::{Background, ClassMap, SegmentationModel, TriggerOutcome, PERSON_CLASS};
use backdrop::pipeline::{DropReason, QueueObserver};
use backdrop::{Frame, FrameOutcome, MaskConfig, StreamConfig, VirtualCamera};
use image::{Rgba, RgbImage, RgbaImage};

const WIDTH: u32 = 16;
const HEIGHT: u32 = 8;
const WAIT: Duration = Duration::from_secs(5);

fn stream(fps: u32, queue_capacity: usize) -> StreamConfig {
    StreamConfig {
        width: WIDTH,
        height: HEIGHT,
        fps,
        queue_capacity,
        ..StreamConfig::default()
    }
}

fn mask_config() -> MaskConfig {
    MaskConfig {
        input_width: 8,
        input_height: 8,
        blur_sigma: 0.0,
        ..MaskConfig::default()
    }
}

fn frame(index: u64, fps: u32) -> Frame {
    let image = RgbaImage::from_fn(WIDTH, HEIGHT, |x, y| {
        Rgba([(index % 256) as u8, x as u8 * 10, y as u8 * 20, 255])
    });
    let timing = FrameTiming {
        pts: Timestamp::new(index as i64, fps),
        duration: Timestamp::new(1, fps),
    };
    Frame::from_rgba(image, index, timing)
}

/// Fails every prediction and counts the attempts
struct FailingModel {
    calls: Arc<AtomicUsize>,
}

impl SegmentationModel for FailingModel {
    fn input_size(&self) -> (u32, u32) {
        (8, 8)
    }

    fn predict(&mut self, _image: &RgbImage) -> Result<ClassMap, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ModelError::Inference("scripted failure".into()))
    }
}

/// Labels every pixel with a fixed class
struct ConstantModel(u32);

impl SegmentationModel for ConstantModel {
    fn input_size(&self) -> (u32, u32) {
        (8, 8)
    }

    fn predict(&mut self, image: &RgbImage) -> Result<ClassMap, ModelError> {
        Ok(ClassMap::filled(image.width(), image.height(), self.0))
    }
}

/// Holds each prediction until released
struct GatedModel {
    entered: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

impl SegmentationModel for GatedModel {
    fn input_size(&self) -> (u32, u32) {
        (8, 8)
    }

    fn predict(&mut self, image: &RgbImage) -> Result<ClassMap, ModelError> {
        let _ = self.entered.send(());
        self.release
            .recv()
            .map_err(|_| ModelError::Inference("released without signal".into()))?;
        Ok(ClassMap::filled(image.width(), image.height(), PERSON_CLASS))
    }
}

#[test]
fn thirty_five_frames_without_mask_pass_through() {
    let calls = Arc::new(AtomicUsize::new(0));
    let model = FailingModel {
        calls: calls.clone(),
    };
    let mut camera = VirtualCamera::new(&stream(30, 64), &mask_config(), Box::new(model)).unwrap();
    camera.start();

    let inputs: Vec<Frame> = (0..35).map(|i| frame(i, 30)).collect();
    let mut triggers = Vec::new();
    for input in &inputs {
        match camera.on_frame(Some(input.clone())) {
            FrameOutcome::Enqueued { sequence, mask } => {
                if let Some(outcome) = mask {
                    assert_eq!(outcome, TriggerOutcome::Started);
                    triggers.push(sequence);
                    assert!(camera.mask_updater().wait_idle(WAIT));
                }
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(triggers, vec![0, 30]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(camera.mask_store().get_mask().is_none());

    let samples = camera.queue().drain();
    assert_eq!(samples.len(), 35);
    for (i, (sample, input)) in samples.iter().zip(&inputs).enumerate() {
        assert_eq!(sample.sequence, i as u64);
        assert_eq!(sample.frame.data, input.data, "sample {i} differs from input");
    }
    camera.shutdown();
}

#[test]
fn saturated_queue_keeps_first_samples() {
    let mut camera =
        VirtualCamera::new(&stream(30, 5), &mask_config(), Box::new(ConstantModel(0))).unwrap();
    camera.start();

    let outcomes: Vec<_> = (0..10).map(|i| camera.on_frame(Some(frame(i, 30)))).collect();
    let enqueued = outcomes
        .iter()
        .filter(|o| matches!(o, FrameOutcome::Enqueued { .. }))
        .count();
    let dropped = outcomes
        .iter()
        .filter(|o| **o == FrameOutcome::Dropped(DropReason::QueueFull))
        .count();
    assert_eq!((enqueued, dropped), (5, 5));

    let queue = camera.queue().clone();
    assert_eq!(queue.len(), 5);
    let order: Vec<_> = queue.drain().iter().map(|s| s.frame.meta.sequence).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    camera.shutdown();
}

#[test]
fn sequence_continues_after_drops() {
    let mut camera =
        VirtualCamera::new(&stream(30, 2), &mask_config(), Box::new(ConstantModel(0))).unwrap();
    camera.start();

    let mut sequences = Vec::new();
    for i in 0..8 {
        if let FrameOutcome::Enqueued { sequence, .. } = camera.on_frame(Some(frame(i, 30))) {
            sequences.push(sequence);
        }
        if i % 3 == 2 {
            camera.queue().drain();
        }
    }
    assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));
    assert!(!sequences.is_empty());
    camera.shutdown();
}

#[test]
fn person_mask_and_empty_mask() {
    let bg = RgbaImage::from_pixel(WIDTH * 2, HEIGHT * 2, Rgba([5, 6, 7, 255]));

    // Everything is a person: output equals the input frame
    let mut camera = VirtualCamera::new(
        &stream(2, 16),
        &mask_config(),
        Box::new(ConstantModel(PERSON_CLASS)),
    )
    .unwrap();
    camera.start();
    camera.mask_store().publish_background(Background::new(bg.clone()));
    camera.on_frame(Some(frame(0, 2)));
    assert!(camera.mask_updater().wait_idle(WAIT));
    assert!(camera.mask_store().get_mask().is_some());
    let input = frame(1, 2);
    camera.on_frame(Some(input.clone()));
    let samples = camera.queue().drain();
    assert_eq!(samples.last().unwrap().frame.data, input.data);
    camera.shutdown();

    // Nobody is a person: output equals the resampled background
    let mut camera =
        VirtualCamera::new(&stream(2, 16), &mask_config(), Box::new(ConstantModel(0))).unwrap();
    camera.start();
    let background = Background::new(bg);
    let expected = background.fitted(WIDTH, HEIGHT).into_owned();
    camera.mask_store().publish_background(background);
    camera.on_frame(Some(frame(0, 2)));
    assert!(camera.mask_updater().wait_idle(WAIT));
    camera.on_frame(Some(frame(1, 2)));
    let samples = camera.queue().drain();
    assert_eq!(&samples.last().unwrap().frame.data[..], expected.as_raw().as_slice());
    camera.shutdown();
}

#[test]
fn observer_drives_consumer_thread() {
    let mut camera =
        VirtualCamera::new(&stream(30, 4), &mask_config(), Box::new(ConstantModel(0))).unwrap();
    let queue = camera.queue().clone();
    let (tx, rx) = flume::unbounded::<(String, u64)>();
    camera.set_queue_observer(Some(QueueObserver::new(move |device, sample| {
        tx.send((device.to_string(), sample.sequence)).unwrap();
    })));
    camera.start();

    let received = Arc::new(Mutex::new(Vec::new()));
    let consumer = {
        let received = received.clone();
        thread::spawn(move || {
            while let Ok((device, sequence)) = rx.recv_timeout(WAIT) {
                let sample = queue.pop().expect("notified sample is queued");
                assert_eq!(sample.sequence, sequence);
                received.lock().unwrap().push((device, sequence));
                if sequence == 19 {
                    break;
                }
            }
        })
    };

    let mut enqueued = 0;
    let mut index = 0;
    while enqueued < 20 {
        match camera.on_frame(Some(frame(index, 30))) {
            FrameOutcome::Enqueued { .. } => enqueued += 1,
            FrameOutcome::Dropped(DropReason::QueueFull) => thread::yield_now(),
            other => panic!("unexpected outcome {other:?}"),
        }
        index += 1;
    }
    consumer.join().unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 20);
    assert!(received.iter().all(|(d, _)| d == "backdrop-virtual-camera"));
    assert_eq!(
        received.iter().map(|(_, s)| *s).collect::<Vec<_>>(),
        (0..20).collect::<Vec<u64>>()
    );
    camera.shutdown();
}

#[test]
fn pass_finishing_after_stop_does_not_publish() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let model = GatedModel {
        entered: entered_tx,
        release: release_rx,
    };
    let mut camera = VirtualCamera::new(&stream(30, 4), &mask_config(), Box::new(model)).unwrap();
    camera.start();
    camera.on_frame(Some(frame(0, 30)));
    entered_rx.recv_timeout(WAIT).unwrap();

    // The producer keeps going while the pass is stuck
    for i in 1..4 {
        assert!(matches!(
            camera.on_frame(Some(frame(i, 30))),
            FrameOutcome::Enqueued { mask: None, .. }
        ));
    }

    camera.stop();
    release_tx.send(()).unwrap();
    assert!(camera.mask_updater().wait_idle(WAIT));
    assert!(camera.mask_store().get_mask().is_none());
    assert_eq!(camera.mask_updater().failed(), 1);
    camera.shutdown();
}

#[test]
fn producer_loop_runs_until_capture_closes() {
    let mut camera =
        VirtualCamera::new(&stream(30, 64), &mask_config(), Box::new(ConstantModel(0))).unwrap();
    camera.start();
    let queue = camera.queue().clone();

    let (tx, rx) = flume::bounded(4);
    let feeder = thread::spawn(move || {
        for i in 0..10 {
            tx.send(if i == 4 { None } else { Some(frame(i, 30)) }).unwrap();
        }
    });
    camera.run(rx);
    feeder.join().unwrap();

    assert_eq!(queue.len(), 9);
    camera.shutdown();
}
