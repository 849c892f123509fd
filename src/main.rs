//! Backdrop virtual camera daemon

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;

use backdrop::capture::{self, CaptureSource, PatternSource, V4l2Capture};
use backdrop::mask::{ChromaKeyModel, NoModel, SegmentationModel};
use backdrop::pipeline::QueueObserver;
use backdrop::sink::{self, LoopbackSink};
use backdrop::{background, utils, CaptureSourceKind, Config, Frame, ModelKind, VirtualCamera};
use color_eyre::{eyre::eyre, Result};
use flume::bounded;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("backdrop=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Backdrop launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let mut config = Config::load(config_path.as_deref())?;
    config.validate()?;

    let model: Box<dyn SegmentationModel> = match config.mask.model {
        ModelKind::ChromaKey => Box::new(ChromaKeyModel::new(
            (config.mask.input_width, config.mask.input_height),
            config.mask.foreground_class,
            config.mask.key_threshold,
        )),
        ModelKind::None => Box::new(NoModel),
    };

    let mut camera = VirtualCamera::new(&config.stream, &config.mask, model)?;
    let format = camera.format().clone();
    let queue = camera.queue().clone();
    let running = camera.running_flag();

    // Consumer side: the observer only wakes the drain thread
    let (notify_tx, notify_rx) = bounded::<()>(1);
    camera.set_queue_observer(Some(QueueObserver::new(move |_device, _sample| {
        let _ = notify_tx.try_send(());
    })));

    let loopback = match config.output.device.as_deref() {
        Some(path) => Some(LoopbackSink::open(path, &format)?),
        None => {
            warn!("No output device configured, frames will be discarded");
            None
        }
    };

    // Capture source
    let source: Box<dyn CaptureSource> = match config.capture.source {
        CaptureSourceKind::Pattern => Box::new(PatternSource::new(
            format.width,
            format.height,
            format.fps,
        )),
        CaptureSourceKind::V4l2 => {
            if config.capture.device.is_empty() {
                let found = utils::auto_detect_device()?;
                config.capture.device = found.path;
                config.capture.format = found.format;
            }
            info!("Using capture device: {}", config.capture.device);
            Box::new(V4l2Capture::new(
                config.capture.clone(),
                format.width,
                format.height,
                format.fps,
            )?)
        }
    };

    camera.start();

    // Background fetch, single attempt
    if let Some(bg_source) = config.background.source.clone() {
        let _fetch = background::spawn_fetch(bg_source, camera.mask_store().clone());
    }

    let (frame_tx, frame_rx) = bounded::<Option<Frame>>(2);

    let capture_handle = {
        let running = running.clone();
        thread::Builder::new()
            .name("capture".into())
            .spawn(move || capture::run_capture(source, frame_tx, running))?
    };

    let consumer_handle = {
        let running = running.clone();
        thread::Builder::new()
            .name("consumer".into())
            .spawn(move || sink::run_consumer(queue, notify_rx, loopback, running))?
    };

    let producer_core = config.stream.producer_core;
    let producer_handle = thread::Builder::new()
        .name("producer".into())
        .spawn(move || {
            if let Some(core) = producer_core {
                pin_to_core(core);
            }
            camera.run(frame_rx);
            camera.shutdown();
        })?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received");
    running.store(false, Ordering::Release);

    for (name, handle) in [
        ("producer", producer_handle),
        ("capture", capture_handle),
        ("consumer", consumer_handle),
    ] {
        handle
            .join()
            .map_err(|_| eyre!("{} thread panicked", name))?;
    }

    info!("Backdrop shutting down");
    Ok(())
}

fn pin_to_core(core: usize) {
    let pinned = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == core))
        .map(core_affinity::set_for_current)
        .unwrap_or(false);
    if pinned {
        info!("Producer pinned to core {}", core);
    } else {
        warn!("Could not pin producer to core {}", core);
    }
}
