//! Best-effort, single-attempt background image fetch

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::error::FetchError;
use crate::mask::MaskStore;

/// Upper bound on a downloaded background
const MAX_DOWNLOAD_BYTES: u64 = 32 * 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Load and decode a background from a URL or a file path. Blocking.
#[instrument]
pub fn fetch_background(source: &str) -> Result<RgbaImage, FetchError> {
    let bytes = if is_url(source) {
        let response = ureq::get(source)
            .timeout(REQUEST_TIMEOUT)
            .call()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_DOWNLOAD_BYTES)
            .read_to_end(&mut bytes)?;
        bytes
    } else {
        std::fs::read(source)?
    };

    Ok(image::load_from_memory(&bytes)?.into_rgba8())
}

/// Fetch `source` on a blocking task and publish it into `store` if it
/// differs from the current background. Failures only log.
pub fn spawn_fetch(source: String, store: Arc<MaskStore>) -> JoinHandle<Result<bool, FetchError>> {
    tokio::spawn(async move {
        let fetch_source = source.clone();
        let result = tokio::task::spawn_blocking(move || fetch_background(&fetch_source))
            .await
            .map_err(|e| FetchError::Join(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(image) => {
                let (width, height) = image.dimensions();
                let published = store.publish_background_if_changed(image);
                info!(%source, width, height, published, "Background fetched");
                Ok(published)
            }
            Err(e) => {
                warn!(%source, "Background fetch failed: {}", e);
                Err(e)
            }
        }
    })
}
