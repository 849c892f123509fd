//! Wholesale-replace holder for the current mask and background

use std::borrow::Cow;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};
use once_cell::sync::OnceCell;
use tracing::debug;

/// Per-pixel foreground alpha at output resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    alpha: GrayImage,
}

impl Mask {
    pub fn new(alpha: GrayImage) -> Self {
        Self { alpha }
    }

    /// Mask with the same alpha everywhere
    pub fn uniform(width: u32, height: u32, alpha: u8) -> Self {
        Self::new(GrayImage::from_pixel(width, height, image::Luma([alpha])))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.alpha.dimensions()
    }

    pub fn alpha(&self) -> &GrayImage {
        &self.alpha
    }
}

/// Substitute background at its source resolution
#[derive(Debug)]
pub struct Background {
    image: RgbaImage,
    // Resampled copy for the stream size, computed on first use
    fitted: OnceCell<RgbaImage>,
}

impl Background {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            fitted: OnceCell::new(),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// The background resampled to `width` x `height`
    pub fn fitted(&self, width: u32, height: u32) -> Cow<'_, RgbaImage> {
        if self.image.dimensions() == (width, height) {
            return Cow::Borrowed(&self.image);
        }
        let fitted = self
            .fitted
            .get_or_init(|| imageops::resize(&self.image, width, height, FilterType::Triangle));
        if fitted.dimensions() == (width, height) {
            Cow::Borrowed(fitted)
        } else {
            Cow::Owned(imageops::resize(&self.image, width, height, FilterType::Triangle))
        }
    }
}

/// Holds the latest published mask and background.
///
/// Readers get an `Arc` snapshot and never block; writers swap the whole
/// value in, so a reader sees either the old or the new image, never a mix.
#[derive(Debug, Default)]
pub struct MaskStore {
    mask: ArcSwapOption<Mask>,
    background: ArcSwapOption<Background>,
}

impl MaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_mask(&self) -> Option<Arc<Mask>> {
        self.mask.load_full()
    }

    pub fn get_background(&self) -> Option<Arc<Background>> {
        self.background.load_full()
    }

    pub fn publish_mask(&self, mask: Mask) {
        self.mask.store(Some(Arc::new(mask)));
    }

    pub fn publish_background(&self, background: Background) {
        self.background.store(Some(Arc::new(background)));
    }

    /// Publish `image` unless it equals the current background.
    ///
    /// Returns whether a new background was published.
    pub fn publish_background_if_changed(&self, image: RgbaImage) -> bool {
        if let Some(current) = &*self.background.load() {
            if current.image.dimensions() == image.dimensions()
                && current.image.as_raw() == image.as_raw()
            {
                debug!("Background unchanged, keeping current");
                return false;
            }
        }
        self.publish_background(Background::new(image));
        true
    }
}
