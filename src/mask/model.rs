//! Segmentation backends

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Pascal VOC class id for "person"
pub const PERSON_CLASS: u32 = 15;

/// Per-pixel class ids produced by a segmentation backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMap {
    width: u32,
    height: u32,
    classes: Vec<u32>,
}

impl ClassMap {
    /// Returns `None` if `classes` does not hold exactly `width * height` ids
    pub fn new(width: u32, height: u32, classes: Vec<u32>) -> Option<Self> {
        (classes.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            classes,
        })
    }

    pub fn filled(width: u32, height: u32, class: u32) -> Self {
        Self {
            width,
            height,
            classes: vec![class; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> u32) -> Self {
        let mut classes = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                classes.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            classes,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> u32 {
        self.classes[(y * self.width + x) as usize]
    }
}

/// A segmentation backend: fixed-size image in, class map out.
///
/// Implementations run on the mask worker thread only, so they may keep
/// mutable state (sessions, scratch buffers).
pub trait SegmentationModel: Send {
    /// Input resolution the backend requires
    fn input_size(&self) -> (u32, u32);

    /// Classify every pixel of `image`, which is exactly `input_size()`
    fn predict(&mut self, image: &RgbImage) -> Result<ClassMap, ModelError>;
}

/// Which backend the daemon should construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    ChromaKey,
    None,
}

/// Classical green-screen classifier.
///
/// Pixels close to the key colour are background (class 0), everything
/// else is labelled as `foreground_class`.
#[derive(Debug, Clone)]
pub struct ChromaKeyModel {
    input_size: (u32, u32),
    foreground_class: u32,
    /// Minimum lead of green over red and blue for a pixel to be keyed out
    threshold: u8,
}

impl ChromaKeyModel {
    pub fn new(input_size: (u32, u32), foreground_class: u32, threshold: u8) -> Self {
        Self {
            input_size,
            foreground_class,
            threshold,
        }
    }
}

impl SegmentationModel for ChromaKeyModel {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn predict(&mut self, image: &RgbImage) -> Result<ClassMap, ModelError> {
        let threshold = self.threshold as i16;
        Ok(ClassMap::from_fn(image.width(), image.height(), |x, y| {
            let [r, g, b] = image.get_pixel(x, y).0.map(i16::from);
            if g - r > threshold && g - b > threshold {
                0
            } else {
                self.foreground_class
            }
        }))
    }
}

/// Backend used when no model is configured; every pass fails
#[derive(Debug, Clone, Default)]
pub struct NoModel;

impl SegmentationModel for NoModel {
    fn input_size(&self) -> (u32, u32) {
        (1, 1)
    }

    fn predict(&mut self, _image: &RgbImage) -> Result<ClassMap, ModelError> {
        Err(ModelError::Unavailable("no segmentation model configured".into()))
    }
}
