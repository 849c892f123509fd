//! Error types for the frame pipeline components
//!
//! Every error here stays inside the component that produced it. The stream
//! orchestrator turns them into per-frame outcomes; none of them stops the
//! stream.

use thiserror::Error;

use crate::clock::Timestamp;

/// Failure to post a presentation timestamp
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("clock unavailable")]
    Unavailable,
    #[error("timestamp {pts:?} is not after previous {previous:?}")]
    OutOfOrder { pts: Timestamp, previous: Timestamp },
}

/// Failure reported by a segmentation backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("class map is {got_width}x{got_height}, expected {width}x{height}")]
    ShapeMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
}

/// Failure of a single mask update pass
#[derive(Debug, Error)]
pub enum MaskError {
    #[error("frame is not a valid RGBA32 buffer")]
    MalformedFrame,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("stream stopped before the mask could be published")]
    Stopped,
    #[error("segmentation model panicked")]
    Panicked,
}

/// Failure to obtain a background image
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("failed to read background: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode background: {0}")]
    Decode(#[from] image::ImageError),
    #[error("fetch task aborted: {0}")]
    Join(String),
}

/// Errors raised while building a stream
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
