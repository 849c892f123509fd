//! Presentation clock for the output stream

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::ClockError;

/// Rational timestamp: `value / timescale` seconds
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    pub value: i64,
    pub timescale: u32,
}

impl Timestamp {
    pub const fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    pub fn from_duration(duration: Duration, timescale: u32) -> Self {
        let value = duration.as_nanos() * timescale as u128 / 1_000_000_000;
        Self::new(value as i64, timescale)
    }

    /// Convert into another timescale, rounding toward negative infinity
    pub fn rescale(self, timescale: u32) -> Self {
        if self.timescale == timescale {
            return self;
        }
        let scaled = (self.value as i128 * timescale as i128).div_euclid(self.timescale as i128);
        Self::new(scaled as i64, timescale)
    }

    /// A zero timescale cannot be rescaled or compared
    pub fn is_valid(&self) -> bool {
        self.timescale != 0
    }

    pub fn seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    fn cross(&self, other: &Self) -> (i128, i128) {
        (
            self.value as i128 * other.timescale as i128,
            other.value as i128 * self.timescale as i128,
        )
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = self.cross(other);
        a == b
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = self.cross(other);
        a.cmp(&b)
    }
}

/// Timing information carried by every frame and sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub pts: Timestamp,
    pub duration: Timestamp,
}

impl FrameTiming {
    pub fn is_valid(&self) -> bool {
        self.pts.is_valid() && self.duration.is_valid()
    }

    pub fn rescale(self, timescale: u32) -> Self {
        Self {
            pts: self.pts.rescale(timescale),
            duration: self.duration.rescale(timescale),
        }
    }
}

/// A successfully posted timing event
#[derive(Debug, Clone, Copy)]
pub struct TimingEvent {
    pub pts: Timestamp,
    pub host_time: Instant,
}

/// Source of presentation timing for the output stream.
///
/// Called exactly once per dispatched frame, with `host_time` taken when
/// the frame is processed. Must never block.
pub trait Clock: Send {
    fn post_timing(
        &mut self,
        pts: Timestamp,
        host_time: Instant,
        is_monotonic: bool,
    ) -> Result<(), ClockError>;
}

/// Host clock that enforces strictly increasing timestamps
#[derive(Debug, Default)]
pub struct HostClock {
    last: Option<TimingEvent>,
    posted: u64,
}

impl HostClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_event(&self) -> Option<TimingEvent> {
        self.last
    }

    pub fn posted(&self) -> u64 {
        self.posted
    }
}

impl Clock for HostClock {
    fn post_timing(
        &mut self,
        pts: Timestamp,
        host_time: Instant,
        is_monotonic: bool,
    ) -> Result<(), ClockError> {
        if let Some(previous) = self.last {
            if is_monotonic && pts <= previous.pts {
                trace!(?pts, previous = ?previous.pts, "rejecting out-of-order timestamp");
                return Err(ClockError::OutOfOrder {
                    pts,
                    previous: previous.pts,
                });
            }
        }
        self.last = Some(TimingEvent { pts, host_time });
        self.posted += 1;
        Ok(())
    }
}
