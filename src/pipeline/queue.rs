//! Bounded lock-free queue of output samples

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;

use crate::pipeline::dispatcher::OutputSample;

/// Shared handle to a dispatched sample
pub type SampleHandle = Arc<OutputSample>;

/// Fixed-capacity FIFO between the producer and the consumer.
///
/// A full queue rejects the new sample (drop-newest); it never overwrites
/// or blocks.
pub struct FrameQueue {
    ring: ArrayQueue<SampleHandle>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub written: usize,
    pub read: usize,
    pub dropped: usize,
}

impl FrameQueue {
    /// `capacity` must be non-zero
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: ArrayQueue::new(capacity),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: push a sample, handing it back if the queue is full
    pub fn push(&self, sample: SampleHandle) -> Result<(), SampleHandle> {
        match self.ring.push(sample) {
            Ok(()) => {
                self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(sample) => {
                self.record_drop();
                Err(sample)
            }
        }
    }

    /// Count a sample that was rejected before reaching `push`
    pub fn record_drop(&self) {
        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Consumer: take the oldest sample
    pub fn pop(&self) -> Option<SampleHandle> {
        let sample = self.ring.pop()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(sample)
    }

    /// Consumer: take everything currently queued, oldest first
    pub fn drain(&self) -> Vec<SampleHandle> {
        std::iter::from_fn(|| self.pop()).collect()
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            written: self.stats.frames_written.load(Ordering::Relaxed),
            read: self.stats.frames_read.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}
