pub mod dispatcher;
pub mod queue;
pub mod stream;

pub use dispatcher::{
    DispatchOutcome, Dispatcher, DropReason, OutputSample, QueueObserver, StreamFormat,
};
pub use queue::{FrameQueue, QueueStats, SampleHandle};
pub use stream::{FrameOutcome, VirtualCamera};
