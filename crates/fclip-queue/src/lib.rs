//! Job bookkeeping for the highlight pipeline.
//!
//! This crate provides:
//! - A [`JobStore`] interface with in-memory and Redis implementations
//! - [`ProgressSink`] implementations feeding the store, Redis Pub/Sub or logs

pub mod error;
pub mod progress;
pub mod store;

pub use error::{QueueError, QueueResult};
pub use progress::{
    ChannelProgressSink, FanoutProgressSink, LogProgressSink, MemoryProgressSink, ProgressChannel,
    ProgressEvent, ProgressSink, StoreProgressSink,
};
pub use store::{open_store, InMemoryJobStore, JobStore, RedisJobStore, StoreConfig, JOB_TTL_SECS};
