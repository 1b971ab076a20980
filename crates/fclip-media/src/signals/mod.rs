//! Signal extractors.
//!
//! Each extractor is a pure function of its input (a video path or a
//! decoded audio signal) and holds no state between runs, so it can be
//! re-run from scratch on the same source.

pub mod audio_events;
#[cfg(feature = "opencv")]
mod cv;
pub mod features;
pub mod motion;
pub mod quality;
pub mod shots;

/// Progress callback: `(current, total)` units of work.
pub type SignalProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);
