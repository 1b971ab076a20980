//! Shared data models for the FragClip highlight pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Time intervals and detected modality events
//! - Candidate segments, materialized clips and scored clips
//! - Job records and pipeline stages

pub mod event;
pub mod interval;
pub mod job;
pub mod segment;

// Re-export common types
pub use event::{ActionLabel, DetectedEvent, Modality};
pub use interval::{merge_adjacent, IntervalError, TimeInterval};
pub use job::{JobId, JobRecord, JobState, PipelineStage};
pub use segment::{
    clip_file_name, MaterializedClip, ScoreBreakdown, ScoreStatus, ScoredClip, Segment,
};
