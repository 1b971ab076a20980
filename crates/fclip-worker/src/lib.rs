//! Highlight extraction and virality ranking worker.
//!
//! This crate provides:
//! - Explicit pipeline configuration with documented defaults
//! - The segment merger, clip materializer, virality scorer and ranker
//! - Optional sliding-window action scanning
//! - The stage-synchronous pipeline and a job runner with cancellation

pub mod action_scan;
pub mod config;
pub mod error;
pub mod logging;
pub mod materializer;
pub mod merger;
pub mod metrics;
pub mod pipeline;
pub mod ranking;
pub mod runner;
pub mod scoring;

pub use config::{
    ActionScanConfig, AudioConfig, MaterializeConfig, MergeConfig, MotionConfig, PipelineConfig, RankingConfig,
    ScoringConfig, ShotConfig,
};
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use materializer::{FfmpegExtractor, SegmentExtractor};
pub use merger::Signals;
pub use pipeline::{Pipeline, PipelineOutcome};
pub use ranking::RankedHighlights;
pub use runner::{JobRun, JobRunner};
pub use scoring::ViralityScorer;
