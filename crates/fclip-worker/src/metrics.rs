//! Pipeline metrics.
//!
//! Counters are recorded through the `metrics` facade; without an installed
//! recorder they are no-ops.

use metrics::{counter, histogram};

use fclip_models::{PipelineStage, ScoreStatus};

/// Metric name constants for consistency.
pub mod names {
    /// Clips successfully extracted.
    pub const CLIPS_MATERIALIZED_TOTAL: &str = "fclip_clips_materialized_total";

    /// Failed clip extractions by reason.
    pub const EXTRACTION_FAILURES_TOTAL: &str = "fclip_extraction_failures_total";

    /// Clips scored by status.
    pub const CLIPS_SCORED_TOTAL: &str = "fclip_clips_scored_total";

    /// Finished pipeline runs by outcome.
    pub const PIPELINE_RUNS_TOTAL: &str = "fclip_pipeline_runs_total";

    /// Stage duration in seconds by stage.
    pub const STAGE_DURATION_SECONDS: &str = "fclip_stage_duration_seconds";
}

pub fn record_clip_materialized() {
    counter!(names::CLIPS_MATERIALIZED_TOTAL).increment(1);
}

pub fn record_extraction_failure(reason: &str) {
    counter!(
        names::EXTRACTION_FAILURES_TOTAL,
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_clip_scored(status: ScoreStatus) {
    counter!(
        names::CLIPS_SCORED_TOTAL,
        "status" => status.as_str()
    )
    .increment(1);
}

pub fn record_pipeline_run(outcome: &str) {
    counter!(
        names::PIPELINE_RUNS_TOTAL,
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_stage_duration(stage: PipelineStage, seconds: f64) {
    histogram!(
        names::STAGE_DURATION_SECONDS,
        "stage" => stage.as_str()
    )
    .record(seconds);
}
