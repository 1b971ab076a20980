//! Job records and pipeline stages.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, not yet picked up
    #[default]
    Queued,
    /// Pipeline is running
    Processing,
    /// Pipeline finished (with or without clips)
    Completed,
    /// Pipeline aborted with an error
    Failed,
    /// Abandoned at the caller's request
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Major pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    DetectingMotion,
    AnalyzingAudio,
    DetectingShots,
    ScanningActions,
    SegmentingClips,
    MaterializingClips,
    RankingVirality,
    Complete,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 8] = [
        PipelineStage::DetectingMotion,
        PipelineStage::AnalyzingAudio,
        PipelineStage::DetectingShots,
        PipelineStage::ScanningActions,
        PipelineStage::SegmentingClips,
        PipelineStage::MaterializingClips,
        PipelineStage::RankingVirality,
        PipelineStage::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::DetectingMotion => "detecting_motion",
            PipelineStage::AnalyzingAudio => "analyzing_audio",
            PipelineStage::DetectingShots => "detecting_shots",
            PipelineStage::ScanningActions => "scanning_actions",
            PipelineStage::SegmentingClips => "segmenting_clips",
            PipelineStage::MaterializingClips => "materializing_clips",
            PipelineStage::RankingVirality => "ranking_virality",
            PipelineStage::Complete => "complete",
        }
    }

    /// Overall job percentage reported when the stage starts.
    pub fn entry_percent(&self) -> u8 {
        match self {
            PipelineStage::DetectingMotion => 5,
            PipelineStage::AnalyzingAudio => 20,
            PipelineStage::DetectingShots => 35,
            PipelineStage::ScanningActions => 50,
            PipelineStage::SegmentingClips => 60,
            PipelineStage::MaterializingClips => 70,
            PipelineStage::RankingVirality => 85,
            PipelineStage::Complete => 100,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persistent state of one pipeline job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    pub id: JobId,

    #[serde(default)]
    pub state: JobState,

    /// Most recently reported stage name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Overall progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Latest percentage per stage name
    #[serde(default)]
    pub stages: BTreeMap<String, u8>,

    /// Set by the caller; honored by the job runner
    #[serde(default)]
    pub cancel_requested: bool,

    /// Number of ranked clips on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clips_produced: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a queued record.
    pub fn new(id: JobId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: JobState::Queued,
            stage: None,
            progress: 0,
            stages: BTreeMap::new(),
            cancel_requested: false,
            clips_produced: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Record a stage checkpoint. Ignored once the job is terminal.
    pub fn record_progress(&mut self, stage: &str, percent: u8) {
        if self.state.is_terminal() {
            return;
        }
        let percent = percent.min(100);
        if self.state == JobState::Queued {
            self.state = JobState::Processing;
        }
        self.stage = Some(stage.to_string());
        self.stages.insert(stage.to_string(), percent);
        self.progress = percent;
        self.updated_at = Utc::now();
    }

    /// Start processing the job.
    pub fn start(&mut self) {
        if self.state == JobState::Queued {
            self.state = JobState::Processing;
            self.updated_at = Utc::now();
        }
    }

    /// Mark job as completed.
    pub fn complete(&mut self, clips_produced: u32) {
        self.finish(JobState::Completed);
        self.progress = 100;
        self.clips_produced = Some(clips_produced);
    }

    /// Mark job as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.finish(JobState::Failed);
        self.error_message = Some(error.into());
    }

    /// Mark job as cancelled.
    pub fn cancel(&mut self) {
        self.cancel_requested = true;
        self.finish(JobState::Cancelled);
    }

    fn finish(&mut self, state: JobState) {
        let now = Utc::now();
        self.state = state;
        self.updated_at = now;
        self.completed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let mut job = JobRecord::new(JobId::from_string("job-1"));
        assert_eq!(job.state, JobState::Queued);

        job.record_progress("detecting_motion", 5);
        assert_eq!(job.state, JobState::Processing);
        assert_eq!(job.stage.as_deref(), Some("detecting_motion"));

        job.record_progress("ranking_virality", 85);
        job.complete(3);
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.clips_produced, Some(3));
        assert!(job.completed_at.is_some());
        assert_eq!(job.stages.len(), 2);
    }

    #[test]
    fn test_progress_ignored_after_terminal() {
        let mut job = JobRecord::new(JobId::new());
        job.fail("decoder crashed");
        job.record_progress("detecting_shots", 35);
        assert_eq!(job.state, JobState::Failed);
        assert!(job.stage.is_none());
        assert_eq!(job.error_message.as_deref(), Some("decoder crashed"));
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut job = JobRecord::new(JobId::new());
        job.record_progress("complete", 250);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_stage_percentages_increase() {
        let percents: Vec<u8> = PipelineStage::ALL.iter().map(|s| s.entry_percent()).collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(PipelineStage::Complete.entry_percent(), 100);
        assert_eq!(PipelineStage::SegmentingClips.as_str(), "segmenting_clips");
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(!JobState::Processing.is_terminal());
    }
}
