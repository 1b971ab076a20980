//! Candidate segments and the clips produced from them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::event::{DetectedEvent, Modality};
use crate::interval::{IntervalError, TimeInterval};

/// A fixed-duration candidate window anchored at a whole second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    /// Whole-second anchor the segment was created from
    pub anchor: u64,
    #[serde(flatten)]
    pub interval: TimeInterval,
}

impl Segment {
    /// Segment `[anchor, anchor + clip_length)`.
    pub fn anchored(anchor: u64, clip_length: f64) -> Result<Self, IntervalError> {
        let start = anchor as f64;
        Ok(Self {
            anchor,
            interval: TimeInterval::new(start, start + clip_length)?,
        })
    }

    pub fn start(&self) -> f64 {
        self.interval.start()
    }

    pub fn end(&self) -> f64 {
        self.interval.end()
    }

    pub fn duration(&self) -> f64 {
        self.interval.duration()
    }
}

/// Deterministic clip file name: `clip_<index>_<start>_<end>.<ext>`.
///
/// `index` is the zero-based acceptance index; names are one-based.
pub fn clip_file_name(index: usize, segment: &Segment, ext: &str) -> String {
    format!(
        "clip_{}_{:.2}_{:.2}.{}",
        index + 1,
        segment.start(),
        segment.end(),
        ext
    )
}

/// A segment that was successfully extracted to its own file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MaterializedClip {
    /// Zero-based chronological acceptance index
    pub index: usize,
    pub segment: Segment,
    pub path: PathBuf,
    /// Detected events overlapping the segment
    #[serde(default)]
    pub evidence: Vec<DetectedEvent>,
}

impl MaterializedClip {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start(&self) -> f64 {
        self.segment.start()
    }

    /// Number of evidence events from a modality.
    pub fn evidence_count(&self, modality: Modality) -> usize {
        self.evidence
            .iter()
            .filter(|e| e.modality == modality)
            .count()
    }
}

/// Outcome of scoring one clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    #[default]
    Scored,
    /// Clip yielded fewer frames than one classifier window
    InsufficientFrames,
    /// The classifier call failed
    ClassifierFailed,
}

impl ScoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreStatus::Scored => "scored",
            ScoreStatus::InsufficientFrames => "insufficient_frames",
            ScoreStatus::ClassifierFailed => "classifier_failed",
        }
    }
}

/// Individual terms of the composite virality score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoreBreakdown {
    pub mean_confidence: f64,
    pub confidence_variation: f64,
    pub low_confidence_count: u32,
    pub mean_brightness: f64,
    pub mean_blur_penalty: f64,
    pub gunshot_hits: u32,
    pub laughter_hits: u32,
    pub loud_peak_hits: u32,
    /// Score before audio-event boosts
    pub base_score: f64,
    pub event_boost: f64,
}

/// A materialized clip with its virality score.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScoredClip {
    pub clip: MaterializedClip,
    pub score: f64,
    #[serde(default)]
    pub status: ScoreStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<ScoreBreakdown>,
    /// Failure message when `status` is not `scored`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScoredClip {
    pub fn scored(clip: MaterializedClip, breakdown: ScoreBreakdown) -> Self {
        Self {
            clip,
            score: breakdown.base_score + breakdown.event_boost,
            status: ScoreStatus::Scored,
            breakdown: Some(breakdown),
            error: None,
        }
    }

    /// Zero-score entry that stays in the full listing but never ranks.
    pub fn unscored(clip: MaterializedClip, status: ScoreStatus, error: impl Into<String>) -> Self {
        Self {
            clip,
            score: 0.0,
            status,
            breakdown: None,
            error: Some(error.into()),
        }
    }

    /// Whether this clip may enter the top-N selection.
    pub fn is_rankable(&self) -> bool {
        self.status == ScoreStatus::Scored
    }

    pub fn start(&self) -> f64 {
        self.clip.start()
    }
}
