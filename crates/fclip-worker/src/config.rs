//! Pipeline configuration.
//!
//! Every stage has an explicit struct with documented defaults. All structs
//! deserialize with `#[serde(default)]`, so a JSON file only needs the
//! fields it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fclip_media::{AudioEventParams, DescriptorKind, MotionParams, ShotParams, ANALYSIS_SAMPLE_RATE};
use fclip_ml_client::{WINDOW_FRAMES, WINDOW_SIZE};

use crate::error::{WorkerError, WorkerResult};

/// Motion detection stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub params: MotionParams,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            params: MotionParams::default(),
        }
    }
}

/// Audio event stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    /// Decode rate for analysis
    pub sample_rate: u32,
    #[serde(flatten)]
    pub params: AudioEventParams,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: ANALYSIS_SAMPLE_RATE,
            params: AudioEventParams::default(),
        }
    }
}

/// Shot boundary stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShotConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub params: ShotParams,
}

impl Default for ShotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            params: ShotParams::default(),
        }
    }
}

/// Sliding-window action classification over the whole source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionScanConfig {
    pub enabled: bool,
    /// Frames per classifier window
    pub window: usize,
    /// Frames between window starts
    pub stride: usize,
    /// Minimum top-label probability for an action event
    pub threshold: f32,
    /// Side length of decoded frames
    pub frame_size: u32,
}

impl Default for ActionScanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window: WINDOW_FRAMES,
            stride: 5,
            threshold: 0.7,
            frame_size: WINDOW_SIZE,
        }
    }
}

/// Segment merger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Candidate clip length in seconds
    pub clip_length: f64,
    /// Motion windows (highest count first) used as anchors
    pub motion_max_windows: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            clip_length: 8.0,
            motion_max_windows: 30,
        }
    }
}

/// Clip materializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializeConfig {
    pub max_clips: usize,
    /// Minimum distance between accepted clip starts (seconds)
    pub min_time_gap: f64,
    /// Concurrent FFmpeg extractions
    pub workers: usize,
    /// Output container extension
    pub extension: String,
    /// Keep the loudest `max_clips` candidates before extracting
    pub prefilter_by_loudness: bool,
    /// Subdirectory of the output directory for clip files
    pub clips_dir: String,
    /// Kill an extraction that runs longer than this
    pub extraction_timeout_secs: Option<u64>,
}

impl Default for MaterializeConfig {
    fn default() -> Self {
        Self {
            max_clips: 40,
            min_time_gap: 1.0,
            workers: 8,
            extension: "mp4".to_string(),
            prefilter_by_loudness: false,
            clips_dir: "clips".to_string(),
            extraction_timeout_secs: Some(300),
        }
    }
}

/// Virality scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Frames per classifier window
    pub window_frames: usize,
    /// Side length of decoded frames
    pub frame_size: u32,
    /// Classifier windows per clip, spread evenly across it
    pub sub_windows: usize,
    /// Upper bound on frames decoded per clip
    pub max_decode_frames: usize,
    /// Windows whose top probability is below this count as low confidence
    pub low_confidence: f64,
    /// Clips scored concurrently
    pub workers: usize,
    pub confidence_weight: f64,
    pub variation_weight: f64,
    pub low_confidence_weight: f64,
    pub brightness_weight: f64,
    pub blur_weight: f64,
    pub gunshot_boost: f64,
    pub laughter_boost: f64,
    pub loud_peak_boost: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            window_frames: WINDOW_FRAMES,
            frame_size: WINDOW_SIZE,
            sub_windows: 4,
            max_decode_frames: 1000,
            low_confidence: 0.5,
            workers: 4,
            confidence_weight: 100.0,
            variation_weight: 10.0,
            low_confidence_weight: 5.0,
            brightness_weight: 0.01,
            blur_weight: 0.01,
            gunshot_boost: 1.5,
            laughter_boost: 1.2,
            loud_peak_boost: 1.0,
        }
    }
}

/// Ranking and output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub top_clip_count: usize,
    /// Minimum distance between selected clip starts (seconds)
    pub min_time_gap: f64,
    /// Manifest file name in the output directory; `None` disables it
    pub manifest_name: Option<String>,
    /// Copy the selected clips here with rank-prefixed names
    pub export_top_dir: Option<PathBuf>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_clip_count: 20,
            min_time_gap: 1.0,
            manifest_name: Some("virality_ranks.txt".to_string()),
            export_top_dir: None,
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub motion: MotionConfig,
    pub audio: AudioConfig,
    pub shots: ShotConfig,
    pub action_scan: ActionScanConfig,
    pub merge: MergeConfig,
    pub materialize: MaterializeConfig,
    pub scoring: ScoringConfig,
    pub ranking: RankingConfig,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl PipelineConfig {
    /// Defaults overridden by `FCLIP_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> WorkerResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WorkerError::config_error(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FCLIP_*` environment overrides in place.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse("FCLIP_MOTION_SEGMENT_SECS") {
            self.motion.params.segment_duration = v;
        }
        if let Some(v) = env_parse("FCLIP_MOTION_FPS_THRESHOLD") {
            self.motion.params.fps_threshold = v;
        }
        if let Some(v) = env_parse("FCLIP_SAMPLE_RATE") {
            self.audio.sample_rate = v;
        }
        if let Some(v) = env_parse::<DescriptorKind>("FCLIP_SHOT_DESCRIPTOR") {
            self.shots.params.descriptor = v;
        }
        if let Some(v) = env_parse("FCLIP_SHOT_THRESHOLD") {
            self.shots.params.match_threshold = v;
        }
        if let Some(v) = env_parse("FCLIP_SHOT_WORKERS") {
            self.shots.params.workers = v;
        }
        if let Some(v) = env_flag("FCLIP_ACTION_SCAN") {
            self.action_scan.enabled = v;
        }
        if let Some(v) = env_parse("FCLIP_CLIP_LENGTH") {
            self.merge.clip_length = v;
        }
        if let Some(v) = env_parse("FCLIP_MAX_CLIPS") {
            self.materialize.max_clips = v;
        }
        if let Some(v) = env_parse("FCLIP_MIN_TIME_GAP") {
            self.materialize.min_time_gap = v;
            self.ranking.min_time_gap = v;
        }
        if let Some(v) = env_parse("FCLIP_EXTRACT_WORKERS") {
            self.materialize.workers = v;
        }
        if let Some(v) = env_flag("FCLIP_PREFILTER_LOUDNESS") {
            self.materialize.prefilter_by_loudness = v;
        }
        if let Some(v) = env_parse("FCLIP_SCORE_WORKERS") {
            self.scoring.workers = v;
        }
        if let Some(v) = env_parse("FCLIP_TOP_CLIP_COUNT") {
            self.ranking.top_clip_count = v;
        }
        if let Ok(v) = std::env::var("FCLIP_EXPORT_TOP_DIR") {
            if !v.is_empty() {
                self.ranking.export_top_dir = Some(PathBuf::from(v));
            }
        }
    }

    /// Audio detector parameters with the loud-peak window set to the
    /// clip length, so a peak window and the clip cut from it coincide.
    pub fn audio_event_params(&self) -> AudioEventParams {
        AudioEventParams {
            peak_window: self.merge.clip_length,
            ..self.audio.params.clone()
        }
    }

    /// Reject values no stage can run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if !(self.merge.clip_length.is_finite() && self.merge.clip_length > 0.0) {
            return Err(WorkerError::config_error("merge.clip_length must be positive"));
        }
        if self.motion.params.segment_duration <= 0.0 {
            return Err(WorkerError::config_error("motion.segment_duration must be positive"));
        }
        if self.materialize.min_time_gap < 0.0 || self.ranking.min_time_gap < 0.0 {
            return Err(WorkerError::config_error("min_time_gap must not be negative"));
        }
        if self.materialize.workers == 0 || self.scoring.workers == 0 {
            return Err(WorkerError::config_error("worker counts must be at least 1"));
        }
        if self.scoring.window_frames == 0 || self.action_scan.window == 0 {
            return Err(WorkerError::config_error("classifier windows must hold frames"));
        }
        if self.action_scan.stride == 0 {
            return Err(WorkerError::config_error("action_scan.stride must be at least 1"));
        }
        if self.audio.sample_rate == 0 {
            return Err(WorkerError::config_error("audio.sample_rate must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.merge.clip_length, 8.0);
        assert_eq!(config.materialize.max_clips, 40);
        assert_eq!(config.materialize.min_time_gap, 1.0);
        assert_eq!(config.ranking.top_clip_count, 20);
        assert_eq!(config.motion.params.segment_duration, 60.0);
        assert_eq!(config.shots.params.match_threshold, 30.0);
        assert!(!config.action_scan.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "merge": {"clip_length": 12.0},
            "shots": {"descriptor": "sift", "workers": 2},
            "ranking": {"top_clip_count": 5}
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.merge.clip_length, 12.0);
        assert_eq!(config.merge.motion_max_windows, 30);
        assert_eq!(config.shots.params.descriptor, DescriptorKind::Sift);
        assert_eq!(config.shots.params.workers, 2);
        assert_eq!(config.shots.params.match_threshold, 30.0);
        assert!(config.shots.enabled);
        assert_eq!(config.ranking.top_clip_count, 5);
        assert_eq!(config.materialize.max_clips, 40);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"materialize": {"max_clips": 10, "extension": "mkv"}}"#).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.materialize.max_clips, 10);
        assert_eq!(config.materialize.extension, "mkv");

        std::fs::write(&path, r#"{"merge": {"clip_length": 0.0}}"#).unwrap();
        assert!(matches!(
            PipelineConfig::from_json_file(&path),
            Err(WorkerError::ConfigError(_))
        ));
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_peak_window_follows_clip_length() {
        assert_eq!(PipelineConfig::default().audio_event_params().peak_window, 8.0);

        let json = r#"{"merge": {"clip_length": 12.0}, "audio": {"peak_count": 5}}"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        let params = config.audio_event_params();
        assert_eq!(params.peak_window, 12.0);
        assert_eq!(params.peak_count, 5);
    }
}
