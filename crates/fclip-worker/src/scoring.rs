//! Virality scoring of materialized clips.
//!
//! Each clip is decoded into small RGB frames, a few classifier windows are
//! spread evenly across it, and the per-window top-label probabilities are
//! folded into a composite score together with frame quality and the
//! audio events that support the clip.

use std::sync::Arc;

use futures::future::join_all;
use image::RgbImage;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use fclip_media::{frame_quality, read_frames, FrameRequest};
use fclip_ml_client::{top_label, ActionClassifier, FrameWindow, MlError};
use fclip_models::{MaterializedClip, Modality, ScoreBreakdown, ScoreStatus, ScoredClip};

use crate::config::ScoringConfig;
use crate::metrics;

/// Start frame of each classifier window.
///
/// Uses `min(sub_windows, frame_count / window)` windows (at least one when
/// a single window fits) spread evenly from the first to the last
/// possible start.
pub fn window_starts(frame_count: usize, window: usize, sub_windows: usize) -> Vec<usize> {
    if window == 0 || frame_count < window {
        return Vec::new();
    }
    let count = sub_windows.min(frame_count / window).max(1);
    if count == 1 {
        return vec![0];
    }
    let last = frame_count - window;
    (0..count).map(|i| i * last / (count - 1)).collect()
}

/// Mean, coefficient of variation, and low-confidence count of a
/// confidence series. The variation is 0 when the mean is 0.
pub fn confidence_stats(confidences: &[f64], low_threshold: f64) -> (f64, f64, u32) {
    if confidences.is_empty() {
        return (0.0, 0.0, 0);
    }
    let n = confidences.len() as f64;
    let mean = confidences.iter().sum::<f64>() / n;
    let variance = confidences.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    let variation = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };
    let low = confidences.iter().filter(|c| **c < low_threshold).count() as u32;
    (mean, variation, low)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Composite score terms for a clip from its window confidences and frames.
pub fn score_breakdown(
    clip: &MaterializedClip,
    confidences: &[f64],
    frames: &[RgbImage],
    config: &ScoringConfig,
) -> ScoreBreakdown {
    let (mean_confidence, confidence_variation, low_confidence_count) =
        confidence_stats(confidences, config.low_confidence);
    let quality = match frame_quality(frames) {
        Ok(quality) => quality,
        Err(e) => {
            warn!(clip = %clip.file_name(), "Frame quality unavailable: {}", e);
            None
        }
    };
    let mean_brightness = quality.map(|q| q.mean_brightness).unwrap_or(0.0);
    let mean_blur_penalty = quality.map(|q| q.mean_blur_penalty).unwrap_or(0.0);

    let gunshot_hits = clip.evidence_count(Modality::Gunshot) as u32;
    let laughter_hits = clip.evidence_count(Modality::Laughter) as u32;
    let loud_peak_hits = clip.evidence_count(Modality::LoudPeak) as u32;

    let base_score = config.confidence_weight * mean_confidence
        - config.variation_weight * confidence_variation
        - config.low_confidence_weight * low_confidence_count as f64
        + config.brightness_weight * mean_brightness
        - config.blur_weight * mean_blur_penalty;
    let event_boost = config.gunshot_boost * gunshot_hits as f64
        + config.laughter_boost * laughter_hits as f64
        + config.loud_peak_boost * loud_peak_hits as f64;

    ScoreBreakdown {
        mean_confidence,
        confidence_variation,
        low_confidence_count,
        mean_brightness,
        mean_blur_penalty,
        gunshot_hits,
        laughter_hits,
        loud_peak_hits,
        base_score: round3(base_score),
        event_boost: round3(event_boost),
    }
}

/// Scores clips against an injected action classifier.
pub struct ViralityScorer {
    classifier: Arc<dyn ActionClassifier>,
    config: ScoringConfig,
}

impl ViralityScorer {
    pub fn new(classifier: Arc<dyn ActionClassifier>, config: ScoringConfig) -> Self {
        Self { classifier, config }
    }

    async fn decode(&self, clip: &MaterializedClip) -> Result<Vec<RgbImage>, String> {
        let request = FrameRequest::rgb(self.config.frame_size, self.config.frame_size)
            .max_frames(self.config.max_decode_frames);
        let raw = read_frames(clip.path(), &request)
            .await
            .map_err(|e| e.to_string())?;
        raw.into_iter()
            .map(|f| f.into_rgb().map_err(|e| e.to_string()))
            .collect()
    }

    async fn window_confidences(&self, frames: &[RgbImage]) -> Result<Vec<f64>, MlError> {
        let window = self.config.window_frames;
        let mut confidences = Vec::new();
        for start in window_starts(frames.len(), window, self.config.sub_windows) {
            let input = FrameWindow::new(frames[start..start + window].to_vec())?;
            let probabilities = self.classifier.infer(&input).await?;
            let (_, confidence) = top_label(&probabilities).ok_or_else(|| {
                MlError::InvalidResponse("classifier returned no probabilities".to_string())
            })?;
            confidences.push(confidence as f64);
        }
        Ok(confidences)
    }

    /// Score a clip from frames already decoded from it.
    pub async fn score_frames(&self, clip: MaterializedClip, frames: Vec<RgbImage>) -> ScoredClip {
        if frames.len() < self.config.window_frames {
            debug!(
                clip_index = clip.index,
                frames = frames.len(),
                required = self.config.window_frames,
                "Clip too short for a classifier window"
            );
            let message = format!(
                "{} frames decoded, {} required",
                frames.len(),
                self.config.window_frames
            );
            return ScoredClip::unscored(clip, ScoreStatus::InsufficientFrames, message);
        }

        let confidences = match self.window_confidences(&frames).await {
            Ok(c) => c,
            Err(e) => {
                error!(
                    clip_index = clip.index,
                    path = %clip.path().display(),
                    classifier = self.classifier.name(),
                    "Classifier failed, clip excluded from ranking: {}",
                    e
                );
                return ScoredClip::unscored(clip, ScoreStatus::ClassifierFailed, e.to_string());
            }
        };

        let breakdown = score_breakdown(&clip, &confidences, &frames, &self.config);
        let mut scored = ScoredClip::scored(clip, breakdown);
        scored.score = round3(scored.score);
        debug!(
            clip_index = scored.clip.index,
            score = scored.score,
            windows = confidences.len(),
            "Clip scored"
        );
        scored
    }

    /// Decode and score one clip. Never fails; problems become the
    /// clip's status.
    pub async fn score_clip(&self, clip: MaterializedClip) -> ScoredClip {
        match self.decode(&clip).await {
            Ok(frames) => self.score_frames(clip, frames).await,
            Err(e) => {
                warn!(
                    clip_index = clip.index,
                    path = %clip.path().display(),
                    "Could not decode clip frames: {}",
                    e
                );
                ScoredClip::unscored(clip, ScoreStatus::InsufficientFrames, e)
            }
        }
    }

    /// Score every clip with at most `workers` in flight. Output order
    /// matches input order.
    pub async fn score_all(&self, clips: Vec<MaterializedClip>) -> Vec<ScoredClip> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let total = clips.len();

        let futures = clips.into_iter().map(|clip| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire().await.ok();
                self.score_clip(clip).await
            }
        });
        let scored = join_all(futures).await;

        for clip in &scored {
            metrics::record_clip_scored(clip.status);
        }
        let rankable = scored.iter().filter(|c| c.is_rankable()).count();
        info!(total, rankable, "Scoring complete");
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fclip_ml_client::MlResult;
    use fclip_models::{DetectedEvent, Segment, TimeInterval};
    use image::Rgb;
    use std::path::PathBuf;

    struct FixedClassifier {
        labels: Vec<String>,
        probabilities: Vec<f32>,
        fail: bool,
    }

    impl FixedClassifier {
        fn new(probabilities: Vec<f32>) -> Self {
            Self {
                labels: (0..probabilities.len()).map(|i| format!("class_{i}")).collect(),
                probabilities,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(vec![1.0])
            }
        }
    }

    #[async_trait]
    impl ActionClassifier for FixedClassifier {
        fn labels(&self) -> &[String] {
            &self.labels
        }

        async fn infer(&self, _window: &FrameWindow) -> MlResult<Vec<f32>> {
            if self.fail {
                return Err(MlError::ServiceUnavailable("down".to_string()));
            }
            Ok(self.probabilities.clone())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn clip_with(evidence: Vec<DetectedEvent>) -> MaterializedClip {
        let segment = Segment::anchored(120, 8.0).unwrap();
        MaterializedClip {
            index: 0,
            segment,
            path: PathBuf::from("/nonexistent/clip_1_120.00_128.00.mp4"),
            evidence,
        }
    }

    fn gray_frames(count: usize) -> Vec<RgbImage> {
        vec![RgbImage::from_pixel(64, 64, Rgb([128, 128, 128])); count]
    }

    #[test]
    fn test_window_starts() {
        assert!(window_starts(9, 10, 4).is_empty());
        assert_eq!(window_starts(10, 10, 4), vec![0]);
        assert_eq!(window_starts(25, 10, 4), vec![0, 15]);
        assert_eq!(window_starts(200, 10, 4), vec![0, 63, 126, 190]);
    }

    #[test]
    fn test_confidence_stats() {
        let (mean, cv, low) = confidence_stats(&[0.8, 0.8], 0.5);
        assert!((mean - 0.8).abs() < 1e-12);
        assert_eq!(cv, 0.0);
        assert_eq!(low, 0);

        let (mean, cv, low) = confidence_stats(&[0.2, 0.6], 0.5);
        assert!((mean - 0.4).abs() < 1e-12);
        assert!((cv - 0.5).abs() < 1e-9);
        assert_eq!(low, 1);

        assert_eq!(confidence_stats(&[0.0, 0.0], 0.5), (0.0, 0.0, 2));
    }

    #[test]
    fn test_event_boosts() {
        let events = vec![
            DetectedEvent::new(Modality::Gunshot, TimeInterval::new(121.0, 121.5).unwrap()),
            DetectedEvent::new(Modality::Laughter, TimeInterval::new(125.0, 127.0).unwrap()),
            DetectedEvent::at(Modality::LoudPeak, 120.0).unwrap(),
            DetectedEvent::at(Modality::ShotChange, 122.0).unwrap(),
        ];
        let breakdown = score_breakdown(
            &clip_with(events),
            &[],
            &[],
            &ScoringConfig::default(),
        );
        assert_eq!(breakdown.gunshot_hits, 1);
        assert_eq!(breakdown.laughter_hits, 1);
        assert_eq!(breakdown.loud_peak_hits, 1);
        assert!((breakdown.event_boost - 3.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_composite_score() {
        let scorer = ViralityScorer::new(
            Arc::new(FixedClassifier::new(vec![0.25, 0.75])),
            ScoringConfig::default(),
        );
        let evidence = vec![DetectedEvent::at(Modality::LoudPeak, 124.0).unwrap()];
        let scored = scorer.score_frames(clip_with(evidence), gray_frames(20)).await;

        assert_eq!(scored.status, ScoreStatus::Scored);
        let breakdown = scored.breakdown.clone().unwrap();
        assert!((breakdown.mean_confidence - 0.75).abs() < 1e-9);
        assert_eq!(breakdown.low_confidence_count, 0);
        assert!((breakdown.mean_brightness - 128.0).abs() < 1e-9);
        // Flat frames have zero Laplacian variance
        assert!((breakdown.mean_blur_penalty - 1e5).abs() < 1e-3);
        // 75 + 1.28 - 1000
        assert!((breakdown.base_score - -923.72).abs() < 1e-3);
        assert!((scored.score - -922.72).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_short_clip_is_unscored() {
        let scorer = ViralityScorer::new(
            Arc::new(FixedClassifier::new(vec![1.0])),
            ScoringConfig::default(),
        );
        let scored = scorer.score_frames(clip_with(vec![]), gray_frames(9)).await;
        assert_eq!(scored.status, ScoreStatus::InsufficientFrames);
        assert_eq!(scored.score, 0.0);
        assert!(!scored.is_rankable());
    }

    #[tokio::test]
    async fn test_classifier_failure_is_reported() {
        let scorer = ViralityScorer::new(Arc::new(FixedClassifier::failing()), ScoringConfig::default());
        let scored = scorer.score_frames(clip_with(vec![]), gray_frames(10)).await;
        assert_eq!(scored.status, ScoreStatus::ClassifierFailed);
        assert_eq!(scored.score, 0.0);
        assert!(scored.error.unwrap().contains("down"));
    }

    #[tokio::test]
    async fn test_undecodable_clip_keeps_its_place() {
        let scorer = ViralityScorer::new(
            Arc::new(FixedClassifier::new(vec![1.0])),
            ScoringConfig::default(),
        );
        let clips = vec![clip_with(vec![]), clip_with(vec![])];
        let scored = scorer.score_all(clips).await;
        assert_eq!(scored.len(), 2);
        assert!(scored.iter().all(|c| c.status == ScoreStatus::InsufficientFrames));
    }
}
