//! Sliding-window action classification over the whole source.

use std::collections::VecDeque;
use std::path::Path;

use image::RgbImage;
use tracing::{debug, info, warn};

use fclip_media::{FrameReader, FrameRequest, VideoInfo};
use fclip_ml_client::{top_label, ActionClassifier, FrameWindow};
use fclip_models::{DetectedEvent, TimeInterval};

use crate::config::ActionScanConfig;
use crate::error::WorkerResult;

/// Ring of the most recent frames that yields a full window every
/// `stride` frames.
#[derive(Debug)]
pub struct WindowRing {
    frames: VecDeque<RgbImage>,
    window: usize,
    stride: usize,
    seen: u64,
}

impl WindowRing {
    pub fn new(window: usize, stride: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(window.max(1)),
            window: window.max(1),
            stride: stride.max(1),
            seen: 0,
        }
    }

    /// Add the next frame. Returns the first frame index and the frames of
    /// a window when one is due.
    pub fn push(&mut self, frame: RgbImage) -> Option<(u64, Vec<RgbImage>)> {
        if self.frames.len() == self.window {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
        self.seen += 1;

        if self.frames.len() < self.window {
            return None;
        }
        let first = self.seen - self.window as u64;
        if first % self.stride as u64 != 0 {
            return None;
        }
        Some((first, self.frames.iter().cloned().collect()))
    }
}

/// Action event for a classified window, if its top label is confident
/// enough.
pub fn action_event(
    probabilities: &[f32],
    labels: &[String],
    first_frame: u64,
    window: usize,
    fps: f64,
    threshold: f32,
) -> Option<DetectedEvent> {
    let (index, confidence) = top_label(probabilities)?;
    if confidence < threshold || fps <= 0.0 {
        return None;
    }
    let label = labels.get(index)?;
    let interval = TimeInterval::new(
        first_frame as f64 / fps,
        (first_frame + window as u64) as f64 / fps,
    )
    .ok()?;
    Some(DetectedEvent::action(interval, label.clone(), confidence))
}

/// Classify every `stride`-th window of the source.
///
/// A failed classifier call drops that window only.
pub async fn scan_actions(
    input: &Path,
    info: &VideoInfo,
    classifier: &dyn ActionClassifier,
    config: &ActionScanConfig,
) -> WorkerResult<Vec<DetectedEvent>> {
    if !info.is_analysable() {
        return Ok(Vec::new());
    }
    info!(
        path = %input.display(),
        classifier = classifier.name(),
        window = config.window,
        stride = config.stride,
        "Scanning for actions"
    );

    let request = FrameRequest::rgb(config.frame_size, config.frame_size);
    let mut reader = FrameReader::open(input, &request).await?;
    let mut ring = WindowRing::new(config.window, config.stride);
    let mut events = Vec::new();
    let mut failures = 0u64;

    while let Some(frame) = reader.next_frame().await? {
        let Some((first, frames)) = ring.push(frame.into_rgb()?) else {
            continue;
        };
        let window = FrameWindow::new(frames)?;
        match classifier.infer(&window).await {
            Ok(probabilities) => {
                if let Some(event) = action_event(
                    &probabilities,
                    classifier.labels(),
                    first,
                    config.window,
                    info.fps,
                    config.threshold,
                ) {
                    debug!(start = event.start(), "Action window detected");
                    events.push(event);
                }
            }
            Err(e) => {
                failures += 1;
                warn!(first_frame = first, "Classifier failed on scan window: {}", e);
            }
        }
    }
    reader.finish().await?;

    info!(actions = events.len(), failures, "Action scan complete");
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: u8) -> RgbImage {
        RgbImage::from_pixel(4, 4, image::Rgb([value, value, value]))
    }

    #[test]
    fn test_ring_emits_every_stride() {
        let mut ring = WindowRing::new(3, 2);
        let mut starts = Vec::new();
        for i in 0..9u8 {
            if let Some((first, frames)) = ring.push(frame(i)) {
                assert_eq!(frames.len(), 3);
                assert_eq!(frames[0].get_pixel(0, 0).0[0] as u64, first);
                starts.push(first);
            }
        }
        assert_eq!(starts, vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_action_event_threshold() {
        let labels = vec!["idle".to_string(), "fight".to_string()];

        let event = action_event(&[0.1, 0.9], &labels, 50, 10, 25.0, 0.7).unwrap();
        assert_eq!(event.interval.start(), 2.0);
        assert_eq!(event.interval.end(), 2.4);
        let action = event.action.unwrap();
        assert_eq!(action.label, "fight");
        assert!((action.confidence - 0.9).abs() < 1e-6);

        assert!(action_event(&[0.4, 0.6], &labels, 0, 10, 25.0, 0.7).is_none());
        assert!(action_event(&[], &labels, 0, 10, 25.0, 0.7).is_none());
    }
}
