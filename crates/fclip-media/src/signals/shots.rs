//! Shot boundary detection by local feature matching (ORB or SIFT).
//!
//! Sampled frames are decoded in batches. Descriptors for a batch are
//! computed on a bounded rayon pool, then every adjacent pair (including
//! the last frame of the previous batch) is matched in parallel. Only
//! descriptors cross batch boundaries, so memory is bounded by the batch.

use image::GrayImage;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::features::{mean_match_distance, DescriptorKind, Descriptors, FeatureExtractor};
use crate::error::{MediaError, MediaResult};
use crate::frames::{FrameReader, FrameRequest, FrameSampling};
use crate::probe::VideoInfo;

/// Shot detector parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShotParams {
    pub descriptor: DescriptorKind,
    /// Mean match distance above which a pair is a cut
    pub match_threshold: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Descriptor/matching worker threads
    pub workers: usize,
    /// Sampled frames decoded per batch
    pub batch_size: usize,
    /// Keypoints kept per frame
    pub max_features: usize,
}

impl Default for ShotParams {
    fn default() -> Self {
        Self {
            descriptor: DescriptorKind::Orb,
            match_threshold: 30.0,
            frame_width: 320,
            frame_height: 180,
            workers: 8,
            batch_size: 128,
            max_features: 500,
        }
    }
}

/// Sampling stride chosen from the video duration: coarser for longer videos.
pub fn sample_stride(duration_secs: f64) -> u64 {
    if duration_secs <= 3600.0 {
        20
    } else if duration_secs <= 18000.0 {
        30
    } else {
        40
    }
}

/// Descriptor computation and pair matching over a dedicated thread pool.
pub struct ShotDetector {
    pool: ThreadPool,
    extractor: FeatureExtractor,
    threshold: f64,
}

impl ShotDetector {
    pub fn new(params: &ShotParams) -> MediaResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(params.workers.max(1))
            .thread_name(|i| format!("fclip-shots-{i}"))
            .build()
            .map_err(|e| MediaError::internal(format!("Failed to build shot pool: {e}")))?;

        Ok(Self {
            pool,
            extractor: FeatureExtractor::new(params.descriptor).with_max_features(params.max_features),
            threshold: params.match_threshold,
        })
    }

    /// Boundaries within one batch.
    ///
    /// `previous` is the last frame of the preceding batch. Returns the frame
    /// indices that start a new shot and the last frame's descriptors.
    pub fn process_batch(
        &self,
        previous: Option<(u64, Descriptors)>,
        frames: Vec<(u64, GrayImage)>,
    ) -> MediaResult<(Vec<u64>, Option<(u64, Descriptors)>)> {
        let described: Vec<(u64, Descriptors)> = self.pool.install(|| {
            frames
                .par_iter()
                .map(|(index, frame)| Ok((*index, self.extractor.compute(frame)?)))
                .collect::<MediaResult<_>>()
        })?;

        let sequence: Vec<(u64, Descriptors)> = previous.into_iter().chain(described).collect();
        if sequence.len() < 2 {
            return Ok((Vec::new(), sequence.into_iter().last()));
        }

        let threshold = self.threshold;
        let distances: Vec<Option<f64>> = self.pool.install(|| {
            (0..sequence.len() - 1)
                .into_par_iter()
                .map(|k| mean_match_distance(&sequence[k].1, &sequence[k + 1].1))
                .collect::<MediaResult<_>>()
        })?;
        let boundaries = distances
            .into_iter()
            .enumerate()
            .filter(|(_, distance)| distance.is_some_and(|d| d > threshold))
            .map(|(k, _)| sequence[k + 1].0)
            .collect();

        Ok((boundaries, sequence.into_iter().last()))
    }

    /// Boundary frame indices over an in-memory frame sequence.
    pub fn boundaries(&self, frames: Vec<(u64, GrayImage)>) -> MediaResult<Vec<u64>> {
        Ok(self.process_batch(None, frames)?.0)
    }
}

/// Detect shot boundaries, returned as ascending timestamps in seconds.
pub async fn detect_shot_boundaries(
    input: &Path,
    info: &VideoInfo,
    params: &ShotParams,
) -> MediaResult<Vec<f64>> {
    if !info.is_analysable() {
        return Ok(Vec::new());
    }

    let stride = sample_stride(info.duration);
    info!(
        path = %input.display(),
        stride,
        descriptor = %params.descriptor,
        "Detecting shot boundaries"
    );

    let detector = Arc::new(ShotDetector::new(params)?);
    let request = FrameRequest::gray(params.frame_width, params.frame_height)
        .sampling(FrameSampling::EveryNth(stride));
    let mut reader = FrameReader::open(input, &request).await?;

    let batch_size = params.batch_size.max(2);
    let mut batch = Vec::with_capacity(batch_size);
    let mut carry = None;
    let mut boundary_frames = Vec::new();

    loop {
        let next = reader.next_frame().await?;
        let finished = next.is_none();
        if let Some(frame) = next {
            let index = frame.index;
            batch.push((index, frame.into_gray()?));
        }

        if batch.len() >= batch_size || (finished && !batch.is_empty()) {
            let frames = std::mem::take(&mut batch);
            let previous = carry.take();
            let worker = Arc::clone(&detector);
            let (found, last) =
                tokio::task::spawn_blocking(move || worker.process_batch(previous, frames))
                    .await
                    .map_err(|e| MediaError::internal(format!("Shot worker failed: {e}")))??;
            boundary_frames.extend(found);
            carry = last;
        }

        if finished {
            break;
        }
    }
    let sampled = reader.finish().await?;

    let timestamps: Vec<f64> = boundary_frames
        .into_iter()
        .map(|frame| frame as f64 / info.fps)
        .collect();

    debug!(sampled, boundaries = timestamps.len(), "Shot detection complete");
    Ok(timestamps)
}
