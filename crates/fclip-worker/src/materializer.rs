//! Clip materializer: stream-copies accepted segments into their own files.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use fclip_media::{extract_segment_with, AudioSignal, FfmpegRunner, MediaError, MediaResult};
use fclip_models::{clip_file_name, DetectedEvent, MaterializedClip, Segment};

use crate::config::MaterializeConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::merger::evidence_for;
use crate::metrics;

/// Chronological walk keeping segments whose start is at least
/// `min_time_gap` from every accepted start, up to `max_clips`.
pub fn select_segments(segments: &[Segment], min_time_gap: f64, max_clips: usize) -> Vec<Segment> {
    let mut ordered = segments.to_vec();
    ordered.sort_by(|a, b| a.start().total_cmp(&b.start()));

    let mut accepted: Vec<Segment> = Vec::new();
    for segment in ordered {
        if accepted.len() >= max_clips {
            break;
        }
        let too_close = accepted
            .iter()
            .any(|a| (segment.start() - a.start()).abs() < min_time_gap);
        if too_close {
            debug!(start = segment.start(), "Skipping segment near an accepted start");
            continue;
        }
        accepted.push(segment);
    }
    accepted
}

/// Keep the `keep` segments with the highest mean absolute amplitude, then
/// restore chronological order. Equal loudness keeps the earlier segment.
pub fn prefilter_by_loudness(segments: &[Segment], audio: &AudioSignal, keep: usize) -> Vec<Segment> {
    let mut scored: Vec<(f32, Segment)> = segments
        .iter()
        .map(|s| (audio.mean_abs(s.start(), s.end()), *s))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(keep);

    let mut kept: Vec<Segment> = scored.into_iter().map(|(_, s)| s).collect();
    kept.sort_by(|a, b| a.start().total_cmp(&b.start()));
    kept
}

/// Writes the clip file for one segment.
#[async_trait]
pub trait SegmentExtractor: Send + Sync {
    async fn extract(&self, source: &Path, output: &Path, segment: &Segment) -> MediaResult<()>;
}

/// Stream copy through FFmpeg.
pub struct FfmpegExtractor {
    runner: FfmpegRunner,
}

impl FfmpegExtractor {
    pub fn from_config(config: &MaterializeConfig) -> Self {
        let runner = match config.extraction_timeout_secs {
            Some(secs) => FfmpegRunner::new().with_timeout(secs),
            None => FfmpegRunner::new(),
        };
        Self { runner }
    }
}

#[async_trait]
impl SegmentExtractor for FfmpegExtractor {
    async fn extract(&self, source: &Path, output: &Path, segment: &Segment) -> MediaResult<()> {
        extract_segment_with(&self.runner, source, output, segment.start(), segment.duration()).await
    }
}

fn failure_reason(error: &MediaError) -> &'static str {
    match error {
        MediaError::MissingOutput(_) => "missing_output",
        MediaError::FfmpegFailed { .. } => "ffmpeg_failed",
        MediaError::Timeout(_) => "timeout",
        MediaError::FfmpegNotFound => "ffmpeg_not_found",
        _ => "other",
    }
}

/// Extract every accepted segment from `source` into `output_dir` with
/// FFmpeg stream copy.
pub async fn materialize_clips(
    source: &Path,
    segments: &[Segment],
    events: &[DetectedEvent],
    output_dir: &Path,
    config: &MaterializeConfig,
) -> WorkerResult<Vec<MaterializedClip>> {
    let extractor = FfmpegExtractor::from_config(config);
    materialize_clips_with(&extractor, source, segments, events, output_dir, config).await
}

/// Extract every accepted segment through `extractor`.
///
/// At most `config.workers` extractions run at once. A failed extraction
/// is logged and dropped; the rest of the batch continues. The result is
/// in acceptance (chronological) order regardless of which extraction
/// finished first.
pub async fn materialize_clips_with(
    extractor: &dyn SegmentExtractor,
    source: &Path,
    segments: &[Segment],
    events: &[DetectedEvent],
    output_dir: &Path,
    config: &MaterializeConfig,
) -> WorkerResult<Vec<MaterializedClip>> {
    tokio::fs::create_dir_all(output_dir).await?;

    let accepted = select_segments(segments, config.min_time_gap, config.max_clips);
    info!(
        candidates = segments.len(),
        accepted = accepted.len(),
        workers = config.workers,
        "Materializing clips"
    );

    let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));

    let futures: Vec<_> = accepted
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let semaphore = Arc::clone(&semaphore);
            let path = output_dir.join(clip_file_name(index, segment, &config.extension));

            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| WorkerError::processing_failed(format!("Extraction pool closed: {e}")))?;

                extractor.extract(source, &path, segment).await?;

                Ok::<_, WorkerError>(MaterializedClip {
                    index,
                    segment: *segment,
                    path,
                    evidence: evidence_for(segment, events),
                })
            }
        })
        .collect();

    let results = join_all(futures).await;

    let mut clips = Vec::with_capacity(results.len());
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(clip) => {
                metrics::record_clip_materialized();
                clips.push(clip);
            }
            Err(e) => {
                let reason = match &e {
                    WorkerError::Media(media) => failure_reason(media),
                    _ => "other",
                };
                metrics::record_extraction_failure(reason);
                warn!(
                    clip_index = index,
                    start = accepted[index].start(),
                    reason,
                    "Clip extraction failed, dropping candidate: {}",
                    e
                );
            }
        }
    }

    info!(materialized = clips.len(), "Clip materialization complete");
    Ok(clips)
}
