//! Stage-synchronous highlight pipeline.
//!
//! Stages run strictly in order, each completing before the next starts:
//! signal extraction, merging, materialization, scoring and ranking. The
//! progress sink hears about every stage on entry.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, Instrument};

use fclip_media::{
    decode_audio, detect_audio_events, detect_motion, detect_shot_boundaries, probe_video, AudioSignal,
    VideoInfo,
};
use fclip_ml_client::ActionClassifier;
use fclip_models::{JobId, PipelineStage};
use fclip_queue::ProgressSink;

use crate::action_scan::scan_actions;
use crate::config::PipelineConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::materializer::{materialize_clips, prefilter_by_loudness};
use crate::merger::{collect_events, peak_segments, segment_clips, Signals};
use crate::metrics;
use crate::ranking::{finalize_ranking, RankedHighlights};
use crate::scoring::ViralityScorer;

/// How a pipeline run ended. Both variants are successful completions.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Ranked(RankedHighlights),
    /// No modality produced a usable candidate
    NoClips,
}

impl PipelineOutcome {
    /// Number of selected highlight clips.
    pub fn clips_produced(&self) -> u32 {
        match self {
            PipelineOutcome::Ranked(r) => r.top.len() as u32,
            PipelineOutcome::NoClips => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineOutcome::Ranked(_) => "ranked",
            PipelineOutcome::NoClips => "no_clips",
        }
    }
}

/// Highlight pipeline over one source video.
pub struct Pipeline {
    config: PipelineConfig,
    classifier: Arc<dyn ActionClassifier>,
    progress: Arc<dyn ProgressSink>,
    logger: JobLogger,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        classifier: Arc<dyn ActionClassifier>,
        progress: Arc<dyn ProgressSink>,
        job_id: &JobId,
    ) -> Self {
        Self {
            config,
            classifier,
            progress,
            logger: JobLogger::new(job_id, "highlight_pipeline"),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    async fn enter(&self, stage: PipelineStage) -> Instant {
        let percent = stage.entry_percent();
        self.logger.log_stage(stage, percent);
        self.progress.report(stage, percent).await;
        Instant::now()
    }

    fn leave(&self, stage: PipelineStage, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_stage_duration(stage, elapsed);
        debug!(job_id = %self.logger.job_id(), stage = %stage, elapsed, "Stage finished");
    }

    /// Turn a recoverable media failure into an empty result.
    fn recover<T: Default, E: Into<WorkerError>>(&self, stage: PipelineStage, result: Result<T, E>) -> WorkerResult<T> {
        let result: WorkerResult<T> = result.map_err(Into::into);
        match result {
            Ok(value) => Ok(value),
            Err(e) if e.is_recoverable_media() => {
                self.logger
                    .log_warning(&format!("{} produced no signal: {}", stage, e));
                Ok(T::default())
            }
            Err(e) => Err(e),
        }
    }

    async fn probe(&self, input: &Path) -> WorkerResult<Option<VideoInfo>> {
        match probe_video(input).await {
            Ok(info) => {
                if !info.is_analysable() {
                    self.logger.log_warning(&format!(
                        "Source is not analysable: {:.3}s, {} frames",
                        info.duration, info.frame_count
                    ));
                }
                Ok(Some(info))
            }
            Err(e) => {
                let e = WorkerError::from(e);
                if e.is_recoverable_media() {
                    self.logger.log_warning(&format!("Cannot probe source: {}", e));
                    Ok(None)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Run every signal extractor. The decoded audio is returned for the
    /// loudness pre-filter.
    async fn extract_signals(
        &self,
        input: &Path,
        info: Option<&VideoInfo>,
    ) -> WorkerResult<(Signals, Option<AudioSignal>)> {
        let mut signals = Signals::default();

        let stage = PipelineStage::DetectingMotion;
        let started = self.enter(stage).await;
        if let (true, Some(info)) = (self.config.motion.enabled, info) {
            let report = |current: u64, total: u64| {
                debug!(current, total, "Motion windows analysed");
            };
            let result = detect_motion(input, info, &self.config.motion.params, &report).await;
            signals.motion = self.recover(stage, result)?;
        }
        self.leave(stage, started);

        let stage = PipelineStage::AnalyzingAudio;
        let started = self.enter(stage).await;
        let mut audio = None;
        if let (true, Some(info)) = (self.config.audio.enabled, info) {
            let decoded = decode_audio(input, info.has_audio, self.config.audio.sample_rate)
                .await
                .map(Some);
            audio = self.recover(stage, decoded)?;
            if let Some(signal) = &audio {
                signals.audio = detect_audio_events(signal, &self.config.audio_event_params());
            }
        }
        self.leave(stage, started);

        let stage = PipelineStage::DetectingShots;
        let started = self.enter(stage).await;
        if let (true, Some(info)) = (self.config.shots.enabled, info) {
            let result = detect_shot_boundaries(input, info, &self.config.shots.params).await;
            signals.shot_boundaries = self.recover(stage, result)?;
        }
        self.leave(stage, started);

        let stage = PipelineStage::ScanningActions;
        let started = self.enter(stage).await;
        if let (true, Some(info)) = (self.config.action_scan.enabled, info) {
            match scan_actions(input, info, self.classifier.as_ref(), &self.config.action_scan).await {
                Ok(actions) => signals.actions = actions,
                Err(e) => self
                    .logger
                    .log_warning(&format!("Action scan abandoned: {}", e)),
            }
        }
        self.leave(stage, started);

        info!(
            job_id = %self.logger.job_id(),
            motion_windows = signals.motion.len(),
            gunshots = signals.audio.gunshots.len(),
            laughter = signals.audio.laughter.len(),
            loud_peaks = signals.audio.loud_peaks.len(),
            shot_boundaries = signals.shot_boundaries.len(),
            actions = signals.actions.len(),
            "Signal extraction complete"
        );
        Ok((signals, audio))
    }

    async fn finish(&self, outcome: PipelineOutcome) -> WorkerResult<PipelineOutcome> {
        self.enter(PipelineStage::Complete).await;
        match &outcome {
            PipelineOutcome::Ranked(r) => self.logger.log_completion(&format!(
                "{} clips ranked, {} selected",
                r.ranked.len(),
                r.top.len()
            )),
            PipelineOutcome::NoClips => self.logger.log_completion("no clips produced"),
        }
        Ok(outcome)
    }

    /// Run the full pipeline on `input`, writing clips and the manifest
    /// under `output_dir`.
    pub async fn run(&self, input: &Path, output_dir: &Path) -> WorkerResult<PipelineOutcome> {
        self.run_stages(input, output_dir)
            .instrument(self.logger.span())
            .await
    }

    async fn run_stages(&self, input: &Path, output_dir: &Path) -> WorkerResult<PipelineOutcome> {
        self.logger.log_start(&input.display().to_string());
        tokio::fs::create_dir_all(output_dir).await?;

        let info = self.probe(input).await?;
        let (signals, audio) = self.extract_signals(input, info.as_ref()).await?;

        let stage = PipelineStage::SegmentingClips;
        let started = self.enter(stage).await;
        let events = collect_events(
            &signals,
            self.config.motion.params.segment_duration,
            self.config.merge.motion_max_windows,
        );
        let mut segments = segment_clips(&events, self.config.merge.clip_length);
        if segments.is_empty() {
            segments = peak_segments(&events, self.config.merge.clip_length);
            if !segments.is_empty() {
                self.logger.log_warning(&format!(
                    "No motion, audio-event or shot signal; falling back to {} loud peaks",
                    segments.len()
                ));
            }
        }
        self.leave(stage, started);
        if segments.is_empty() {
            self.logger.log_warning("No signal detected");
            return self.finish(PipelineOutcome::NoClips).await;
        }

        let stage = PipelineStage::MaterializingClips;
        let started = self.enter(stage).await;
        let materialize = &self.config.materialize;
        if let (true, Some(signal)) = (materialize.prefilter_by_loudness, &audio) {
            segments = prefilter_by_loudness(&segments, signal, materialize.max_clips);
        }
        let clips_dir = output_dir.join(&materialize.clips_dir);
        let clips = materialize_clips(input, &segments, &events, &clips_dir, materialize).await?;
        self.leave(stage, started);
        if clips.is_empty() {
            self.logger.log_warning("Every clip extraction failed");
            return self.finish(PipelineOutcome::NoClips).await;
        }

        let stage = PipelineStage::RankingVirality;
        let started = self.enter(stage).await;
        let scorer = ViralityScorer::new(Arc::clone(&self.classifier), self.config.scoring.clone());
        let scored = scorer.score_all(clips).await;
        let ranked = finalize_ranking(scored, output_dir, &self.config.ranking).await?;
        self.leave(stage, started);

        self.finish(PipelineOutcome::Ranked(ranked)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fclip_ml_client::{FrameWindow, MlResult};
    use fclip_queue::MemoryProgressSink;

    struct NullClassifier(Vec<String>);

    #[async_trait]
    impl ActionClassifier for NullClassifier {
        fn labels(&self) -> &[String] {
            &self.0
        }

        async fn infer(&self, _window: &FrameWindow) -> MlResult<Vec<f32>> {
            Ok(vec![1.0])
        }

        fn name(&self) -> &'static str {
            "null"
        }
    }

    #[tokio::test]
    async fn test_unreadable_source_completes_without_clips() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemoryProgressSink::new());
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            Arc::new(NullClassifier(vec!["idle".to_string()])),
            sink.clone(),
            &JobId::new(),
        );

        let outcome = pipeline
            .run(&dir.path().join("missing.mp4"), &dir.path().join("out"))
            .await
            .unwrap();
        assert!(matches!(outcome, PipelineOutcome::NoClips));
        assert_eq!(outcome.clips_produced(), 0);

        // Every stage up to merging reports, then completion
        let stages: Vec<PipelineStage> = sink.events().into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            stages,
            vec![
                PipelineStage::DetectingMotion,
                PipelineStage::AnalyzingAudio,
                PipelineStage::DetectingShots,
                PipelineStage::ScanningActions,
                PipelineStage::SegmentingClips,
                PipelineStage::Complete,
            ]
        );
        assert_eq!(sink.events().last().unwrap().1, 100);
    }
}
