//! Job-level execution: store lifecycle and cancellation around a
//! pipeline run.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use fclip_models::{JobId, JobRecord};
use fclip_queue::JobStore;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::{Pipeline, PipelineOutcome};

/// Default interval between cancellation checks.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Final state of a job run.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub record: JobRecord,
    pub outcome: PipelineOutcome,
}

/// Runs pipelines as tasks and keeps their job records current.
///
/// Cancellation is job-level only: the runner polls the store and aborts
/// the whole task when a cancel was requested. Dropping the task kills any
/// FFmpeg child it owns.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    poll_interval: Duration,
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            poll_interval: CANCEL_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Create the job record if it does not exist yet.
    pub async fn ensure_job(&self, job_id: &JobId) -> WorkerResult<JobRecord> {
        if let Some(record) = self.store.get(job_id).await? {
            return Ok(record);
        }
        let record = JobRecord::new(job_id.clone());
        self.store.create(record.clone()).await?;
        Ok(record)
    }

    /// Run `pipeline` on `input` as job `job_id`.
    pub async fn run(
        &self,
        job_id: &JobId,
        pipeline: Arc<Pipeline>,
        input: PathBuf,
        output_dir: PathBuf,
    ) -> WorkerResult<JobRun> {
        self.run_task(job_id, async move { pipeline.run(&input, &output_dir).await })
            .await
    }

    /// Drive `task` to a terminal job state.
    ///
    /// Returns [`WorkerError::Cancelled`] when the job was cancelled and the
    /// pipeline error when it failed; the record is updated either way.
    pub async fn run_task<F>(&self, job_id: &JobId, task: F) -> WorkerResult<JobRun>
    where
        F: Future<Output = WorkerResult<PipelineOutcome>> + Send + 'static,
    {
        let logger = JobLogger::new(job_id, "job_runner");
        self.ensure_job(job_id).await?;
        self.store.start(job_id).await?;
        logger.log_start("pipeline task");

        let mut handle = tokio::spawn(task);

        let joined = loop {
            tokio::select! {
                joined = &mut handle => break joined,
                _ = tokio::time::sleep(self.poll_interval) => {
                    match self.store.is_cancel_requested(job_id).await {
                        Ok(true) => {
                            handle.abort();
                            self.store.cancel(job_id).await?;
                            metrics::record_pipeline_run("cancelled");
                            logger.log_warning("cancelled on request");
                            return Err(WorkerError::Cancelled);
                        }
                        Ok(false) => {}
                        Err(e) => warn!(job_id = %job_id, "Cancellation check failed: {}", e),
                    }
                }
            }
        };

        let result = joined
            .map_err(|e| WorkerError::job_failed(format!("Pipeline task aborted: {e}")))
            .and_then(|r| r);

        match result {
            Ok(outcome) => {
                let record = self.store.complete(job_id, outcome.clips_produced()).await?;
                metrics::record_pipeline_run(outcome.as_str());
                logger.log_completion(&format!(
                    "{}, {} clips",
                    outcome.as_str(),
                    outcome.clips_produced()
                ));
                Ok(JobRun { record, outcome })
            }
            Err(e) => {
                self.store.fail(job_id, &e.to_string()).await?;
                metrics::record_pipeline_run("failed");
                logger.log_error(&e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fclip_models::JobState;
    use fclip_queue::InMemoryJobStore;

    fn runner() -> JobRunner {
        JobRunner::new(Arc::new(InMemoryJobStore::new())).with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_no_clips_completes_job() {
        let runner = runner();
        let id = JobId::new();
        let run = runner
            .run_task(&id, async { Ok(PipelineOutcome::NoClips) })
            .await
            .unwrap();
        assert_eq!(run.record.state, JobState::Completed);
        assert_eq!(run.record.clips_produced, Some(0));
    }

    #[tokio::test]
    async fn test_pipeline_error_fails_job() {
        let runner = runner();
        let id = JobId::new();
        let result = runner
            .run_task(&id, async { Err(WorkerError::processing_failed("boom")) })
            .await;
        assert!(result.is_err());

        let record = runner.store().get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert!(record.error_message.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_cancel_aborts_running_task() {
        let runner = runner();
        let id = JobId::new();
        runner.ensure_job(&id).await.unwrap();
        runner.store().request_cancel(&id).await.unwrap();

        let result = runner
            .run_task(&id, async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(PipelineOutcome::NoClips)
            })
            .await;
        assert!(matches!(result, Err(WorkerError::Cancelled)));

        let record = runner.store().get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Cancelled);
    }
}
