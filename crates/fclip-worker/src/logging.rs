//! Structured job logging utilities.
//!
//! Every pipeline log line carries the same `job_id` and `operation`
//! fields so one job's run can be filtered out of interleaved output.

use tracing::{error, info, warn, Span};

use fclip_models::{JobId, PipelineStage};

/// Logs job lifecycle events with consistent fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: &'static str,
}

impl JobLogger {
    /// `operation` names the component, e.g. `highlight_pipeline`.
    pub fn new(job_id: &JobId, operation: &'static str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation,
        }
    }

    pub fn log_start(&self, source: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            source,
            "Job started"
        );
    }

    /// Entry into a pipeline stage, with the percentage reported for it.
    pub fn log_stage(&self, stage: PipelineStage, percent: u8) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            stage = %stage,
            percent,
            "Stage started"
        );
    }

    /// A recoverable condition; the job carries on.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job warning: {}", message
        );
    }

    /// The job is about to be marked failed.
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Span wrapping one whole run; nested events inherit its fields.
    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, operation = self.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "highlight_pipeline");

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.operation(), "highlight_pipeline");
    }
}
