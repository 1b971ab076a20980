//! Progress sinks: stage checkpoints reported by the pipeline.

use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fclip_models::{JobId, PipelineStage};

use crate::error::QueueResult;
use crate::store::JobStore;

/// Receiver of `(stage, percent)` checkpoints.
///
/// Reporting never fails the pipeline; sinks log their own delivery errors.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, stage: PipelineStage, percent: u8);
}

/// Progress event published to Redis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub stage: String,
    pub percent: u8,
}

/// Channel for publishing/subscribing to progress events.
pub struct ProgressChannel {
    client: redis::Client,
}

impl ProgressChannel {
    /// Create a new progress channel.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("progress:{}", job_id)
    }

    /// Publish a progress event.
    pub async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.job_id);
        let payload = serde_json::to_string(event)?;

        debug!("Publishing progress event to {}", channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    /// Subscribe to progress events for a job.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> QueueResult<Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(job_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

/// Publishes one job's checkpoints on its Redis channel.
pub struct ChannelProgressSink {
    channel: Arc<ProgressChannel>,
    job_id: JobId,
}

impl ChannelProgressSink {
    pub fn new(channel: Arc<ProgressChannel>, job_id: JobId) -> Self {
        Self { channel, job_id }
    }
}

#[async_trait]
impl ProgressSink for ChannelProgressSink {
    async fn report(&self, stage: PipelineStage, percent: u8) {
        let event = ProgressEvent {
            job_id: self.job_id.clone(),
            stage: stage.as_str().to_string(),
            percent: percent.min(100),
        };
        if let Err(e) = self.channel.publish(&event).await {
            warn!(job_id = %self.job_id, stage = %stage, "Failed to publish progress: {}", e);
        }
    }
}

/// Records checkpoints on the job's store entry.
pub struct StoreProgressSink {
    store: Arc<dyn JobStore>,
    job_id: JobId,
}

impl StoreProgressSink {
    pub fn new(store: Arc<dyn JobStore>, job_id: JobId) -> Self {
        Self { store, job_id }
    }
}

#[async_trait]
impl ProgressSink for StoreProgressSink {
    async fn report(&self, stage: PipelineStage, percent: u8) {
        if let Err(e) = self
            .store
            .record_progress(&self.job_id, stage.as_str(), percent)
            .await
        {
            warn!(job_id = %self.job_id, stage = %stage, "Failed to record progress: {}", e);
        }
    }
}

/// Logs checkpoints only.
pub struct LogProgressSink {
    job_id: JobId,
}

impl LogProgressSink {
    pub fn new(job_id: JobId) -> Self {
        Self { job_id }
    }
}

#[async_trait]
impl ProgressSink for LogProgressSink {
    async fn report(&self, stage: PipelineStage, percent: u8) {
        info!(job_id = %self.job_id, stage = %stage, percent, "Progress");
    }
}

/// Forwards each checkpoint to every inner sink, in order.
#[derive(Default)]
pub struct FanoutProgressSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl ProgressSink for FanoutProgressSink {
    async fn report(&self, stage: PipelineStage, percent: u8) {
        for sink in &self.sinks {
            sink.report(stage, percent).await;
        }
    }
}

/// Keeps every checkpoint in memory.
#[derive(Default)]
pub struct MemoryProgressSink {
    events: Mutex<Vec<(PipelineStage, u8)>>,
}

impl MemoryProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(PipelineStage, u8)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProgressSink for MemoryProgressSink {
    async fn report(&self, stage: PipelineStage, percent: u8) {
        if let Ok(mut events) = self.events.lock() {
            events.push((stage, percent));
        }
    }
}
