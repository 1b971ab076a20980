//! Job store: job ID to job state, with lifecycle `create → update → terminal → evict`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use fclip_models::{JobId, JobRecord};

use crate::error::{QueueError, QueueResult};

/// Retention of job records in Redis (24 hours).
pub const JOB_TTL_SECS: u64 = 86_400;

/// Optimistic-lock attempts before giving up on a Redis update.
const MAX_UPDATE_ATTEMPTS: usize = 5;

/// In-place edit of a job record.
pub type JobEdit<'a> = &'a (dyn Fn(&mut JobRecord) + Send + Sync);

/// Store of job records.
///
/// Implementations apply [`JobStore::modify`] atomically with respect to
/// other writers, so a cancellation request is never lost to a concurrent
/// progress update.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record. Fails if the ID is taken.
    async fn create(&self, record: JobRecord) -> QueueResult<()>;

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Apply `edit` to the stored record and return the result.
    async fn modify(&self, id: &JobId, edit: JobEdit<'_>) -> QueueResult<JobRecord>;

    /// Remove a record without checking its state.
    async fn remove(&self, id: &JobId) -> QueueResult<bool>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;

    async fn record_progress(&self, id: &JobId, stage: &str, percent: u8) -> QueueResult<JobRecord> {
        self.modify(id, &|job| job.record_progress(stage, percent)).await
    }

    async fn start(&self, id: &JobId) -> QueueResult<JobRecord> {
        self.modify(id, &|job| job.start()).await
    }

    async fn complete(&self, id: &JobId, clips_produced: u32) -> QueueResult<JobRecord> {
        self.modify(id, &|job| job.complete(clips_produced)).await
    }

    async fn fail(&self, id: &JobId, error: &str) -> QueueResult<JobRecord> {
        self.modify(id, &|job| job.fail(error)).await
    }

    async fn cancel(&self, id: &JobId) -> QueueResult<JobRecord> {
        self.modify(id, &|job| job.cancel()).await
    }

    /// Ask the runner to abandon the job. No effect on terminal jobs.
    async fn request_cancel(&self, id: &JobId) -> QueueResult<JobRecord> {
        self.modify(id, &|job| {
            if !job.state.is_terminal() {
                job.cancel_requested = true;
            }
        })
        .await
    }

    async fn is_cancel_requested(&self, id: &JobId) -> QueueResult<bool> {
        Ok(self
            .get(id)
            .await?
            .map(|job| job.cancel_requested)
            .unwrap_or(false))
    }

    /// Drop a terminal record. Returns whether anything was removed.
    async fn evict(&self, id: &JobId) -> QueueResult<bool> {
        match self.get(id).await? {
            None => Ok(false),
            Some(job) if !job.state.is_terminal() => Err(QueueError::JobActive(id.to_string())),
            Some(_) => self.remove(id).await,
        }
    }
}

/// Process-local store.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, record: JobRecord) -> QueueResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&record.id) {
            return Err(QueueError::JobExists(record.id.to_string()));
        }
        jobs.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn modify(&self, id: &JobId, edit: JobEdit<'_>) -> QueueResult<JobRecord> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or_else(|| QueueError::not_found(id))?;
        edit(job);
        Ok(job.clone())
    }

    async fn remove(&self, id: &JobId) -> QueueResult<bool> {
        Ok(self.jobs.write().await.remove(id).is_some())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Redis-backed store. Records are JSON strings under `fclip:job:<id>`.
pub struct RedisJobStore {
    client: redis::Client,
    ttl: Duration,
}

impl RedisJobStore {
    pub fn new(redis_url: &str, ttl: Duration) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client, ttl })
    }

    fn key(id: &JobId) -> String {
        format!("fclip:job:{}", id)
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, record: JobRecord) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&record)?;

        // SET NX EX: only the first writer wins
        let created: Option<String> = redis::cmd("SET")
            .arg(Self::key(&record.id))
            .arg(payload)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await?;

        if created.is_none() {
            return Err(QueueError::JobExists(record.id.to_string()));
        }
        debug!(job_id = %record.id, "Created job record");
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(Self::key(id)).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(QueueError::from))
            .transpose()
    }

    async fn modify(&self, id: &JobId, edit: JobEdit<'_>) -> QueueResult<JobRecord> {
        // WATCH is connection-scoped, so this needs its own connection
        let mut conn = self.connection().await?;
        let key = Self::key(id);

        for attempt in 0..MAX_UPDATE_ATTEMPTS {
            redis::cmd("WATCH").arg(&key).query_async::<()>(&mut conn).await?;

            let raw: Option<String> = conn.get(&key).await?;
            let Some(raw) = raw else {
                redis::cmd("UNWATCH").query_async::<()>(&mut conn).await?;
                return Err(QueueError::not_found(id));
            };

            let mut record: JobRecord = serde_json::from_str(&raw)?;
            edit(&mut record);
            let payload = serde_json::to_string(&record)?;

            let committed: Option<()> = redis::pipe()
                .atomic()
                .set_ex(&key, payload, self.ttl.as_secs())
                .ignore()
                .query_async(&mut conn)
                .await?;

            if committed.is_some() {
                return Ok(record);
            }
            debug!(job_id = %id, attempt, "Job record changed during update, retrying");
        }

        warn!(job_id = %id, "Giving up on contended job update");
        Err(QueueError::Conflict(id.to_string()))
    }

    async fn remove(&self, id: &JobId) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let removed: u64 = conn.del(Self::key(id)).await?;
        Ok(removed > 0)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Store selection.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Redis URL; `None` selects the in-memory store
    pub redis_url: Option<String>,
    pub job_ttl: Option<Duration>,
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            job_ttl: std::env::var("FCLIP_JOB_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
        }
    }
}

/// Open the store described by `config`.
pub fn open_store(config: &StoreConfig) -> QueueResult<Arc<dyn JobStore>> {
    match &config.redis_url {
        Some(url) => {
            let ttl = config.job_ttl.unwrap_or(Duration::from_secs(JOB_TTL_SECS));
            let store = RedisJobStore::new(url, ttl)?;
            info!("Using Redis job store");
            Ok(Arc::new(store))
        }
        None => {
            info!("Using in-memory job store");
            Ok(Arc::new(InMemoryJobStore::new()))
        }
    }
}
