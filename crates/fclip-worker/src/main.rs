//! Highlight pipeline binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fclip_media::DescriptorKind;
use fclip_ml_client::{MlClient, MlClientConfig};
use fclip_models::JobId;
use fclip_queue::{
    open_store, ChannelProgressSink, FanoutProgressSink, LogProgressSink, ProgressChannel, ProgressSink,
    StoreConfig, StoreProgressSink,
};
use fclip_worker::{JobRunner, Pipeline, PipelineConfig, PipelineOutcome, WorkerError};

/// Extract and rank highlight clips from a long-form video.
#[derive(Debug, Parser)]
#[command(name = "fclip-worker", version)]
struct Args {
    /// Source video
    input: PathBuf,

    /// Directory for clips and the ranking manifest
    output_dir: PathBuf,

    /// JSON pipeline configuration; FCLIP_* variables apply on top
    #[arg(long, env = "FCLIP_CONFIG")]
    config: Option<PathBuf>,

    /// Candidate clip length in seconds
    #[arg(long)]
    clip_length: Option<f64>,

    /// Maximum clips to materialize
    #[arg(long)]
    max_clips: Option<usize>,

    /// Highlights to select
    #[arg(long)]
    top_clip_count: Option<usize>,

    /// Shot detection descriptor (orb or sift)
    #[arg(long)]
    descriptor: Option<DescriptorKind>,

    /// Job id; generated when absent
    #[arg(long)]
    job_id: Option<String>,
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fclip=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.apply_env();

    if let Some(v) = args.clip_length {
        config.merge.clip_length = v;
    }
    if let Some(v) = args.max_clips {
        config.materialize.max_clips = v;
    }
    if let Some(v) = args.top_clip_count {
        config.ranking.top_clip_count = v;
    }
    if let Some(v) = args.descriptor {
        config.shots.params.descriptor = v;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = load_config(&args)?;
    let job_id = args
        .job_id
        .clone()
        .map(JobId::from_string)
        .unwrap_or_default();

    info!(job_id = %job_id, input = %args.input.display(), "Starting fclip-worker");

    let store_config = StoreConfig::from_env();
    let store = open_store(&store_config)?;

    let ml_config = MlClientConfig::from_env();
    let classifier = MlClient::connect(ml_config.clone())
        .await
        .with_context(|| format!("connecting to classifier at {}", ml_config.base_url))?;

    let mut sinks = FanoutProgressSink::new()
        .with(Arc::new(StoreProgressSink::new(Arc::clone(&store), job_id.clone())));
    match &store_config.redis_url {
        Some(url) => {
            let channel = Arc::new(ProgressChannel::new(url)?);
            sinks = sinks.with(Arc::new(ChannelProgressSink::new(channel, job_id.clone())));
        }
        None => sinks = sinks.with(Arc::new(LogProgressSink::new(job_id.clone()))),
    }
    let progress: Arc<dyn ProgressSink> = Arc::new(sinks);

    let pipeline = Arc::new(Pipeline::new(config, Arc::new(classifier), progress, &job_id));
    let runner = JobRunner::new(Arc::clone(&store));
    runner.ensure_job(&job_id).await?;

    // Ctrl-C requests job-level cancellation; the runner aborts the task
    let cancel_store = Arc::clone(&store);
    let cancel_id = job_id.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(job_id = %cancel_id, "Received shutdown signal, cancelling job");
            if let Err(e) = cancel_store.request_cancel(&cancel_id).await {
                error!("Failed to request cancellation: {}", e);
            }
        }
    });

    match runner
        .run(&job_id, pipeline, args.input.clone(), args.output_dir.clone())
        .await
    {
        Ok(run) => {
            match &run.outcome {
                PipelineOutcome::Ranked(ranked) => {
                    for (rank, clip) in ranked.top.iter().enumerate() {
                        info!(
                            rank = rank + 1,
                            score = clip.score,
                            path = %clip.clip.path().display(),
                            "Highlight"
                        );
                    }
                    let summary = args.output_dir.join("highlights.json");
                    tokio::fs::write(&summary, serde_json::to_vec_pretty(ranked)?).await?;
                    info!(path = %summary.display(), "Summary written");
                }
                PipelineOutcome::NoClips => info!("Completed, no clips produced"),
            }
            Ok(())
        }
        Err(WorkerError::Cancelled) => {
            warn!(job_id = %job_id, "Job cancelled");
            Ok(())
        }
        Err(e) => {
            error!(job_id = %job_id, "Job failed: {}", e);
            Err(e.into())
        }
    }
}
