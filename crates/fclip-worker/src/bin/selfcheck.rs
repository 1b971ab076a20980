//! Environment self-check: FFmpeg tools, classifier service and job store.

use std::path::Path;

use fclip_media::{check_ffmpeg, check_ffprobe};
use fclip_ml_client::{MlClient, MlClientConfig};
use fclip_models::{JobId, JobRecord};
use fclip_queue::{open_store, JobStore, StoreConfig};
use fclip_worker::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = PipelineConfig::from_env();
    config.validate()?;
    println!(
        "fclip-selfcheck: starting (clip_length={}s, max_clips={}, top_clip_count={})",
        config.merge.clip_length, config.materialize.max_clips, config.ranking.top_clip_count
    );

    check_ffmpeg().map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    check_ffprobe().map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;
    println!("fclip-selfcheck: ffmpeg and ffprobe found");

    if let Ok(dir) = std::env::var("FCLIP_OUTPUT_DIR") {
        ensure_writable(&dir).await?;
        println!("fclip-selfcheck: output dir {} writable", dir);
    }

    let ml_config = MlClientConfig::from_env();
    let client = MlClient::connect(ml_config.clone())
        .await
        .map_err(|e| anyhow::anyhow!("classifier at {} unreachable: {}", ml_config.base_url, e))?;
    if !client.health_check().await? {
        return Err(anyhow::anyhow!("classifier at {} is unhealthy", ml_config.base_url));
    }
    println!("fclip-selfcheck: classifier ok at {}", ml_config.base_url);

    let store_config = StoreConfig::from_env();
    let store = open_store(&store_config)?;
    check_store_round_trip(store.as_ref()).await?;
    println!("fclip-selfcheck: {} job store ok", store.name());

    println!("fclip-selfcheck: ok");
    Ok(())
}

async fn ensure_writable<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    let probe = path.join(".fclip-selfcheck");
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

async fn check_store_round_trip(store: &dyn JobStore) -> anyhow::Result<()> {
    let id = JobId::from_string(format!("selfcheck-{}", JobId::new()));
    store.create(JobRecord::new(id.clone())).await?;
    store.complete(&id, 0).await?;
    if !store.evict(&id).await? {
        return Err(anyhow::anyhow!("job store did not evict {}", id));
    }
    Ok(())
}
