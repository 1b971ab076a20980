//! Stream-copy segment extraction.

use std::path::Path;
use tracing::{debug, info, trace};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Extract `[start_secs, start_secs + duration)` from `input` without re-encoding.
///
/// Success requires both a zero exit status and a non-empty output file.
pub async fn extract_segment(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    start_secs: f64,
    duration: f64,
) -> MediaResult<()> {
    extract_segment_with(&FfmpegRunner::new(), input, output, start_secs, duration).await
}

/// [`extract_segment`] on a caller-configured runner.
pub async fn extract_segment_with(
    runner: &FfmpegRunner,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    start_secs: f64,
    duration: f64,
) -> MediaResult<()> {
    let input = input.as_ref();
    let output = output.as_ref();

    if !input.exists() {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }

    debug!(
        "Extracting segment: {} -> {} (start: {:.2}s, duration: {:.2}s)",
        input.display(),
        output.display(),
        start_secs,
        duration
    );

    let cmd = FfmpegCommand::new(input, output)
        .seek(start_secs)
        .duration(duration)
        .codec_copy();

    let label = output.display().to_string();
    runner
        .run_with_progress(&cmd, move |p| {
            trace!(output = %label, fraction = p.fraction(duration), speed = p.speed, "Extraction progress");
        })
        .await?;
    verify_output(output).await?;

    info!("Segment extracted: {}", output.display());
    Ok(())
}

/// Fail with [`MediaError::MissingOutput`] unless `path` is a non-empty file.
pub async fn verify_output(path: &Path) -> MediaResult<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(MediaError::MissingOutput(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_verify_output() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("clip_1_0.00_8.00.mp4");
        assert!(matches!(
            verify_output(&missing).await,
            Err(MediaError::MissingOutput(_))
        ));

        let empty = dir.path().join("empty.mp4");
        tokio::fs::write(&empty, b"").await.unwrap();
        assert!(verify_output(&empty).await.is_err());

        let written = dir.path().join("written.mp4");
        tokio::fs::write(&written, b"data").await.unwrap();
        assert!(verify_output(&written).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_segment(
            dir.path().join("absent.mp4"),
            dir.path().join("out.mp4"),
            0.0,
            8.0,
        )
        .await
        .unwrap_err();
        assert!(err.is_input_error());
    }
}
