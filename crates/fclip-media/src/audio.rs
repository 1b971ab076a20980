//! Mono PCM audio extraction.

use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Sample rate used for audio event analysis.
pub const ANALYSIS_SAMPLE_RATE: u32 = 22050;

/// Decoded mono audio.
#[derive(Debug, Clone, Default)]
pub struct AudioSignal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioSignal {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() || self.sample_rate == 0
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Samples covering `[start, end)` seconds, clamped to the signal.
    pub fn slice(&self, start: f64, end: f64) -> &[f32] {
        let sr = self.sample_rate as f64;
        let len = self.samples.len();
        let from = ((start.max(0.0) * sr) as usize).min(len);
        let to = ((end.max(0.0) * sr) as usize).min(len);
        if from >= to {
            return &[];
        }
        &self.samples[from..to]
    }

    /// Mean absolute amplitude over `[start, end)`; zero when empty.
    pub fn mean_abs(&self, start: f64, end: f64) -> f32 {
        let window = self.slice(start, end);
        if window.is_empty() {
            return 0.0;
        }
        window.iter().map(|s| s.abs()).sum::<f32>() / window.len() as f32
    }
}

/// Extract audio from `input` to raw mono f32le PCM at `sample_rate`.
pub async fn extract_pcm(input: &Path, output: &Path, sample_rate: u32) -> MediaResult<()> {
    debug!(
        input = %input.display(),
        output = %output.display(),
        sample_rate,
        "Extracting audio"
    );

    let cmd = FfmpegCommand::new(input, output)
        .no_video()
        .mono_audio(sample_rate)
        .format("f32le");

    FfmpegRunner::new().run(&cmd).await?;

    let metadata = tokio::fs::metadata(output)
        .await
        .map_err(|_| MediaError::MissingOutput(output.to_path_buf()))?;
    if metadata.len() == 0 {
        return Err(MediaError::MissingOutput(output.to_path_buf()));
    }

    debug!(output_size = metadata.len(), "Audio extraction complete");
    Ok(())
}

/// Load raw f32le samples from a file.
pub async fn load_pcm(path: &Path, sample_rate: u32) -> MediaResult<AudioSignal> {
    let bytes = tokio::fs::read(path).await?;
    Ok(AudioSignal::new(samples_from_le_bytes(&bytes), sample_rate))
}

fn samples_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Decode the audio track of `input` into memory.
///
/// Returns [`MediaError::NoAudioStream`] when `has_audio` is false, so the
/// caller can treat it as an input problem rather than a tool failure.
pub async fn decode_audio(input: &Path, has_audio: bool, sample_rate: u32) -> MediaResult<AudioSignal> {
    if !has_audio {
        return Err(MediaError::NoAudioStream(input.to_path_buf()));
    }

    let temp = NamedTempFile::new()?;
    extract_pcm(input, temp.path(), sample_rate).await?;
    let signal = load_pcm(temp.path(), sample_rate).await?;

    debug!(
        input = %input.display(),
        samples = signal.samples.len(),
        duration = signal.duration(),
        "Audio decoded"
    );
    Ok(signal)
}
