#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper and signal extraction for highlight detection.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Timeouts, with children killed when their future is dropped
//! - Raw frame decoding and PCM audio extraction over FFmpeg pipes
//! - Stream-copy segment extraction
//! - Motion, audio-event and shot-boundary signal extractors

pub mod audio;
pub mod clip;
pub mod command;
pub mod error;
pub mod frames;
pub mod probe;
pub mod progress;
pub mod signals;

pub use audio::{decode_audio, AudioSignal, ANALYSIS_SAMPLE_RATE};
pub use clip::{extract_segment, extract_segment_with, verify_output};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use frames::{fit_width, read_frames, FrameReader, FrameRequest, FrameSampling, PixelFormat, RawFrame};
pub use probe::{get_duration, probe_video, VideoInfo};
pub use progress::FfmpegProgress;
pub use signals::{
    SignalProgress,
    audio_events::{detect_audio_events, AudioEventParams, AudioEvents},
    features::{DescriptorKind, Descriptors, FeatureExtractor},
    motion::{detect_motion, MotionParams},
    quality::{frame_quality, FrameQuality},
    shots::{detect_shot_boundaries, sample_stride, ShotDetector, ShotParams},
};
