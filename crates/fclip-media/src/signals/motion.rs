//! Windowed frame-difference motion detection.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

#[cfg(feature = "opencv")]
use opencv::{
    core::{self, Mat, Size},
    imgproc,
    prelude::*,
};

use super::SignalProgress;
#[cfg(feature = "opencv")]
use crate::error::MediaError;
use crate::error::MediaResult;
use crate::frames::{fit_width, FrameReader, FrameRequest, FrameSampling};
use crate::probe::VideoInfo;

/// Motion detector parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionParams {
    /// Length of each counting window in seconds
    pub segment_duration: f64,
    /// Sampling rate floor; every `floor(fps / fps_threshold)`-th frame is read
    pub fps_threshold: f64,
    /// Mean absolute gray difference above which a frame pair counts as motion
    pub diff_threshold: f64,
    /// Odd Gaussian kernel size applied before differencing; 0 disables
    pub blur_kernel: u32,
    /// Decode width; height follows the source aspect ratio
    pub analysis_width: u32,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            segment_duration: 60.0,
            fps_threshold: 10.0,
            diff_threshold: 10.0,
            blur_kernel: 5,
            analysis_width: 320,
        }
    }
}

/// Frame sampling interval for a source frame rate.
pub fn frame_skip(fps: f64, fps_threshold: f64) -> u64 {
    if fps_threshold <= 0.0 || !fps.is_finite() {
        return 1;
    }
    ((fps / fps_threshold).floor() as u64).max(1)
}

/// Number of whole `segment_duration` windows in the source. A trailing
/// partial window is not analysed.
pub fn full_windows(duration: f64, segment_duration: f64) -> u64 {
    if segment_duration <= 0.0 || !duration.is_finite() {
        return 0;
    }
    (duration / segment_duration).floor().max(0.0) as u64
}

/// Smoothed frame ready for differencing.
#[cfg(feature = "opencv")]
type Smoothed = Mat;
#[cfg(not(feature = "opencv"))]
type Smoothed = GrayImage;

#[cfg(feature = "opencv")]
fn smooth(frame: &GrayImage, kernel: u32) -> MediaResult<Smoothed> {
    let src = super::cv::gray_mat(frame)?;
    if kernel == 0 {
        return Ok(src);
    }
    let k = (kernel | 1) as i32;
    let mut blurred = Mat::default();
    imgproc::gaussian_blur_def(&src, &mut blurred, Size::new(k, k), 0.0)
        .map_err(|e| MediaError::detection_failed(format!("motion blur: {e}")))?;
    Ok(blurred)
}

#[cfg(feature = "opencv")]
fn difference(a: &Smoothed, b: &Smoothed) -> MediaResult<f64> {
    let mut diff = Mat::default();
    core::absdiff(a, b, &mut diff)
        .map_err(|e| MediaError::detection_failed(format!("motion absdiff: {e}")))?;
    let mean = core::mean_def(&diff)
        .map_err(|e| MediaError::detection_failed(format!("motion mean: {e}")))?;
    Ok(mean[0])
}

#[cfg(not(feature = "opencv"))]
fn smooth(frame: &GrayImage, kernel: u32) -> MediaResult<Smoothed> {
    if kernel == 0 {
        return Ok(frame.clone());
    }
    // Sigma OpenCV derives for a kernel of this size
    let sigma = 0.3 * ((kernel | 1) as f32 - 1.0) * 0.5 - 0.3 + 0.8;
    Ok(image::imageops::blur(frame, sigma))
}

#[cfg(not(feature = "opencv"))]
fn difference(a: &Smoothed, b: &Smoothed) -> MediaResult<f64> {
    let pixels = a.as_raw().len().min(b.as_raw().len());
    if pixels == 0 {
        return Ok(0.0);
    }
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(x, y)| x.abs_diff(*y) as u64)
        .sum();
    Ok(total as f64 / pixels as f64)
}

/// Mean absolute per-pixel difference of two equally sized frames.
pub fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> MediaResult<f64> {
    difference(&smooth(a, 0)?, &smooth(b, 0)?)
}

/// Per-window motion counter fed with sampled frames in decode order.
pub struct MotionAccumulator {
    frames_per_window: f64,
    total_windows: u64,
    diff_threshold: f64,
    blur_kernel: u32,
    previous: Option<Smoothed>,
    counts: BTreeMap<u64, u32>,
}

impl MotionAccumulator {
    pub fn new(fps: f64, total_windows: u64, params: &MotionParams) -> Self {
        Self {
            frames_per_window: (params.segment_duration * fps).max(1.0),
            total_windows,
            diff_threshold: params.diff_threshold,
            blur_kernel: params.blur_kernel,
            previous: None,
            counts: BTreeMap::new(),
        }
    }

    /// Window that a source frame falls into.
    pub fn window_of(&self, frame_index: u64) -> u64 {
        (frame_index as f64 / self.frames_per_window).floor() as u64
    }

    /// Add the next sampled frame. Returns its window index, or `None`
    /// once the frame lies past the last whole window.
    pub fn push(&mut self, frame_index: u64, frame: &GrayImage) -> MediaResult<Option<u64>> {
        let window = self.window_of(frame_index);
        if window >= self.total_windows {
            return Ok(None);
        }
        let smoothed = smooth(frame, self.blur_kernel)?;

        if let Some(previous) = &self.previous {
            if difference(previous, &smoothed)? > self.diff_threshold {
                *self.counts.entry(window).or_insert(0) += 1;
            }
        }
        self.previous = Some(smoothed);
        Ok(Some(window))
    }

    /// Window index to motion count; windows without motion are absent.
    pub fn finish(self) -> BTreeMap<u64, u32> {
        self.counts
    }
}

/// Count motion events per `segment_duration` window.
///
/// Sources shorter than one window produce an empty map.
pub async fn detect_motion(
    input: &Path,
    info: &VideoInfo,
    params: &MotionParams,
    progress: SignalProgress<'_>,
) -> MediaResult<BTreeMap<u64, u32>> {
    let total_windows = full_windows(info.duration, params.segment_duration);
    if !info.is_analysable() || total_windows == 0 {
        progress(0, 0);
        return Ok(BTreeMap::new());
    }

    let skip = frame_skip(info.fps, params.fps_threshold);
    let (width, height) = fit_width(info.width, info.height, params.analysis_width);

    info!(
        path = %input.display(),
        total_windows,
        frame_skip = skip,
        "Analyzing motion"
    );

    let request = FrameRequest::gray(width, height).sampling(FrameSampling::EveryNth(skip));
    let mut reader = FrameReader::open(input, &request).await?;
    let mut accumulator = MotionAccumulator::new(info.fps, total_windows, params);
    let mut current_window = None;

    while let Some(frame) = reader.next_frame().await? {
        let index = frame.index;
        let gray = frame.into_gray()?;
        let Some(window) = accumulator.push(index, &gray)? else {
            // Rest of the source is a partial window
            break;
        };
        if current_window != Some(window) {
            current_window = Some(window);
            progress(window, total_windows);
        }
    }
    let frames = reader.finish().await?;

    let counts = accumulator.finish();
    progress(total_windows, total_windows);
    debug!(frames, windows_with_motion = counts.len(), "Motion analysis complete");
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::sync::Mutex;

    fn flat(value: u8) -> GrayImage {
        GrayImage::from_pixel(32, 18, Luma([value]))
    }

    #[test]
    fn test_frame_skip() {
        assert_eq!(frame_skip(30.0, 10.0), 3);
        assert_eq!(frame_skip(29.97, 10.0), 2);
        assert_eq!(frame_skip(5.0, 10.0), 1);
        assert_eq!(frame_skip(60.0, 0.0), 1);
    }

    #[test]
    fn test_full_windows_ignore_the_remainder() {
        assert_eq!(full_windows(600.0, 60.0), 10);
        assert_eq!(full_windows(659.9, 60.0), 10);
        assert_eq!(full_windows(45.0, 60.0), 0);
        assert_eq!(full_windows(100.0, 0.0), 0);
    }

    #[test]
    fn test_mean_abs_diff() {
        assert_eq!(mean_abs_diff(&flat(10), &flat(10)).unwrap(), 0.0);
        assert_eq!(mean_abs_diff(&flat(10), &flat(40)).unwrap(), 30.0);
        assert_eq!(mean_abs_diff(&flat(200), &flat(150)).unwrap(), 50.0);
    }

    #[test]
    fn test_accumulator_counts_per_window() {
        let params = MotionParams {
            segment_duration: 10.0,
            ..Default::default()
        };
        // 1 fps: window 0 is frames 0..10, window 1 is frames 10..20
        let mut acc = MotionAccumulator::new(1.0, 3, &params);
        acc.push(0, &flat(0)).unwrap();
        acc.push(3, &flat(100)).unwrap(); // motion in window 0
        acc.push(6, &flat(100)).unwrap(); // static
        acc.push(12, &flat(0)).unwrap(); // motion in window 1
        acc.push(15, &flat(50)).unwrap(); // motion in window 1
        acc.push(25, &flat(55)).unwrap(); // below threshold in window 2

        let counts = acc.finish();
        assert_eq!(counts.get(&0), Some(&1));
        assert_eq!(counts.get(&1), Some(&2));
        assert_eq!(counts.get(&2), None);
    }

    #[test]
    fn test_trailing_partial_window_is_not_counted() {
        let params = MotionParams {
            segment_duration: 10.0,
            ..Default::default()
        };
        // 25 s at 1 fps: two whole windows, motion only in frames 20..25
        let mut acc = MotionAccumulator::new(1.0, full_windows(25.0, 10.0), &params);
        for i in 0..20 {
            assert!(acc.push(i, &flat(0)).unwrap().is_some());
        }
        for i in 20..25 {
            let value = if i % 2 == 0 { 0 } else { 200 };
            assert_eq!(acc.push(i, &flat(value)).unwrap(), None);
        }
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn test_static_frames_have_no_motion() {
        let mut acc = MotionAccumulator::new(30.0, 1, &MotionParams::default());
        for i in 0..50 {
            acc.push(i * 3, &flat(0)).unwrap();
        }
        assert!(acc.finish().is_empty());
    }

    #[tokio::test]
    async fn test_zero_duration_is_empty() {
        let info = VideoInfo {
            duration: 0.0,
            width: 640,
            height: 360,
            fps: 30.0,
            frame_count: 0,
            codec: "h264".to_string(),
            has_audio: false,
            size: 0,
        };
        let calls = Mutex::new(Vec::new());
        let progress = |current: u64, total: u64| calls.lock().unwrap().push((current, total));
        let counts = detect_motion(Path::new("missing.mp4"), &info, &MotionParams::default(), &progress)
            .await
            .unwrap();
        assert!(counts.is_empty());
        assert_eq!(calls.into_inner().unwrap(), vec![(0, 0)]);
    }

    #[tokio::test]
    async fn test_source_shorter_than_one_window_is_empty() {
        let info = VideoInfo {
            duration: 45.0,
            width: 640,
            height: 360,
            fps: 30.0,
            frame_count: 1350,
            codec: "h264".to_string(),
            has_audio: false,
            size: 1024,
        };
        let progress = |_: u64, _: u64| {};
        let counts = detect_motion(Path::new("missing.mp4"), &info, &MotionParams::default(), &progress)
            .await
            .unwrap();
        assert!(counts.is_empty());
    }
}
