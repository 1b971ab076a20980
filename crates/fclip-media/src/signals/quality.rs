//! Per-frame brightness and sharpness measures used by clip scoring.

use image::{imageops, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

#[cfg(feature = "opencv")]
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};

#[cfg(feature = "opencv")]
use crate::error::MediaError;
use crate::error::MediaResult;

/// Added to the Laplacian variance before inverting it.
const BLUR_EPSILON: f64 = 1e-5;

/// Aggregate quality of a frame sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameQuality {
    /// Mean gray level over all frames, 0-255
    pub mean_brightness: f64,
    /// Mean of `1 / (laplacian_variance + 1e-5)`; larger means blurrier
    pub mean_blur_penalty: f64,
}

/// Mean gray level and variance of the 4-neighbour Laplacian.
#[cfg(feature = "opencv")]
pub fn gray_stats(gray: &GrayImage) -> MediaResult<(f64, f64)> {
    if gray.width() == 0 || gray.height() == 0 {
        return Ok((0.0, 0.0));
    }
    let src = super::cv::gray_mat(gray)?;
    let brightness = core::mean_def(&src)
        .map_err(|e| MediaError::detection_failed(format!("quality mean: {e}")))?[0];

    let mut laplacian = Mat::default();
    imgproc::laplacian_def(&src, &mut laplacian, core::CV_64F)
        .map_err(|e| MediaError::detection_failed(format!("quality laplacian: {e}")))?;
    let mut mean = Mat::default();
    let mut stddev = Mat::default();
    core::mean_std_dev_def(&laplacian, &mut mean, &mut stddev)
        .map_err(|e| MediaError::detection_failed(format!("quality stddev: {e}")))?;
    let sd = *stddev
        .at::<f64>(0)
        .map_err(|e| MediaError::detection_failed(format!("quality stddev: {e}")))?;
    Ok((brightness, sd * sd))
}

/// Mean gray level and variance of the 4-neighbour Laplacian.
#[cfg(not(feature = "opencv"))]
pub fn gray_stats(gray: &GrayImage) -> MediaResult<(f64, f64)> {
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    if w == 0 || h == 0 {
        return Ok((0.0, 0.0));
    }
    // Reflect-101 borders
    let reflect = |i: i64, len: i64| -> u32 {
        if len == 1 {
            return 0;
        }
        let i = if i < 0 { -i } else { i };
        let i = if i >= len { 2 * (len - 1) - i } else { i };
        i.clamp(0, len - 1) as u32
    };
    let at = |x: i64, y: i64| gray.get_pixel(reflect(x, w), reflect(y, h)).0[0] as f64;

    let (mut luma, mut sum, mut sum_sq) = (0.0, 0.0, 0.0);
    for y in 0..h {
        for x in 0..w {
            let response = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            luma += at(x, y);
            sum += response;
            sum_sq += response * response;
        }
    }
    let n = (w * h) as f64;
    let mean = sum / n;
    Ok((luma / n, (sum_sq / n - mean * mean).max(0.0)))
}

pub fn blur_penalty(laplacian_variance: f64) -> f64 {
    1.0 / (laplacian_variance + BLUR_EPSILON)
}

/// Mean brightness and blur penalty over `frames`. `None` when empty.
pub fn frame_quality(frames: &[RgbImage]) -> MediaResult<Option<FrameQuality>> {
    if frames.is_empty() {
        return Ok(None);
    }
    let mut brightness = 0.0;
    let mut penalty = 0.0;
    for frame in frames {
        let (luma, variance) = gray_stats(&imageops::grayscale(frame))?;
        brightness += luma;
        penalty += blur_penalty(variance);
    }
    let n = frames.len() as f64;
    Ok(Some(FrameQuality {
        mean_brightness: brightness / n,
        mean_blur_penalty: penalty / n,
    }))
}
