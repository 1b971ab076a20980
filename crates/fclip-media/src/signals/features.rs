//! Local feature descriptors and cross-checked matching.
//!
//! With the `opencv` feature, frames are described by ORB (binary,
//! Hamming distance) or SIFT (float, L2 distance) and matched with a
//! cross-checked brute-force matcher. Without it every frame collapses to
//! a single thumbnail descriptor and the distance is the mean absolute
//! difference between thumbnails.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "opencv")]
use opencv::{
    core::{self, DMatch, KeyPoint, Mat, Vector},
    features2d::{BFMatcher, ORB, SIFT},
    prelude::*,
};

#[cfg(feature = "opencv")]
use super::cv;
#[cfg(feature = "opencv")]
use crate::error::MediaError;
use crate::error::MediaResult;

#[cfg(not(feature = "opencv"))]
const THUMB_WIDTH: u32 = 16;
#[cfg(not(feature = "opencv"))]
const THUMB_HEIGHT: u32 = 9;

/// Descriptor family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorKind {
    /// Fast binary descriptor
    #[default]
    Orb,
    /// Slower float descriptor, more robust to lighting changes
    Sift,
}

impl DescriptorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptorKind::Orb => "orb",
            DescriptorKind::Sift => "sift",
        }
    }
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DescriptorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "orb" => Ok(DescriptorKind::Orb),
            "sift" => Ok(DescriptorKind::Sift),
            other => Err(format!("unknown descriptor kind: {other}")),
        }
    }
}

/// Row-major descriptors of one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptors {
    /// Packed bit strings
    Binary { width: usize, data: Vec<u8> },
    /// Float vectors
    Float { width: usize, data: Vec<f32> },
}

impl Descriptors {
    pub fn len(&self) -> usize {
        match self {
            Descriptors::Binary { width, data } => data.len().checked_div(*width).unwrap_or(0),
            Descriptors::Float { width, data } => data.len().checked_div(*width).unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Describes grayscale frames.
///
/// Holds only settings; detectors are created per call so one extractor
/// can be shared across worker threads.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    kind: DescriptorKind,
    max_features: usize,
}

impl FeatureExtractor {
    pub fn new(kind: DescriptorKind) -> Self {
        Self {
            kind,
            max_features: 500,
        }
    }

    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    /// Detect keypoints and describe them, keeping at most `max_features`.
    #[cfg(feature = "opencv")]
    pub fn compute(&self, frame: &GrayImage) -> MediaResult<Descriptors> {
        let image = cv::gray_mat(frame)?;
        let mask = Mat::default();
        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();

        match self.kind {
            DescriptorKind::Orb => {
                let mut orb = ORB::create_def()
                    .map_err(|e| MediaError::detection_failed(format!("orb create: {e}")))?;
                orb.set_max_features(self.max_features as i32)
                    .map_err(|e| MediaError::detection_failed(format!("orb max features: {e}")))?;
                orb.detect_and_compute(&image, &mask, &mut keypoints, &mut descriptors, false)
                    .map_err(|e| MediaError::detection_failed(format!("orb compute: {e}")))?;
            }
            DescriptorKind::Sift => {
                let mut sift = SIFT::create_def()
                    .map_err(|e| MediaError::detection_failed(format!("sift create: {e}")))?;
                sift.detect_and_compute(&image, &mask, &mut keypoints, &mut descriptors, false)
                    .map_err(|e| MediaError::detection_failed(format!("sift compute: {e}")))?;
            }
        }

        let width = descriptors.cols().max(0) as usize;
        let keep = (descriptors.rows().max(0) as usize).min(self.max_features) * width;
        if keep == 0 {
            return Ok(self.empty());
        }

        match self.kind {
            DescriptorKind::Orb => {
                let data = descriptors
                    .data_typed::<u8>()
                    .map_err(|e| MediaError::detection_failed(format!("orb descriptors: {e}")))?;
                Ok(Descriptors::Binary {
                    width,
                    data: data[..keep].to_vec(),
                })
            }
            DescriptorKind::Sift => {
                let data = descriptors
                    .data_typed::<f32>()
                    .map_err(|e| MediaError::detection_failed(format!("sift descriptors: {e}")))?;
                Ok(Descriptors::Float {
                    width,
                    data: data[..keep].to_vec(),
                })
            }
        }
    }

    /// One coarse thumbnail descriptor per frame.
    #[cfg(not(feature = "opencv"))]
    pub fn compute(&self, frame: &GrayImage) -> MediaResult<Descriptors> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(self.empty());
        }
        let thumb = image::imageops::thumbnail(frame, THUMB_WIDTH, THUMB_HEIGHT);
        let data: Vec<f32> = thumb.as_raw().iter().map(|v| *v as f32).collect();
        Ok(Descriptors::Float {
            width: data.len(),
            data,
        })
    }

    fn empty(&self) -> Descriptors {
        match self.kind {
            DescriptorKind::Orb => Descriptors::Binary {
                width: 0,
                data: Vec::new(),
            },
            DescriptorKind::Sift => Descriptors::Float {
                width: 0,
                data: Vec::new(),
            },
        }
    }
}

/// Mean distance of cross-checked matches, `None` without any match.
#[cfg(feature = "opencv")]
pub fn mean_match_distance(a: &Descriptors, b: &Descriptors) -> MediaResult<Option<f64>> {
    if a.is_empty() || b.is_empty() {
        return Ok(None);
    }
    let (query, train, norm) = match (a, b) {
        (Descriptors::Binary { width: wa, data: da }, Descriptors::Binary { width: wb, data: db })
            if wa == wb =>
        {
            (cv::descriptor_mat(da, *wa)?, cv::descriptor_mat(db, *wb)?, core::NORM_HAMMING)
        }
        (Descriptors::Float { width: wa, data: da }, Descriptors::Float { width: wb, data: db })
            if wa == wb =>
        {
            (cv::descriptor_mat(da, *wa)?, cv::descriptor_mat(db, *wb)?, core::NORM_L2)
        }
        _ => return Ok(None),
    };

    let matcher = BFMatcher::new(norm, true)
        .map_err(|e| MediaError::detection_failed(format!("matcher create: {e}")))?;
    let mut matches = Vector::<DMatch>::new();
    matcher
        .train_match(&query, &train, &mut matches, &Mat::default())
        .map_err(|e| MediaError::detection_failed(format!("descriptor match: {e}")))?;

    if matches.is_empty() {
        return Ok(None);
    }
    let total: f64 = matches.iter().map(|m| m.distance as f64).sum();
    Ok(Some(total / matches.len() as f64))
}

/// Mean absolute difference of two thumbnail descriptors.
#[cfg(not(feature = "opencv"))]
pub fn mean_match_distance(a: &Descriptors, b: &Descriptors) -> MediaResult<Option<f64>> {
    match (a, b) {
        (Descriptors::Float { width: wa, data: da }, Descriptors::Float { width: wb, data: db })
            if wa == wb && !da.is_empty() && da.len() == db.len() =>
        {
            let total: f64 = da.iter().zip(db).map(|(x, y)| (x - y).abs() as f64).sum();
            Ok(Some(total / da.len() as f64))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Isolated bright squares on a dark background: four corners each.
    fn squares() -> GrayImage {
        GrayImage::from_fn(160, 120, |x, y| {
            let on = x % 32 < 12 && y % 32 < 12;
            Luma([if on { 200 } else { 30 }])
        })
    }

    #[test]
    fn test_descriptor_kind_parsing() {
        assert_eq!("orb".parse::<DescriptorKind>().unwrap(), DescriptorKind::Orb);
        assert_eq!("SIFT".parse::<DescriptorKind>().unwrap(), DescriptorKind::Sift);
        assert!("surf".parse::<DescriptorKind>().is_err());
        assert_eq!(DescriptorKind::default(), DescriptorKind::Orb);
    }

    #[test]
    fn test_identical_frames_match_at_zero() {
        for kind in [DescriptorKind::Orb, DescriptorKind::Sift] {
            let extractor = FeatureExtractor::new(kind);
            let a = extractor.compute(&squares()).unwrap();
            let b = extractor.compute(&squares()).unwrap();
            assert!(!a.is_empty());
            assert_eq!(mean_match_distance(&a, &b).unwrap(), Some(0.0));
        }
    }

    #[test]
    fn test_mismatched_kinds_do_not_match() {
        let binary = Descriptors::Binary {
            width: 32,
            data: vec![0u8; 32],
        };
        let float = Descriptors::Float {
            width: 128,
            data: vec![0f32; 128],
        };
        assert_eq!(mean_match_distance(&binary, &float).unwrap(), None);
        let empty = Descriptors::Binary {
            width: 0,
            data: vec![],
        };
        assert!(empty.is_empty());
        assert_eq!(mean_match_distance(&empty, &binary).unwrap(), None);
    }

    #[cfg(feature = "opencv")]
    #[test]
    fn test_flat_frame_has_no_descriptors() {
        let frame = GrayImage::from_pixel(160, 120, Luma([0]));
        let extractor = FeatureExtractor::new(DescriptorKind::Orb);
        assert!(extractor.compute(&frame).unwrap().is_empty());
    }

    #[cfg(feature = "opencv")]
    #[test]
    fn test_descriptors_are_capped() {
        let extractor = FeatureExtractor::new(DescriptorKind::Orb).with_max_features(10);
        let descriptors = extractor.compute(&squares()).unwrap();
        assert!(!descriptors.is_empty());
        assert!(descriptors.len() <= 10);
        assert!(matches!(descriptors, Descriptors::Binary { width: 32, .. }));
    }

    #[cfg(feature = "opencv")]
    #[test]
    fn test_unrelated_frames_are_far_apart() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let noise = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            GrayImage::from_fn(160, 120, |_, _| Luma([rng.random::<u8>()]))
        };
        let extractor = FeatureExtractor::new(DescriptorKind::Orb);
        let a = extractor.compute(&noise(1)).unwrap();
        let b = extractor.compute(&noise(2)).unwrap();
        let distance = mean_match_distance(&a, &b).unwrap().unwrap();
        assert!(distance > 30.0, "distance {distance}");
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn test_thumbnail_distance_is_mean_gray_difference() {
        let extractor = FeatureExtractor::new(DescriptorKind::Orb);
        let dark = extractor.compute(&GrayImage::from_pixel(160, 120, Luma([30]))).unwrap();
        let bright = extractor.compute(&GrayImage::from_pixel(160, 120, Luma([200]))).unwrap();
        assert_eq!(dark.len(), 1);
        assert_eq!(mean_match_distance(&dark, &bright).unwrap(), Some(170.0));
    }
}
