//! Classifier capability interface.

use async_trait::async_trait;
use image::RgbImage;

use crate::error::{MlError, MlResult};

/// Frames per classifier window.
pub const WINDOW_FRAMES: usize = 10;

/// Side length of each (square) window frame.
pub const WINDOW_SIZE: u32 = 64;

/// A fixed-length run of equally sized RGB frames.
#[derive(Debug, Clone)]
pub struct FrameWindow {
    frames: Vec<RgbImage>,
}

impl FrameWindow {
    /// Build a window, rejecting empty input and mixed frame sizes.
    pub fn new(frames: Vec<RgbImage>) -> MlResult<Self> {
        let first = frames
            .first()
            .ok_or_else(|| MlError::InvalidWindow("window has no frames".to_string()))?;
        let dims = first.dimensions();
        if dims.0 == 0 || dims.1 == 0 {
            return Err(MlError::InvalidWindow("zero-sized frame".to_string()));
        }
        if let Some(bad) = frames.iter().position(|f| f.dimensions() != dims) {
            return Err(MlError::InvalidWindow(format!(
                "frame {} is {:?}, expected {:?}",
                bad,
                frames[bad].dimensions(),
                dims
            )));
        }
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.frames[0].width()
    }

    pub fn height(&self) -> u32 {
        self.frames[0].height()
    }

    pub fn frames(&self) -> &[RgbImage] {
        &self.frames
    }

    /// Frames as one `[T, H, W, 3]` tensor scaled to `[0, 1]`.
    pub fn to_tensor(&self) -> Vec<f32> {
        self.frames
            .iter()
            .flat_map(|f| f.as_raw().iter().map(|v| *v as f32 / 255.0))
            .collect()
    }
}

/// Action classification over a frame window.
///
/// Implementations may run a model in-process or call a remote service.
#[async_trait]
pub trait ActionClassifier: Send + Sync {
    /// Label set; `infer` returns one probability per entry, in this order.
    fn labels(&self) -> &[String];

    /// Class probabilities for `window`.
    async fn infer(&self, window: &FrameWindow) -> MlResult<Vec<f32>>;

    /// Implementation name for logging.
    fn name(&self) -> &'static str;
}

/// Index and probability of the most likely class.
///
/// Ties go to the lowest index. `None` for an empty or all-NaN vector.
pub fn top_label(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .fold(None, |best, (i, p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((i, p)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_window_validation() {
        assert!(FrameWindow::new(vec![]).is_err());

        let mixed = vec![RgbImage::new(64, 64), RgbImage::new(32, 32)];
        assert!(matches!(FrameWindow::new(mixed), Err(MlError::InvalidWindow(_))));

        let window = FrameWindow::new(vec![RgbImage::new(64, 64); WINDOW_FRAMES]).unwrap();
        assert_eq!(window.len(), WINDOW_FRAMES);
        assert_eq!((window.width(), window.height()), (64, 64));
    }

    #[test]
    fn test_tensor_is_normalized() {
        let frames = vec![
            RgbImage::from_pixel(2, 2, Rgb([255, 0, 51])),
            RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])),
        ];
        let tensor = FrameWindow::new(frames).unwrap().to_tensor();
        assert_eq!(tensor.len(), 2 * 2 * 2 * 3);
        assert_eq!(tensor[0], 1.0);
        assert_eq!(tensor[1], 0.0);
        assert!((tensor[2] - 0.2).abs() < 1e-6);
        assert!(tensor[12..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_top_label() {
        assert_eq!(top_label(&[0.1, 0.7, 0.2]), Some((1, 0.7)));
        assert_eq!(top_label(&[0.5, 0.5]), Some((0, 0.5)));
        assert_eq!(top_label(&[]), None);
        assert_eq!(top_label(&[f32::NAN, 0.3]), Some((1, 0.3)));
    }
}
