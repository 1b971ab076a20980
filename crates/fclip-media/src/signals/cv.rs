//! Bridging between `image` buffers and OpenCV matrices.

use image::GrayImage;
use opencv::{core::Mat, prelude::*};

use crate::error::{MediaError, MediaResult};

/// Owned single-channel 8-bit matrix holding a copy of `frame`.
pub fn gray_mat(frame: &GrayImage) -> MediaResult<Mat> {
    let borrowed = Mat::new_rows_cols_with_data(frame.height() as i32, frame.width() as i32, frame.as_raw())
        .map_err(|e| MediaError::detection_failed(format!("gray mat: {e}")))?;
    borrowed
        .try_clone()
        .map_err(|e| MediaError::detection_failed(format!("gray mat clone: {e}")))
}

/// Matrix of `rows` descriptors, `width` values each, copied from `data`.
pub fn descriptor_mat<T: opencv::core::DataType>(data: &[T], width: usize) -> MediaResult<Mat> {
    let rows = if width == 0 { 0 } else { data.len() / width };
    let borrowed = Mat::new_rows_cols_with_data(rows as i32, width as i32, data)
        .map_err(|e| MediaError::detection_failed(format!("descriptor mat: {e}")))?;
    borrowed
        .try_clone()
        .map_err(|e| MediaError::detection_failed(format!("descriptor mat clone: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_gray_mat_keeps_layout() {
        let frame = GrayImage::from_fn(4, 3, |x, y| Luma([(y * 4 + x) as u8]));
        let mat = gray_mat(&frame).unwrap();
        assert_eq!((mat.rows(), mat.cols(), mat.channels()), (3, 4, 1));
        assert_eq!(*mat.at_2d::<u8>(2, 1).unwrap(), 9);
    }
}
