use crate::{ImageProcError, Result};
use opencv::core::{Mat, Rect};
use opencv::prelude::*;

/// 居中裁剪出 `width x height` 的区域，用于去掉合成时添加的黑色补边。
///
/// 偏移量按 `(图像尺寸 - 目标尺寸) / 2` 向下取整。
pub fn crop_to_original_size(image: &Mat, width: i32, height: i32) -> Result<Mat> {
    let size = image.size()?;
    if width <= 0 || height <= 0 || size.width < width || size.height < height {
        return Err(ImageProcError::InvalidCrop {
            image_width: size.width,
            image_height: size.height,
            width,
            height,
        });
    }

    let left = (size.width - width) / 2;
    let top = (size.height - height) / 2;
    let roi = Mat::roi(image, Rect::new(left, top, width, height))?;
    Ok(roi.try_clone()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{CV_8UC3, Scalar, Size, Vec3b};
    use opencv::imgproc;

    #[test]
    fn crop_returns_exact_centered_region() {
        let mut image = Mat::zeros(64, 193, CV_8UC3).unwrap().to_mat().unwrap();
        imgproc::rectangle(
            &mut image,
            Rect::new(32, 16, 128, 32),
            Scalar::all(255.0),
            -1,
            imgproc::LINE_8,
            0,
        )
        .unwrap();

        let cropped = crop_to_original_size(&image, 128, 32).unwrap();
        assert_eq!(cropped.size().unwrap(), Size::new(128, 32));
        assert_eq!(cropped.at_2d::<Vec3b>(0, 0).unwrap()[0], 255);
        assert_eq!(cropped.at_2d::<Vec3b>(31, 127).unwrap()[0], 255);
    }

    #[test]
    fn crop_of_exact_size_is_identity() {
        let image = Mat::new_rows_cols_with_default(32, 128, CV_8UC3, Scalar::all(42.0)).unwrap();
        let cropped = crop_to_original_size(&image, 128, 32).unwrap();
        assert_eq!(cropped.data_bytes().unwrap(), image.data_bytes().unwrap());
    }

    #[test]
    fn crop_larger_than_image_fails() {
        let image = Mat::zeros(16, 16, CV_8UC3).unwrap().to_mat().unwrap();
        let err = crop_to_original_size(&image, 32, 8).unwrap_err();
        assert!(matches!(err, ImageProcError::InvalidCrop { .. }));
    }
}
