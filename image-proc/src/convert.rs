use crate::{ImageProcError, Result};
use image::RgbImage;
use opencv::core::{AlgorithmHint, CV_8UC3, Mat};
use opencv::imgproc;
use opencv::prelude::*;

/// 将 `image` crate 的 RGB 图像复制到 OpenCV `Mat` 并转换为 BGR。
pub fn rgb_image_to_mat(image: &RgbImage) -> Result<Mat> {
    let (w, h) = image.dimensions();
    let mut rgb = Mat::zeros(h as i32, w as i32, CV_8UC3)?.to_mat()?;
    {
        let src = image.as_raw();
        let dst = rgb.data_bytes_mut()?;
        if dst.len() != src.len() {
            return Err(ImageProcError::InvalidImage(format!(
                "像素缓冲区长度不一致：{} != {}",
                dst.len(),
                src.len()
            )));
        }
        dst.copy_from_slice(src);
    }
    let mut bgr = Mat::default();
    imgproc::cvt_color(
        &rgb,
        &mut bgr,
        imgproc::COLOR_RGB2BGR,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;
    Ok(bgr)
}

/// 将 BGR 8 位三通道 `Mat` 转回 `image` crate 的 RGB 图像。
pub fn mat_to_rgb_image(mat: &Mat) -> Result<RgbImage> {
    if mat.typ() != CV_8UC3 {
        return Err(ImageProcError::InvalidImage(format!(
            "需要 8 位三通道图像，实际类型 {}",
            mat.typ()
        )));
    }
    let mut rgb = Mat::default();
    imgproc::cvt_color(
        mat,
        &mut rgb,
        imgproc::COLOR_BGR2RGB,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;
    let (w, h) = (rgb.cols() as u32, rgb.rows() as u32);
    let bytes = rgb.data_bytes()?.to_vec();
    RgbImage::from_raw(w, h, bytes)
        .ok_or_else(|| ImageProcError::InvalidImage(format!("无法从 {w}x{h} 的像素缓冲区构造图像")))
}
