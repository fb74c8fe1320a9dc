use crate::{Corners, ImageProcError, Result};
use opencv::core::{
    self, AlgorithmHint, CV_8U, CV_8UC1, CV_8UC3, CV_32F, Mat, Point, Scalar, Size, Vector,
};
use opencv::imgproc;
use opencv::prelude::*;
use rand::RngCore;

/// 将 `corners` 围成的多边形（坐标截断为整数）填充为 255，其余为 0。
pub fn region_mask(size: Size, corners: &Corners) -> Result<Mat> {
    let mut mask = Mat::zeros(size.height, size.width, CV_8UC1)?.to_mat()?;
    let mut polygons = Vector::<Vector<Point>>::new();
    polygons.push(corners.to_int_polygon());
    imgproc::fill_poly(
        &mut mask,
        &polygons,
        Scalar::all(255.0),
        imgproc::LINE_8,
        0,
        Point::default(),
    )?;
    Ok(mask)
}

/// 只在指定四边形区域内，对 HLS 空间的亮度通道叠加零均值高斯噪声。
///
/// - 噪声由 `rng` 派生的 OpenCV `RNG` 逐像素独立采样；
/// - 叠加后亮度截断到 `[0, 255]`，再转回 BGR；
/// - 区域外的像素与输入逐位一致（色彩空间往返的量化误差不会泄漏到区域外）。
///
/// # 参数
/// - `image`: BGR 8 位三通道图像。
/// - `region`: 噪声区域的四个角点（通常是畸变后的车牌角点）。
/// - `stddev`: 噪声标准差，需为非负有限值。
/// - `rng`: 随机源，保证结果可复现。
pub fn add_region_noise(
    image: &Mat,
    region: &Corners,
    stddev: f64,
    rng: &mut impl RngCore,
) -> Result<Mat> {
    if image.typ() != CV_8UC3 {
        return Err(ImageProcError::InvalidImage(format!(
            "噪声注入需要 8 位三通道图像，实际类型 {}",
            image.typ()
        )));
    }
    if !stddev.is_finite() || stddev < 0.0 {
        return Err(ImageProcError::InvalidParameter(format!(
            "噪声标准差必须为非负有限值，实际为 {stddev}"
        )));
    }

    let mut hls = Mat::default();
    imgproc::cvt_color(
        image,
        &mut hls,
        imgproc::COLOR_BGR2HLS,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;
    let mut channels = Vector::<Mat>::new();
    core::split(&hls, &mut channels)?;

    let lightness = channels.get(1)?;
    let mut lightness_float = Mat::default();
    lightness.convert_to(&mut lightness_float, CV_32F, 1.0, 0.0)?;

    let mut noise =
        Mat::zeros(lightness_float.rows(), lightness_float.cols(), CV_32F)?.to_mat()?;
    let mut cv_rng = core::RNG::new(rng.next_u64())?;
    cv_rng.fill(
        &mut noise,
        core::RNG_NORMAL,
        &Scalar::all(0.0),
        &Scalar::all(stddev),
        false,
    )?;

    let mask = region_mask(image.size()?, region)?;
    let mut noisy_float = lightness_float.try_clone()?;
    core::add(&lightness_float, &noise, &mut noisy_float, &mask, -1)?;

    // convert_to 会饱和到 [0, 255]。
    let mut noisy_lightness = Mat::default();
    noisy_float.convert_to(&mut noisy_lightness, CV_8U, 1.0, 0.0)?;
    channels.set(1, noisy_lightness)?;
    core::merge(&channels, &mut hls)?;

    let mut noisy_bgr = Mat::default();
    imgproc::cvt_color(
        &hls,
        &mut noisy_bgr,
        imgproc::COLOR_HLS2BGR,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;

    let mut output = image.try_clone()?;
    noisy_bgr.copy_to_masked(&mut output, &mask)?;
    Ok(output)
}
