//! 基于三维旋转 + 针孔投影的透视畸变与逆变换。
//!
//! 角点先以质心为原点放到 `z = 0` 平面上，经 `R = R_y(alpha) · R_x(beta)` 旋转后
//! 再按焦距 `f` 投影回二维：`x' = cx + f·x/(f+z)`，`y' = cy + f·y/(f+z)`。
//! 原角点与投影后角点的四点对应确定单应矩阵，整幅图像用 Lanczos 插值重采样，
//! 输出尺寸与输入保持一致。

use crate::{Corners, ImageProcError, Result};
use nalgebra::{Matrix3, Rotation3, Vector3};
use opencv::core::{self, BORDER_CONSTANT, Mat, MatTraitConst, Point2f, Scalar};
use opencv::imgproc;

/// 投影分母 `f + z` 的下限，低于此值说明点已落到相机平面后方。
const MIN_DEPTH: f64 = 1e-6;
/// 单应矩阵行列式的下限。
const MIN_DETERMINANT: f64 = 1e-9;

/// 透视畸变参数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarpParams {
    /// 绕竖直轴（y 轴）的偏航角，单位：度。
    pub alpha: f64,
    /// 绕水平轴（x 轴）的俯仰角，单位：度。
    pub beta: f64,
    /// 投影距离（焦距），像素。
    pub focal_length: u32,
}

/// `warp` 的输出：畸变后的图像与投影后的角点。
pub struct Warped {
    pub image: Mat,
    pub corners: Corners,
}

/// 组合旋转矩阵 `R = R_y(alpha) · R_x(beta)`，角度以度为单位。
pub fn rotation_matrix(alpha_deg: f64, beta_deg: f64) -> Matrix3<f64> {
    let r_x = Rotation3::from_axis_angle(&Vector3::x_axis(), beta_deg.to_radians());
    let r_y = Rotation3::from_axis_angle(&Vector3::y_axis(), alpha_deg.to_radians());
    (r_y * r_x).into_inner()
}

/// 将角点绕质心做三维旋转后按焦距投影回图像平面。
///
/// # 错误
/// - `focal_length` 为 0；
/// - 某个角点旋转后落在相机平面之后（`f + z <= 0`）。
pub fn project_corners(src: &Corners, params: WarpParams) -> Result<Corners> {
    if params.focal_length == 0 {
        return Err(ImageProcError::InvalidParameter("焦距必须为正整数".into()));
    }
    let f = params.focal_length as f64;
    let rotation = rotation_matrix(params.alpha, params.beta);
    let (cx, cy) = src.centroid();

    let mut projected = [Point2f::default(); 4];
    for (slot, point) in projected.iter_mut().zip(src.points()) {
        let v = rotation * Vector3::new(point.x as f64 - cx, point.y as f64 - cy, 0.0);
        let depth = f + v.z;
        if depth <= MIN_DEPTH {
            return Err(ImageProcError::degenerate(format!(
                "角点 ({}, {}) 投影后位于相机平面之后",
                point.x, point.y
            )));
        }
        *slot = Point2f::new(
            (cx + f * v.x / depth) as f32,
            (cy + f * v.y / depth) as f32,
        );
    }

    Ok(Corners(projected))
}

/// 求解 `src -> dst` 的 3x3 单应矩阵（`CV_64F`）。
///
/// 两组角点都会先做退化检查；求得矩阵后再校验行列式，奇异时返回
/// `ImageProcError::SingularHomography`。
pub fn perspective_matrix(src: &Corners, dst: &Corners) -> Result<Mat> {
    src.validate()?;
    dst.validate()?;

    let matrix =
        imgproc::get_perspective_transform(&src.to_vector(), &dst.to_vector(), core::DECOMP_LU)?;
    let determinant = core::determinant(&matrix)?;
    if !determinant.is_finite() || determinant.abs() < MIN_DETERMINANT {
        return Err(ImageProcError::SingularHomography { determinant });
    }
    Ok(matrix)
}

/// 对图像施加透视畸变，返回畸变图像与投影后的角点。
///
/// # 参数
/// - `image`: 源图像（BGR，8 位三通道）。
/// - `src`: 车牌区域在图像中的四个角点。
/// - `params`: 旋转角与焦距。
pub fn warp(image: &Mat, src: &Corners, params: WarpParams) -> Result<Warped> {
    let dst = project_corners(src, params)?;
    let matrix = perspective_matrix(src, &dst)?;
    let warped = resample(image, &matrix)?;
    Ok(Warped {
        image: warped,
        corners: dst,
    })
}

/// 逆向变换：用 `dst -> src` 的单应矩阵把畸变图像拉回原始几何。
///
/// 在畸变域中引入的视觉瑕疵（例如噪声）会随之保留下来。
pub fn dewarp(image: &Mat, src: &Corners, dst: &Corners) -> Result<Mat> {
    let inverse = perspective_matrix(dst, src)?;
    resample(image, &inverse)
}

/// 同尺寸 Lanczos 重采样，源图像范围外的像素填充为黑色。
fn resample(image: &Mat, matrix: &Mat) -> Result<Mat> {
    let size = image.size()?;
    let mut output = Mat::default();
    imgproc::warp_perspective(
        image,
        &mut output,
        matrix,
        size,
        imgproc::INTER_LANCZOS4,
        BORDER_CONSTANT,
        Scalar::default(),
    )?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use opencv::core::{CV_8UC3, Rect, Vec3b};
    use opencv::prelude::*;

    fn plate_corners() -> Corners {
        // 128x32 的车牌嵌在 192x64 的画布中央。
        Corners::from_rect(32, 16, 128, 32)
    }

    fn params(alpha: f64) -> WarpParams {
        WarpParams {
            alpha,
            beta: 0.0,
            focal_length: 128,
        }
    }

    #[test]
    fn rotation_matrix_matches_closed_form() {
        let r = rotation_matrix(30.0, 0.0);
        let (s, c) = 30f64.to_radians().sin_cos();
        assert_abs_diff_eq!(r[(0, 0)], c, epsilon = 1e-12);
        assert_abs_diff_eq!(r[(0, 2)], s, epsilon = 1e-12);
        assert_abs_diff_eq!(r[(2, 0)], -s, epsilon = 1e-12);
        assert_abs_diff_eq!(r[(1, 1)], 1.0, epsilon = 1e-12);

        let r = rotation_matrix(0.0, 30.0);
        assert_abs_diff_eq!(r[(1, 2)], -s, epsilon = 1e-12);
        assert_abs_diff_eq!(r[(2, 1)], s, epsilon = 1e-12);
    }

    #[test]
    fn zero_rotation_keeps_corners() {
        let src = plate_corners();
        let dst = project_corners(&src, params(0.0)).unwrap();
        for (a, b) in src.points().iter().zip(dst.points()) {
            assert_abs_diff_eq!(a.x, b.x, epsilon = 1e-4);
            assert_abs_diff_eq!(a.y, b.y, epsilon = 1e-4);
        }
    }

    #[test]
    fn projected_corners_mirror_under_negated_alpha() {
        let src = plate_corners();
        let (cx, _) = src.centroid();
        let pos = project_corners(&src, params(85.0)).unwrap();
        let neg = project_corners(&src, params(-85.0)).unwrap();

        assert!(!pos.is_axis_aligned());
        // 左上 <-> 右上，右下 <-> 左下。
        let mirror = [1usize, 0, 3, 2];
        for (i, &j) in mirror.iter().enumerate() {
            let p = pos.points()[i];
            let q = neg.points()[j];
            assert_abs_diff_eq!(p.x as f64 - cx, cx - q.x as f64, epsilon = 1e-3);
            assert_abs_diff_eq!(p.y, q.y, epsilon = 1e-3);
        }
    }

    #[test]
    fn right_angle_yaw_collapses_corners() {
        let src = plate_corners();
        let dst = project_corners(&src, params(90.0)).unwrap();
        let err = perspective_matrix(&src, &dst).unwrap_err();
        assert!(err.is_geometric());
    }

    #[test]
    fn zero_focal_length_is_rejected() {
        let src = plate_corners();
        let err = project_corners(
            &src,
            WarpParams {
                alpha: 10.0,
                beta: 0.0,
                focal_length: 0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ImageProcError::InvalidParameter(_)));
    }

    fn solid_plate() -> Mat {
        let mut canvas = Mat::zeros(64, 192, CV_8UC3).unwrap().to_mat().unwrap();
        imgproc::rectangle(
            &mut canvas,
            Rect::new(32, 16, 128, 32),
            Scalar::new(9.0, 203.0, 255.0, 0.0),
            -1,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
        canvas
    }

    #[test]
    fn warp_preserves_canvas_size() {
        let image = solid_plate();
        let warped = warp(&image, &plate_corners(), params(40.0)).unwrap();
        assert_eq!(warped.image.size().unwrap(), image.size().unwrap());
        assert_eq!(warped.image.typ(), image.typ());
    }

    #[test]
    fn dewarp_inverts_warp_up_to_interpolation() {
        let image = solid_plate();
        let src = plate_corners();
        let warped = warp(&image, &src, params(25.0)).unwrap();
        let restored = dewarp(&warped.image, &src, &warped.corners).unwrap();

        // 只比较车牌内部，边缘几个像素受插值影响。
        let mut total = 0.0f64;
        let mut count = 0usize;
        for y in 20..44 {
            for x in 38..154 {
                let a = image.at_2d::<Vec3b>(y, x).unwrap();
                let b = restored.at_2d::<Vec3b>(y, x).unwrap();
                for c in 0..3 {
                    total += (a[c] as f64 - b[c] as f64).abs();
                    count += 1;
                }
            }
        }
        let mean_error = total / count as f64;
        assert!(mean_error < 3.0, "平均误差过大：{mean_error}");
    }

    #[test]
    fn uncovered_pixels_are_filled_black() {
        let image =
            Mat::new_rows_cols_with_default(64, 192, CV_8UC3, Scalar::all(200.0)).unwrap();
        let warped = warp(&image, &plate_corners(), params(60.0)).unwrap().image;

        let mut darkest = u8::MAX;
        for y in 0..64 {
            for x in 0..192 {
                darkest = darkest.min(warped.at_2d::<Vec3b>(y, x).unwrap()[0]);
            }
        }
        assert!(darkest < 10, "源图像范围外应填充黑色像素");
        // 画布中心仍落在源图像内。
        assert!(warped.at_2d::<Vec3b>(32, 96).unwrap()[0] > 190);
    }
}
