//! 车牌数据合成用到的图像处理原语，全部基于 OpenCV `Mat`（BGR，8 位三通道）。
//!
//! - [`warp`] / [`dewarp`]：三维旋转投影得到的透视畸变及其逆变换；
//! - [`add_region_noise`]：只在四边形区域内对亮度通道加高斯噪声；
//! - [`crop_to_original_size`]：居中裁剪回车牌原始尺寸。

mod convert;
mod corners;
mod crop;
mod error;
mod noise;
mod perspective;

pub use convert::{mat_to_rgb_image, rgb_image_to_mat};
pub use corners::Corners;
pub use crop::crop_to_original_size;
pub use error::ImageProcError;
pub use noise::{add_region_noise, region_mask};
pub use perspective::{
    WarpParams, Warped, dewarp, perspective_matrix, project_corners, rotation_matrix, warp,
};

/// 本 crate 的结果类型。
pub type Result<T> = std::result::Result<T, ImageProcError>;
