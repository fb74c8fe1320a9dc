use thiserror::Error;

/// 图像处理环节的错误分类。
///
/// 几何退化（角点共线、重合或单应矩阵奇异）与 OpenCV 调用失败分开处理：
/// 前者只影响当前样本，调用方可以选择跳过；后者通常意味着环境或输入有问题。
#[derive(Debug, Error)]
pub enum ImageProcError {
    /// OpenCV 调用失败。
    #[error("OpenCV 调用失败：{0}")]
    OpenCv(#[from] opencv::Error),

    /// 角点集合退化，无法确定透视变换。
    #[error("角点退化：{reason}")]
    DegenerateCorners { reason: String },

    /// 求得的单应矩阵不可逆。
    #[error("单应矩阵奇异（行列式 {determinant:e}）")]
    SingularHomography { determinant: f64 },

    /// 裁剪尺寸超出图像范围。
    #[error("图像尺寸 {image_width}x{image_height} 小于裁剪尺寸 {width}x{height}")]
    InvalidCrop {
        image_width: i32,
        image_height: i32,
        width: i32,
        height: i32,
    },

    /// 输入图像格式不符合要求（通道数、深度等）。
    #[error("图像格式不受支持：{0}")]
    InvalidImage(String),

    /// 参数超出有效范围。
    #[error("参数无效：{0}")]
    InvalidParameter(String),
}

impl ImageProcError {
    /// 是否属于几何退化类错误。
    pub fn is_geometric(&self) -> bool {
        matches!(
            self,
            Self::DegenerateCorners { .. } | Self::SingularHomography { .. }
        )
    }

    pub(crate) fn degenerate(reason: impl Into<String>) -> Self {
        Self::DegenerateCorners {
            reason: reason.into(),
        }
    }
}
