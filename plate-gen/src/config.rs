use anyhow::{Result, bail, ensure};
use rand::Rng;
use std::path::PathBuf;

/// 默认字体文件名，找不到时退回 OpenCV 内置的 Hershey 字体。
pub const DEFAULT_FONT: &str = "bahnschrift.ttf";

/// 尺寸系数为 0 时的车牌宽、高与字号。
const BASE_WIDTH: u32 = 128;
const BASE_HEIGHT: u32 = 32;
const BASE_TEXT_SIZE: u32 = 25;

/// 闭区间 `[lo, hi]`，用于均匀采样。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub lo: f64,
    pub hi: f64,
}

impl ValueRange {
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    /// 在区间内均匀采样；`lo == hi` 时恒返回该值。
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        if self.lo == self.hi {
            self.lo
        } else {
            rng.gen_range(self.lo..=self.hi)
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        ensure!(
            self.lo.is_finite() && self.hi.is_finite(),
            "{name} 的取值范围必须为有限值：({}, {})",
            self.lo,
            self.hi
        );
        ensure!(
            self.lo <= self.hi,
            "{name} 的下界大于上界：({}, {})",
            self.lo,
            self.hi
        );
        Ok(())
    }
}

/// 偏航角的两个互不相交的采样区间（负向与正向），各以 1/2 概率选中。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaRanges {
    pub negative: ValueRange,
    pub positive: ValueRange,
}

impl AlphaRanges {
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        if rng.gen_bool(0.5) {
            self.negative.sample(rng)
        } else {
            self.positive.sample(rng)
        }
    }

    fn validate(&self) -> Result<()> {
        self.negative.validate("alpha 负向区间")?;
        self.positive.validate("alpha 正向区间")?;
        ensure!(
            self.negative.hi < self.positive.lo,
            "alpha 负向区间 ({}, {}) 与正向区间 ({}, {}) 必须互不相交且负向在前",
            self.negative.lo,
            self.negative.hi,
            self.positive.lo,
            self.positive.hi
        );
        Ok(())
    }
}

impl Default for AlphaRanges {
    fn default() -> Self {
        Self {
            negative: ValueRange::new(-85.0, -85.0),
            positive: ValueRange::new(85.0, 85.0),
        }
    }
}

/// 车牌尺寸：宽、高（像素）与字号。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlateSpec {
    pub width: u32,
    pub height: u32,
    pub text_size: u32,
}

impl PlateSpec {
    /// 以 `128x32`、字号 25 为基准，按 `2^factor` 等比放大。
    ///
    /// factor 0..=3 分别对应 128x32、256x64、512x128、1024x256。
    pub fn from_size_factor(factor: u32) -> Result<Self> {
        let scale = 2u32
            .checked_pow(factor)
            .filter(|s| BASE_WIDTH.checked_mul(*s).is_some())
            .ok_or_else(|| anyhow::anyhow!("尺寸系数过大：{factor}"))?;
        Ok(Self {
            width: BASE_WIDTH * scale,
            height: BASE_HEIGHT * scale,
            text_size: BASE_TEXT_SIZE * scale,
        })
    }

    /// 合成时的补边画布尺寸 `(1.5·width, 2·height)`，宽度向下取整。
    pub fn padded_size(&self) -> (u32, u32) {
        (self.width * 3 / 2, self.height * 2)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.width > 0 && self.height > 0,
            "车牌尺寸必须为正：{}x{}",
            self.width,
            self.height
        );
        ensure!(self.text_size > 0, "字号必须为正");
        ensure!(
            self.width <= i32::MAX as u32 / 2 && self.height <= i32::MAX as u32 / 2,
            "车牌尺寸过大：{}x{}",
            self.width,
            self.height
        );
        Ok(())
    }
}

impl Default for PlateSpec {
    fn default() -> Self {
        Self {
            width: BASE_WIDTH * 4,
            height: BASE_HEIGHT * 4,
            text_size: BASE_TEXT_SIZE * 4,
        }
    }
}

/// 单个样本失败时的处理方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// 任一样本失败即终止整个生成过程。
    #[default]
    Abort,
    /// 几何退化的样本记录日志后跳过；文件系统错误仍然终止。
    Skip,
}

/// 一次数据集生成的全部运行参数。
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    /// 需要的样本数。
    pub num_samples: usize,
    /// 输出目录，不存在时自动创建。
    pub output_dir: PathBuf,
    /// 偏航角采样区间。
    pub alpha_ranges: AlphaRanges,
    /// 噪声标准差采样区间。
    pub noise_level_range: ValueRange,
    /// 车牌尺寸与字号。
    pub plate: PlateSpec,
    /// 字体文件；`None` 时直接使用内置字体。
    pub font_path: Option<PathBuf>,
    /// 随机种子；`None` 时随机生成并写入日志。
    pub seed: Option<u64>,
    /// 并行线程数；`None` 时使用 CPU 核数。
    pub workers: Option<usize>,
    /// 样本失败处理策略。
    pub failure_policy: FailurePolicy,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            num_samples: 5,
            output_dir: PathBuf::from("data"),
            alpha_ranges: AlphaRanges::default(),
            noise_level_range: ValueRange::new(100.0, 150.0),
            plate: PlateSpec::default(),
            font_path: Some(PathBuf::from(DEFAULT_FONT)),
            seed: None,
            workers: None,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl GenerateConfig {
    /// 校验参数组合是否合法。
    pub fn validate(&self) -> Result<()> {
        self.plate.validate()?;
        self.alpha_ranges.validate()?;
        self.noise_level_range.validate("噪声强度")?;
        if self.noise_level_range.lo < 0.0 {
            bail!("噪声强度不能为负：{}", self.noise_level_range.lo);
        }
        if self.workers == Some(0) {
            bail!("并行线程数必须大于 0");
        }
        Ok(())
    }
}
