//! 数据集生成流程：合成 → 透视畸变 → 区域噪声 → 逆变换 → 裁剪 → 落盘。
//!
//! 每个样本拥有独立的随机源（由基础种子与样本序号派生），因此同一序号的
//! 输出与并行线程数无关。样本之间不共享可变状态，只写各自序号的文件。

use crate::config::{FailurePolicy, GenerateConfig};
use crate::inventory::{ArtifactFamily, ReconcileReport, reconcile};
use crate::metadata::SampleMetadata;
use crate::synth::PlateSynthesizer;
use anyhow::{Context, Result};
use image_proc::{
    ImageProcError, WarpParams, add_region_noise, crop_to_original_size, dewarp, warp,
};
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

/// 默认流程中俯仰角固定为 0。
const DEFAULT_BETA: f64 = 0.0;
/// 样本序号派生随机种子时使用的乘数（黄金分割常数）。
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// 协作式取消标记，在每个样本开始前检查。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 单个样本的失败原因。
#[derive(Debug, Error)]
pub enum SampleError {
    /// 角点退化或单应矩阵奇异，只影响当前样本。
    #[error("样本 {idx} 几何退化：{source}")]
    Geometry {
        idx: usize,
        #[source]
        source: ImageProcError,
    },

    /// 其余图像处理失败。
    #[error("样本 {idx} 图像处理失败：{source}")]
    Image {
        idx: usize,
        #[source]
        source: ImageProcError,
    },

    #[error("样本 {idx} 写入 {} 失败：{source}", .path.display())]
    Io {
        idx: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("样本 {idx} 编码 {} 失败：{reason}", .path.display())]
    Encode {
        idx: usize,
        path: PathBuf,
        reason: String,
    },
}

impl SampleError {
    fn from_image(idx: usize, source: ImageProcError) -> Self {
        if source.is_geometric() {
            Self::Geometry { idx, source }
        } else {
            Self::Image { idx, source }
        }
    }

    pub fn idx(&self) -> usize {
        match self {
            Self::Geometry { idx, .. }
            | Self::Image { idx, .. }
            | Self::Io { idx, .. }
            | Self::Encode { idx, .. } => *idx,
        }
    }

    /// 在 `FailurePolicy::Skip` 下可以跳过的错误（仅几何退化）。
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Geometry { .. })
    }
}

/// 被跳过的样本。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSample {
    pub idx: usize,
    pub reason: String,
}

/// 一次生成的汇总。
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    /// 请求的样本数。
    pub requested: usize,
    /// 成功写出的样本序号，升序。
    pub written: Vec<usize>,
    pub skipped: Vec<SkippedSample>,
    /// 生成前的目录裁剪结果。
    pub removed: ReconcileReport,
    /// 是否因取消而提前结束。
    pub cancelled: bool,
    /// 本次使用的基础随机种子，可用于复现。
    pub seed: u64,
}

/// 一个样本在内存中的成品。
pub struct GeneratedSample {
    pub original: Mat,
    pub distorted: Mat,
    pub metadata: SampleMetadata,
}

enum SampleOutcome {
    Written(usize),
    Skipped(SkippedSample),
    Failed(SampleError),
    Cancelled,
    NotRun,
}

/// 由基础种子与样本序号派生该样本的随机源。
pub fn sample_rng(seed: u64, idx: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (idx as u64).wrapping_mul(SEED_STRIDE))
}

/// 按配置生成数据集。
pub fn generate(config: &GenerateConfig) -> Result<GenerationReport> {
    generate_with_cancel(config, &CancelToken::new())
}

/// 同 [`generate`]，每个样本开始前检查 `cancel`。
///
/// - 生成前先按 `num_samples` 裁剪输出目录中的旧文件；
/// - `FailurePolicy::Abort` 下首个失败样本会让尚未开始的样本不再执行，并返回错误；
/// - `FailurePolicy::Skip` 下几何退化的样本记录后跳过，文件系统错误仍然返回错误。
pub fn generate_with_cancel(
    config: &GenerateConfig,
    cancel: &CancelToken,
) -> Result<GenerationReport> {
    config.validate()?;
    let output_dir = &config.output_dir;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("无法创建输出目录 {}", output_dir.display()))?;

    let removed = reconcile(output_dir, config.num_samples)?;

    let seed = match config.seed {
        Some(seed) => seed,
        None => {
            let seed = rand::thread_rng().next_u64();
            info!("未指定随机种子，本次使用 {seed}");
            seed
        }
    };

    let synthesizer =
        PlateSynthesizer::with_font_path(config.plate, config.font_path.as_deref());
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.unwrap_or(0))
        .build()
        .context("无法创建线程池")?;

    info!(
        "开始生成 {} 个样本到 {}（{}x{}，{} 线程）",
        config.num_samples,
        output_dir.display(),
        config.plate.width,
        config.plate.height,
        pool.current_num_threads()
    );

    let halted = AtomicBool::new(false);
    let outcomes: Vec<SampleOutcome> = pool.install(|| {
        (0..config.num_samples)
            .into_par_iter()
            .map(|idx| {
                if cancel.is_cancelled() {
                    return SampleOutcome::Cancelled;
                }
                if halted.load(Ordering::SeqCst) {
                    return SampleOutcome::NotRun;
                }

                let mut rng = sample_rng(seed, idx);
                let result = build_sample(&synthesizer, config, idx, &mut rng)
                    .and_then(|sample| persist_sample(output_dir, &sample));
                match result {
                    Ok(()) => {
                        debug!("样本 {idx} 已写出");
                        SampleOutcome::Written(idx)
                    }
                    Err(err)
                        if err.is_recoverable() && config.failure_policy == FailurePolicy::Skip =>
                    {
                        warn!("跳过样本：{err}");
                        SampleOutcome::Skipped(SkippedSample {
                            idx,
                            reason: err.to_string(),
                        })
                    }
                    Err(err) => {
                        halted.store(true, Ordering::SeqCst);
                        SampleOutcome::Failed(err)
                    }
                }
            })
            .collect()
    });

    let mut report = GenerationReport {
        requested: config.num_samples,
        removed,
        seed,
        ..GenerationReport::default()
    };
    let mut failure: Option<SampleError> = None;
    for outcome in outcomes {
        match outcome {
            SampleOutcome::Written(idx) => report.written.push(idx),
            SampleOutcome::Skipped(skipped) => report.skipped.push(skipped),
            SampleOutcome::Failed(err) => {
                if failure.is_none() {
                    failure = Some(err);
                }
            }
            SampleOutcome::Cancelled => report.cancelled = true,
            SampleOutcome::NotRun => {}
        }
    }

    if let Some(err) = failure {
        warn!(
            "生成中止，已写出 {} 个样本（种子 {seed}）",
            report.written.len()
        );
        return Err(anyhow::Error::new(err).context("数据集生成中止"));
    }

    if report.cancelled {
        info!(
            "生成已取消，已写出 {}/{} 个样本",
            report.written.len(),
            report.requested
        );
    } else {
        info!(
            "完成生成：写出 {} 个样本，跳过 {} 个，输出目录：{}",
            report.written.len(),
            report.skipped.len(),
            output_dir.display()
        );
    }
    Ok(report)
}

/// 按固定顺序处理一个样本，不写文件。
///
/// 随机数的消耗顺序：车牌号、偏航角、噪声强度、噪声像素。
pub fn build_sample(
    synthesizer: &PlateSynthesizer,
    config: &GenerateConfig,
    idx: usize,
    rng: &mut StdRng,
) -> std::result::Result<GeneratedSample, SampleError> {
    let image_err = |err| SampleError::from_image(idx, err);
    let spec = config.plate;

    let plate = synthesizer.synthesize(rng).map_err(image_err)?;
    let alpha = config.alpha_ranges.sample(rng);
    let noise_level = config.noise_level_range.sample(rng);
    let params = WarpParams {
        alpha,
        beta: DEFAULT_BETA,
        focal_length: spec.width,
    };

    let warped = warp(&plate.image, &plate.corners, params).map_err(image_err)?;
    let noisy =
        add_region_noise(&warped.image, &warped.corners, noise_level, rng).map_err(image_err)?;
    let restored = dewarp(&noisy, &plate.corners, &warped.corners).map_err(image_err)?;

    let (w, h) = (spec.width as i32, spec.height as i32);
    let original = crop_to_original_size(&plate.image, w, h).map_err(image_err)?;
    let distorted = crop_to_original_size(&restored, w, h).map_err(image_err)?;

    debug!(
        "样本 {idx}：车牌号 {}，alpha {alpha:.2}，噪声 {noise_level:.2}",
        plate.plate_number
    );
    Ok(GeneratedSample {
        original,
        distorted,
        metadata: SampleMetadata {
            idx,
            plate_number: plate.plate_number,
            alpha,
            beta: DEFAULT_BETA,
            noise_level,
        },
    })
}

/// 依次写出原图、畸变图与元数据。
///
/// 任一步失败时删除该序号的全部三类文件（包括此前运行留下的旧文件），
/// 目录中不会残留不完整的样本。
pub fn persist_sample(
    dir: &Path,
    sample: &GeneratedSample,
) -> std::result::Result<(), SampleError> {
    let outcome = write_artifacts(dir, sample);
    if outcome.is_err() {
        remove_sample_artifacts(dir, sample.metadata.idx);
    }
    outcome
}

fn remove_sample_artifacts(dir: &Path, idx: usize) {
    for family in ArtifactFamily::ALL {
        let path = dir.join(family.file_name(idx));
        match fs::remove_file(&path) {
            Ok(()) => debug!("已回滚 {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("回滚 {} 失败：{err}", path.display()),
        }
    }
}

fn write_artifacts(
    dir: &Path,
    sample: &GeneratedSample,
) -> std::result::Result<(), SampleError> {
    let idx = sample.metadata.idx;

    let path = dir.join(ArtifactFamily::Original.file_name(idx));
    write_png(idx, &path, &sample.original)?;

    let path = dir.join(ArtifactFamily::Distorted.file_name(idx));
    write_png(idx, &path, &sample.distorted)?;

    let path = dir.join(ArtifactFamily::Metadata.file_name(idx));
    let bytes = sample.metadata.to_json().map_err(|err| SampleError::Encode {
        idx,
        path: path.clone(),
        reason: err.to_string(),
    })?;
    fs::write(&path, bytes).map_err(|source| SampleError::Io { idx, path, source })
}

fn write_png(idx: usize, path: &Path, image: &Mat) -> std::result::Result<(), SampleError> {
    let encode_err = |reason: String| SampleError::Encode {
        idx,
        path: path.to_path_buf(),
        reason,
    };
    let params = Vector::<i32>::new();
    let path_str = path.to_string_lossy();
    let success = imgcodecs::imwrite(&path_str, image, &params)
        .map_err(|err| encode_err(err.to_string()))?;
    if !success {
        return Err(encode_err("OpenCV 未能写入图像".into()));
    }
    Ok(())
}
