use anyhow::{Context, Result, anyhow, ensure};
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder, batcher::Batcher},
    data::dataset::Dataset,
    tensor::{Tensor, TensorData, backend::Backend},
};
use image::{DynamicImage, RgbImage, imageops::FilterType};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::Deserialize;
use std::{
    collections::BTreeSet,
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, warn};

const CHANNELS: usize = 3;
const ORIGINAL_PREFIX: &str = "original_";
const IMAGE_SUFFIX: &str = ".png";

/// 读取生成目录的基本配置。
#[derive(Clone, Debug)]
pub struct PlatePairDatasetConfig {
    /// `plate-gen` 的输出目录。
    pub root: PathBuf,
    /// 送入网络的宽度，需为 16 的倍数。
    pub width: u32,
    /// 送入网络的高度，需为 16 的倍数。
    pub height: u32,
}

impl PlatePairDatasetConfig {
    /// 参考车牌尺寸 512x128。
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            width: 512,
            height: 128,
        }
    }
}

#[derive(Clone, Debug)]
struct PairEntry {
    idx: usize,
    plate_number: String,
}

#[derive(Deserialize)]
struct PairMetadata {
    idx: usize,
    plate_number: String,
}

/// 单个样本：畸变图作为输入，原图作为目标，像素已缩放到 `[-1, 1]`，CHW 排列。
#[derive(Clone, Debug)]
pub struct PlatePairSample {
    pub idx: usize,
    pub plate_number: String,
    pub input: Vec<f32>,
    pub target: Vec<f32>,
}

/// 批数据：`inputs` 与 `targets` 形状均为 `[N, 3, H, W]`。
#[derive(Clone, Debug)]
pub struct PlatePairBatch<B: Backend> {
    pub inputs: Tensor<B, 4>,
    pub targets: Tensor<B, 4>,
}

/// 从生成目录中读取完整的（原图，畸变图，元数据）三元组。
#[derive(Clone)]
pub struct PlatePairDataset {
    root: Arc<PathBuf>,
    entries: Arc<Vec<PairEntry>>,
    width: u32,
    height: u32,
}

impl PlatePairDataset {
    /// 扫描目录，只收录三类文件齐全的样本序号。
    pub fn from_config(config: &PlatePairDatasetConfig) -> Result<Self> {
        ensure!(
            config.width > 0
                && config.height > 0
                && config.width % 16 == 0
                && config.height % 16 == 0,
            "网络输入尺寸必须是 16 的正整数倍，当前为 {}x{}",
            config.width,
            config.height
        );

        let mut indices = BTreeSet::new();
        for entry in fs::read_dir(&config.root)
            .with_context(|| format!("无法读取数据目录 {}", config.root.display()))?
        {
            let entry =
                entry.with_context(|| format!("遍历数据目录失败：{}", config.root.display()))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if let Some(idx) = parse_original_index(&name) {
                indices.insert(idx);
            }
        }

        let mut entries = Vec::with_capacity(indices.len());
        for idx in indices {
            let distorted = config.root.join(distorted_name(idx));
            let metadata_path = config.root.join(metadata_name(idx));
            if !distorted.is_file() || !metadata_path.is_file() {
                warn!("样本 {idx} 不完整，已忽略");
                continue;
            }

            let file = File::open(&metadata_path)
                .with_context(|| format!("无法打开元数据 {}", metadata_path.display()))?;
            let metadata: PairMetadata = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("解析元数据失败：{}", metadata_path.display()))?;
            if metadata.idx != idx {
                warn!(
                    "元数据 {} 记录的序号为 {}，与文件名不一致",
                    metadata_path.display(),
                    metadata.idx
                );
            }

            entries.push(PairEntry {
                idx,
                plate_number: metadata.plate_number,
            });
        }

        if entries.is_empty() {
            return Err(anyhow!("目录 {} 中没有完整的样本", config.root.display()));
        }
        debug!("从 {} 载入 {} 个样本", config.root.display(), entries.len());

        Ok(Self {
            root: Arc::new(config.root.clone()),
            entries: Arc::new(entries),
            width: config.width,
            height: config.height,
        })
    }

    fn with_entries(&self, entries: Vec<PairEntry>) -> Self {
        Self {
            root: self.root.clone(),
            entries: Arc::new(entries),
            width: self.width,
            height: self.height,
        }
    }

    /// 返回 (宽, 高)。
    pub fn image_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 收录的样本序号，升序。
    pub fn indices(&self) -> Vec<usize> {
        self.entries.iter().map(|entry| entry.idx).collect()
    }

    /// 将数据集随机划分为训练集与验证集。
    pub fn split(&self, val_fraction: f32, seed: u64) -> (Self, Self) {
        if val_fraction <= 0.0 {
            return (self.clone(), self.with_entries(Vec::new()));
        }

        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let val_count = ((order.len() as f32) * val_fraction)
            .round()
            .clamp(0.0, order.len() as f32) as usize;
        let (val, train) = order.split_at(val_count);

        let pick = |slice: &[usize]| -> Vec<PairEntry> {
            slice.iter().map(|&i| self.entries[i].clone()).collect()
        };
        (self.with_entries(pick(train)), self.with_entries(pick(val)))
    }

    pub fn batcher<B: Backend>(&self) -> PlatePairBatcher<B> {
        PlatePairBatcher::new(self.height as usize, self.width as usize)
    }

    /// 构建 DataLoader；`shuffle_seed` 为 `None` 时按序号顺序输出。
    pub fn loader<B: Backend>(
        &self,
        batch_size: usize,
        shuffle_seed: Option<u64>,
        device: B::Device,
    ) -> Arc<dyn DataLoader<B, PlatePairBatch<B>>> {
        let builder =
            DataLoaderBuilder::<B, PlatePairSample, PlatePairBatch<B>>::new(self.batcher::<B>())
                .batch_size(batch_size)
                .set_device(device);
        let builder = match shuffle_seed {
            Some(seed) => builder.shuffle(seed),
            None => builder,
        };
        builder.build(self.clone())
    }

    fn load(&self, entry: &PairEntry) -> Result<PlatePairSample> {
        let input = load_normalized(
            &self.root.join(distorted_name(entry.idx)),
            self.width,
            self.height,
        )?;
        let target = load_normalized(
            &self.root.join(original_name(entry.idx)),
            self.width,
            self.height,
        )?;
        Ok(PlatePairSample {
            idx: entry.idx,
            plate_number: entry.plate_number.clone(),
            input,
            target,
        })
    }
}

impl Dataset<PlatePairSample> for PlatePairDataset {
    fn get(&self, index: usize) -> Option<PlatePairSample> {
        let entry = self.entries.get(index)?;
        // Dataset 接口无法返回错误，读取失败直接中止，避免静默截断数据集。
        Some(
            self.load(entry)
                .unwrap_or_else(|err| panic!("读取样本 {} 失败：{err:#}", entry.idx)),
        )
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn original_name(idx: usize) -> String {
    format!("{ORIGINAL_PREFIX}{idx}{IMAGE_SUFFIX}")
}

fn distorted_name(idx: usize) -> String {
    format!("distorted_{idx}{IMAGE_SUFFIX}")
}

fn metadata_name(idx: usize) -> String {
    format!("metadata_{idx}.json")
}

fn parse_original_index(name: &str) -> Option<usize> {
    let digits = name
        .strip_prefix(ORIGINAL_PREFIX)?
        .strip_suffix(IMAGE_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn load_normalized(path: &Path, width: u32, height: u32) -> Result<Vec<f32>> {
    let image =
        image::open(path).with_context(|| format!("读取图像 {} 失败", path.display()))?;
    Ok(image_to_chw(image, width, height))
}

/// RGB 像素缩放到 `[-1, 1]` 并按 CHW 排列，尺寸不符时用 Lanczos 重采样。
fn image_to_chw(image: DynamicImage, width: u32, height: u32) -> Vec<f32> {
    let mut rgb = image.to_rgb8();
    if rgb.width() != width || rgb.height() != height {
        rgb = image::imageops::resize(&rgb, width, height, FilterType::Lanczos3);
    }

    let (w, h) = (width as usize, height as usize);
    let mut data = vec![0.0f32; CHANNELS * w * h];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..CHANNELS {
            data[c * w * h + y * w + x] = pixel[c] as f32 / 127.5 - 1.0;
        }
    }
    data
}

/// 把 `[N, 3, H, W]`、取值 `[-1, 1]` 的张量（例如生成器输出）还原为 RGB 图像。
pub fn tensor_to_images<B: Backend>(tensor: Tensor<B, 4>) -> Result<Vec<RgbImage>> {
    let [n, c, h, w] = tensor.dims();
    ensure!(c == CHANNELS, "需要 {CHANNELS} 通道张量，实际为 {c}");
    let values = tensor
        .into_data()
        .into_vec::<f32>()
        .map_err(|err| anyhow!("读取张量数据失败：{err:?}"))?;

    let plane = h * w;
    (0..n)
        .map(|i| {
            let sample = &values[i * CHANNELS * plane..(i + 1) * CHANNELS * plane];
            let mut raw = Vec::with_capacity(CHANNELS * plane);
            for p in 0..plane {
                for ch in 0..CHANNELS {
                    let v = (sample[ch * plane + p] + 1.0) * 127.5;
                    raw.push(v.round().clamp(0.0, 255.0) as u8);
                }
            }
            RgbImage::from_raw(w as u32, h as u32, raw)
                .ok_or_else(|| anyhow!("无法构造 {w}x{h} 的图像"))
        })
        .collect()
}

/// 将样本堆叠成批张量。
#[derive(Clone)]
pub struct PlatePairBatcher<B: Backend> {
    height: usize,
    width: usize,
    _marker: std::marker::PhantomData<B>,
}

impl<B: Backend> PlatePairBatcher<B> {
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, PlatePairSample, PlatePairBatch<B>> for PlatePairBatcher<B> {
    fn batch(&self, items: Vec<PlatePairSample>, device: &B::Device) -> PlatePairBatch<B> {
        let batch_size = items.len();
        let spatial = CHANNELS * self.height * self.width;
        let mut inputs = Vec::with_capacity(batch_size * spatial);
        let mut targets = Vec::with_capacity(batch_size * spatial);
        for sample in items {
            inputs.extend_from_slice(&sample.input);
            targets.extend_from_slice(&sample.target);
        }

        let shape = [batch_size, CHANNELS, self.height, self.width];
        PlatePairBatch {
            inputs: Tensor::<B, 4>::from_data(TensorData::new(inputs, shape), device),
            targets: Tensor::<B, 4>::from_data(TensorData::new(targets, shape), device),
        }
    }
}
