use anyhow::{Context, Result, bail};
use clap::Parser;
use plate_gen::{
    AlphaRanges, DEFAULT_FONT, FailurePolicy, GenerateConfig, PlateSpec, ValueRange, generate,
};
use std::path::PathBuf;

/// 命令行参数：输出位置、样本数、畸变与噪声范围、车牌尺寸。
#[derive(Parser, Debug)]
#[command(
    name = "plate-gen",
    version,
    about = "生成成对的清晰/透视畸变车牌图像及元数据"
)]
struct Args {
    /// 需要的样本数；目录中多出的旧样本会被删除
    #[arg(long, default_value_t = 5)]
    num_samples: usize,

    /// 输出目录
    #[arg(long, default_value = "data")]
    output_dir: PathBuf,

    /// 负向偏航角范围（度），格式 lo,hi
    #[arg(long, default_value = "-85,-85", value_parser = parse_range, allow_hyphen_values = true)]
    alpha_negative: ValueRange,

    /// 正向偏航角范围（度），格式 lo,hi
    #[arg(long, default_value = "85,85", value_parser = parse_range, allow_hyphen_values = true)]
    alpha_positive: ValueRange,

    /// 噪声标准差范围，格式 lo,hi
    #[arg(long, default_value = "100,150", value_parser = parse_range)]
    noise_range: ValueRange,

    /// 尺寸系数：0=128x32，1=256x64，2=512x128，3=1024x256
    #[arg(long, default_value_t = 2)]
    size_factor: u32,

    /// 覆盖尺寸系数得到的车牌宽度
    #[arg(long)]
    width: Option<u32>,

    /// 覆盖尺寸系数得到的车牌高度
    #[arg(long)]
    height: Option<u32>,

    /// 覆盖尺寸系数得到的字号
    #[arg(long)]
    text_size: Option<u32>,

    /// 字体文件路径或文件名（在系统字体目录中查找），找不到时使用内置字体
    #[arg(long, default_value = DEFAULT_FONT)]
    font: PathBuf,

    /// 指定随机种子以复现数据集
    #[arg(long)]
    seed: Option<u64>,

    /// 并行线程数，默认使用全部 CPU 核
    #[arg(long)]
    workers: Option<usize>,

    /// 几何退化的样本只记录并跳过，而不是终止整个生成
    #[arg(long, default_value_t = false)]
    skip_failed: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = build_config(args)?;
    let report = generate(&config)?;

    println!(
        "完成：写出 {}/{} 个样本，跳过 {} 个，清理旧文件 {} 个，种子 {}，输出目录：{}",
        report.written.len(),
        report.requested,
        report.skipped.len(),
        report.removed.removed_count(),
        report.seed,
        config.output_dir.display()
    );
    Ok(())
}

/// 把命令行参数映射为生成配置。
fn build_config(args: Args) -> Result<GenerateConfig> {
    let mut plate = PlateSpec::from_size_factor(args.size_factor)
        .with_context(|| format!("无效的尺寸系数 {}", args.size_factor))?;
    if let Some(width) = args.width {
        plate.width = width;
    }
    if let Some(height) = args.height {
        plate.height = height;
    }
    if let Some(text_size) = args.text_size {
        plate.text_size = text_size;
    }

    let config = GenerateConfig {
        num_samples: args.num_samples,
        output_dir: args.output_dir,
        alpha_ranges: AlphaRanges {
            negative: args.alpha_negative,
            positive: args.alpha_positive,
        },
        noise_level_range: args.noise_range,
        plate,
        font_path: Some(args.font),
        seed: args.seed,
        workers: args.workers,
        failure_policy: if args.skip_failed {
            FailurePolicy::Skip
        } else {
            FailurePolicy::Abort
        },
    };
    config.validate()?;
    Ok(config)
}

/// 解析 `lo,hi` 形式的区间；单个数值表示退化区间 `[v, v]`。
fn parse_range(raw: &str) -> Result<ValueRange> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    let (lo, hi) = match parts.as_slice() {
        [v] => (*v, *v),
        [lo, hi] => (*lo, *hi),
        _ => bail!("区间格式应为 lo,hi：{raw}"),
    };
    let lo: f64 = lo.parse().with_context(|| format!("无法解析下界 {lo}"))?;
    let hi: f64 = hi.parse().with_context(|| format!("无法解析上界 {hi}"))?;
    Ok(ValueRange::new(lo, hi))
}
