//! 合成车牌数据集生成：渲染车牌 → 三维透视畸变 → 畸变域加噪 → 逆变换还原 → 裁剪，
//! 输出成对的 `original_<idx>.png` / `distorted_<idx>.png` 与 `metadata_<idx>.json`。

pub mod config;
pub mod font;
pub mod inventory;
pub mod metadata;
pub mod orchestrator;
pub mod synth;

pub use config::{AlphaRanges, DEFAULT_FONT, FailurePolicy, GenerateConfig, PlateSpec, ValueRange};
pub use font::PlateFont;
pub use inventory::{ArtifactFamily, DatasetInventory, ReconcileReport, reconcile};
pub use metadata::SampleMetadata;
pub use orchestrator::{
    CancelToken, GeneratedSample, GenerationReport, SampleError, SkippedSample, build_sample,
    generate, generate_with_cancel, persist_sample, sample_rng,
};
pub use synth::{PlateSynthesizer, SynthesizedPlate, random_plate_number};
