#![recursion_limit = "256"]

pub mod dataset;
pub mod model;

pub use dataset::{
    PlatePairBatch, PlatePairBatcher, PlatePairDataset, PlatePairDatasetConfig, PlatePairSample,
    tensor_to_images,
};
pub use model::{DoubleConv, PatchGanDiscriminator, UNetGenerator};
