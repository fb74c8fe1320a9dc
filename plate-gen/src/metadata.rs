use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// `metadata_<idx>.json` 中保存的单个样本记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub idx: usize,
    /// 6 位以空格分隔的数字。
    pub plate_number: String,
    /// 偏航角（度）。
    pub alpha: f64,
    /// 俯仰角（度）。
    pub beta: f64,
    /// 噪声标准差。
    pub noise_level: f64,
}

impl SampleMetadata {
    /// 紧凑 JSON 编码。
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("无法打开元数据文件 {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("解析元数据失败：{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_uses_flat_field_names() {
        let record = SampleMetadata {
            idx: 4,
            plate_number: "1 2 3 4 5 6".into(),
            alpha: -85.0,
            beta: 0.0,
            noise_level: 120.5,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["idx"], 4);
        assert_eq!(value["plate_number"], "1 2 3 4 5 6");
        assert_eq!(value["alpha"], -85.0);
        assert_eq!(value["noise_level"], 120.5);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata_4.json");
        std::fs::write(&path, record.to_json().unwrap()).unwrap();
        assert_eq!(SampleMetadata::read(&path).unwrap(), record);
    }
}
