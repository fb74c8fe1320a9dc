//! 输出目录的文件清点与按目标样本数裁剪。
//!
//! 目录里有三类并列文件：`original_<idx>.png`、`distorted_<idx>.png` 与
//! `metadata_<idx>.json`。清点只看文件名前后缀，不读取文件内容。

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 三类输出文件。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactFamily {
    Original,
    Distorted,
    Metadata,
}

impl ArtifactFamily {
    pub const ALL: [Self; 3] = [Self::Original, Self::Distorted, Self::Metadata];

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Original => "original_",
            Self::Distorted => "distorted_",
            Self::Metadata => "metadata_",
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Original | Self::Distorted => ".png",
            Self::Metadata => ".json",
        }
    }

    /// 第 `idx` 个样本在该类中的文件名。
    pub fn file_name(self, idx: usize) -> String {
        format!("{}{idx}{}", self.prefix(), self.suffix())
    }

    /// 文件名是否属于该类（只比较前后缀）。
    pub fn matches(self, name: &str) -> bool {
        name.len() >= self.prefix().len() + self.suffix().len()
            && name.starts_with(self.prefix())
            && name.ends_with(self.suffix())
    }

    /// 从文件名解析样本序号，不属于该类或序号不是十进制整数时返回 `None`。
    pub fn parse_index(self, name: &str) -> Option<usize> {
        let digits = name
            .strip_prefix(self.prefix())?
            .strip_suffix(self.suffix())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    fn slot(self) -> usize {
        match self {
            Self::Original => 0,
            Self::Distorted => 1,
            Self::Metadata => 2,
        }
    }
}

impl std::fmt::Display for ArtifactFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Original => "original",
            Self::Distorted => "distorted",
            Self::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

/// 输出目录的快照：每类文件按文件名字典序排列。
#[derive(Debug, Clone, Default)]
pub struct DatasetInventory {
    root: PathBuf,
    files: [Vec<String>; 3],
}

impl DatasetInventory {
    /// 扫描目录，目录不存在时返回空清单。
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut inventory = Self {
            root: dir.to_path_buf(),
            files: Default::default(),
        };
        if !dir.exists() {
            return Ok(inventory);
        }

        for entry in
            fs::read_dir(dir).with_context(|| format!("无法读取目录 {}", dir.display()))?
        {
            let entry = entry.with_context(|| format!("遍历目录失败：{}", dir.display()))?;
            let is_file = entry
                .file_type()
                .with_context(|| format!("无法读取文件类型：{}", entry.path().display()))?
                .is_file();
            if !is_file {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if let Some(family) = ArtifactFamily::ALL.into_iter().find(|f| f.matches(&name)) {
                inventory.files[family.slot()].push(name);
            }
        }

        for names in &mut inventory.files {
            names.sort();
        }
        Ok(inventory)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 某一类文件名（字典序）。
    pub fn files(&self, family: ArtifactFamily) -> &[String] {
        &self.files[family.slot()]
    }

    /// 三类文件数量的最小值，即“已有样本数”。
    pub fn existing_samples(&self) -> usize {
        self.files.iter().map(Vec::len).min().unwrap_or(0)
    }

    /// 某一类中可解析的样本序号。
    pub fn indices(&self, family: ArtifactFamily) -> BTreeSet<usize> {
        self.files(family)
            .iter()
            .filter_map(|name| family.parse_index(name))
            .collect()
    }

    /// 三类文件齐全的样本序号，升序。
    pub fn complete_indices(&self) -> Vec<usize> {
        let distorted = self.indices(ArtifactFamily::Distorted);
        let metadata = self.indices(ArtifactFamily::Metadata);
        self.indices(ArtifactFamily::Original)
            .into_iter()
            .filter(|idx| distorted.contains(idx) && metadata.contains(idx))
            .collect()
    }

    /// 三类文件的序号集合是否完全一致。
    pub fn in_sync(&self) -> bool {
        let original = self.indices(ArtifactFamily::Original);
        original == self.indices(ArtifactFamily::Distorted)
            && original == self.indices(ArtifactFamily::Metadata)
    }
}

/// 一次裁剪的结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// 裁剪前的已有样本数（三类文件数量的最小值）。
    pub existing: usize,
    /// 被删除的文件名，按类别分组。
    pub removed: Vec<(ArtifactFamily, Vec<String>)>,
}

impl ReconcileReport {
    pub fn removed_count(&self) -> usize {
        self.removed.iter().map(|(_, names)| names.len()).sum()
    }
}

/// 已有样本数超过 `num_samples` 时，从每类文件中删除字典序最靠后的多余文件。
///
/// 三类文件各自独立裁剪，并不保证剩下的文件序号一一对应；
/// 若发现三类文件的序号集合本就不一致，会记录警告。
pub fn reconcile(dir: &Path, num_samples: usize) -> Result<ReconcileReport> {
    let inventory = DatasetInventory::scan(dir)?;
    let existing = inventory.existing_samples();
    let mut report = ReconcileReport {
        existing,
        removed: Vec::new(),
    };

    if !inventory.in_sync() {
        warn!(
            "输出目录 {} 中三类文件的序号不一致（original {}，distorted {}，metadata {}），按文件名独立裁剪可能留下不成套的样本",
            dir.display(),
            inventory.files(ArtifactFamily::Original).len(),
            inventory.files(ArtifactFamily::Distorted).len(),
            inventory.files(ArtifactFamily::Metadata).len(),
        );
    }

    let extra = existing.saturating_sub(num_samples);
    if extra == 0 {
        debug!("已有 {existing} 个样本，无需裁剪");
        return Ok(report);
    }

    for family in ArtifactFamily::ALL {
        let names = inventory.files(family);
        let doomed = &names[names.len() - extra..];
        for name in doomed {
            let path = dir.join(name);
            fs::remove_file(&path)
                .with_context(|| format!("删除多余文件失败：{}", path.display()))?;
        }
        report.removed.push((family, doomed.to_vec()));
    }

    info!(
        "已有 {existing} 个样本，目标 {num_samples} 个，每类删除 {extra} 个文件"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    fn populate(dir: &Path, indices: impl IntoIterator<Item = usize>) {
        for idx in indices {
            for family in ArtifactFamily::ALL {
                touch(dir, &family.file_name(idx));
            }
        }
    }

    #[test]
    fn file_names_round_trip_through_parse_index() {
        assert_eq!(ArtifactFamily::Original.file_name(12), "original_12.png");
        assert_eq!(ArtifactFamily::Metadata.file_name(0), "metadata_0.json");
        assert_eq!(ArtifactFamily::Distorted.parse_index("distorted_7.png"), Some(7));
        assert_eq!(ArtifactFamily::Distorted.parse_index("distorted_7.json"), None);
        assert_eq!(ArtifactFamily::Original.parse_index("original_.png"), None);
        assert_eq!(ArtifactFamily::Original.parse_index("original_x1.png"), None);
    }

    #[test]
    fn scan_ignores_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path(), 0..2);
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "original_0.jpg");
        fs::create_dir(dir.path().join("original_9.png")).unwrap();

        let inventory = DatasetInventory::scan(dir.path()).unwrap();
        assert_eq!(
            inventory.files(ArtifactFamily::Original),
            ["original_0.png", "original_1.png"]
        );
        assert_eq!(inventory.existing_samples(), 2);
        assert!(inventory.in_sync());
    }

    #[test]
    fn scan_of_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let inventory = DatasetInventory::scan(&dir.path().join("absent")).unwrap();
        assert_eq!(inventory.existing_samples(), 0);
        assert!(inventory.complete_indices().is_empty());
    }

    #[test]
    fn reconcile_trims_eight_to_five() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path(), 0..8);

        let report = reconcile(dir.path(), 5).unwrap();
        assert_eq!(report.existing, 8);
        assert_eq!(report.removed.len(), 3);
        for (family, names) in &report.removed {
            assert_eq!(names.len(), 3, "{family}");
        }
        assert_eq!(report.removed_count(), 9);

        let inventory = DatasetInventory::scan(dir.path()).unwrap();
        assert_eq!(inventory.existing_samples(), 5);
        assert_eq!(inventory.complete_indices(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn reconcile_keeps_smaller_directory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path(), 0..3);
        let report = reconcile(dir.path(), 5).unwrap();
        assert_eq!(report.existing, 3);
        assert_eq!(report.removed_count(), 0);
        assert_eq!(DatasetInventory::scan(dir.path()).unwrap().existing_samples(), 3);
    }

    #[test]
    fn reconcile_trims_by_name_order_not_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path(), 0..12);

        reconcile(dir.path(), 10).unwrap();
        // 字典序中 "8"、"9" 排在 "10"、"11" 之后。
        let remaining = DatasetInventory::scan(dir.path()).unwrap().complete_indices();
        assert_eq!(remaining, vec![0, 1, 2, 3, 4, 5, 6, 7, 10, 11]);
    }

    #[test]
    fn out_of_sync_families_are_trimmed_independently() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path(), 0..4);
        touch(dir.path(), &ArtifactFamily::Original.file_name(4));
        touch(dir.path(), &ArtifactFamily::Metadata.file_name(4));

        let inventory = DatasetInventory::scan(dir.path()).unwrap();
        assert!(!inventory.in_sync());
        assert_eq!(inventory.existing_samples(), 4);

        reconcile(dir.path(), 3).unwrap();
        let inventory = DatasetInventory::scan(dir.path()).unwrap();
        // original 与 metadata 删掉的是序号 4，distorted 删掉的是序号 3。
        assert_eq!(inventory.complete_indices(), vec![0, 1, 2]);
        assert!(inventory.indices(ArtifactFamily::Original).contains(&3));
        assert!(!inventory.indices(ArtifactFamily::Distorted).contains(&3));
    }
}
