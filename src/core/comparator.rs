use crate::core::detector::{ChangeDetector, DetectContext};
use crate::error::Result;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// 源目录与目标目录的差异
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    /// 仅在源目录中存在（新增）
    pub added: Vec<String>,
    /// 仅在目标目录中存在（需删除）
    pub removed: Vec<String>,
    /// 两侧都存在
    pub common: Vec<String>,
    /// 两侧都存在但内容不同（common 的子集）
    pub modified: Vec<String>,
    /// 每个共同文件的源哈希（仅 Hash 模式，与 common 对齐）
    pub source_hashes: Option<Vec<Option<String>>>,
}

impl DiffResult {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// 目录差异比较器
pub struct FileComparator;

impl FileComparator {
    /// 集合差运算，返回（仅源，仅目标，共同），结果已排序
    pub fn diff(source: &[String], target: &[String]) -> (Vec<String>, Vec<String>, Vec<String>) {
        let source_set: HashSet<&str> = source.iter().map(String::as_str).collect();
        let target_set: HashSet<&str> = target.iter().map(String::as_str).collect();

        let mut added: Vec<String> = source_set
            .difference(&target_set)
            .map(|s| s.to_string())
            .collect();
        let mut removed: Vec<String> = target_set
            .difference(&source_set)
            .map(|s| s.to_string())
            .collect();
        let added_set: HashSet<&str> = added.iter().map(String::as_str).collect();
        let mut common: Vec<String> = source_set
            .iter()
            .filter(|s| !added_set.contains(*s))
            .map(|s| s.to_string())
            .collect();

        added.sort();
        removed.sort();
        common.sort();

        (added, removed, common)
    }

    /// 仅在目标中存在的目录，只保留最上层的目录
    pub fn diff_dirs(source_dirs: &[String], target_dirs: &[String]) -> Vec<String> {
        let (_, removed, _) = Self::diff(source_dirs, target_dirs);
        let removed_set: HashSet<&str> = removed.iter().map(String::as_str).collect();

        // 祖先目录也会被删除的目录无需单独处理
        removed
            .iter()
            .filter(|dir| {
                !dir.match_indices('/')
                    .any(|(i, _)| removed_set.contains(&dir[..i]))
            })
            .cloned()
            .collect()
    }

    /// 计算完整差异，并用检测器找出被修改的文件
    pub async fn compare(
        source: &[String],
        target: &[String],
        detector: &ChangeDetector,
        ctx: &DetectContext,
    ) -> Result<DiffResult> {
        let (added, removed, common) = Self::diff(source, target);
        debug!(
            "差异: {} 个新增, {} 个删除, {} 个共同",
            added.len(),
            removed.len(),
            common.len()
        );

        let common = Arc::new(common);
        let detection = detector.classify_modified(common.clone(), ctx).await?;
        let common = Arc::try_unwrap(common).unwrap_or_else(|shared| shared.as_ref().clone());

        Ok(DiffResult {
            source_root: ctx.source_root.clone(),
            target_root: ctx.target_root.clone(),
            added,
            removed,
            common,
            modified: detection.modified,
            source_hashes: detection.source_hashes,
        })
    }
}
