use crate::error::{Result, SyncError};
use regex::Regex;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// 文件扫描器配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 文件名过滤模式（`*` 任意字符，`?` 单个字符）
    pub filter_pattern: String,
    /// 忽略规则：路径包含任一规则即被排除
    pub ignore_rules: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            filter_pattern: "*".to_string(),
            ignore_rules: Vec::new(),
        }
    }
}

impl ScanConfig {
    pub fn new(filter_pattern: impl Into<String>, ignore_rules: Vec<String>) -> Self {
        Self {
            filter_pattern: filter_pattern.into(),
            ignore_rules,
        }
    }

    /// 追加一条忽略规则
    pub fn ignoring(mut self, rule: impl Into<String>) -> Self {
        self.ignore_rules.push(rule.into());
        self
    }
}

/// 文件扫描器
#[derive(Debug, Clone)]
pub struct FileScanner {
    config: ScanConfig,
    /// None 表示匹配所有文件名
    filter: Option<Regex>,
}

impl FileScanner {
    pub fn with_config(config: ScanConfig) -> Result<Self> {
        let filter = Self::compile_pattern(&config.filter_pattern)?;
        Ok(Self { config, filter })
    }

    /// 将简单 glob 转换为正则
    fn compile_pattern(pattern: &str) -> Result<Option<Regex>> {
        let pattern = pattern.trim();
        if pattern.is_empty() || pattern.chars().all(|c| c == '*') {
            return Ok(None);
        }

        let regex_pattern = regex::escape(pattern)
            .replace("\\*", ".*")
            .replace("\\?", ".");

        Ok(Some(Regex::new(&format!("^{}$", regex_pattern))?))
    }

    /// 检查路径是否应该被排除
    pub fn should_exclude(&self, path: &str) -> bool {
        self.config
            .ignore_rules
            .iter()
            .any(|rule| path.contains(rule.as_str()))
    }

    /// 文件名是否匹配过滤模式
    fn matches_filter(&self, file_name: &str) -> bool {
        self.filter
            .as_ref()
            .map(|re| re.is_match(file_name))
            .unwrap_or(true)
    }

    /// 规范化路径分隔符（统一使用 /）
    pub fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    /// 递归列出根目录下的所有文件（相对路径，已排序）
    pub fn scan_files(&self, root: &Path) -> Result<Vec<String>> {
        let files = self.walk(root, false)?;
        debug!("扫描文件完成: {} ({} 个文件)", root.display(), files.len());
        Ok(files)
    }

    /// 递归列出根目录下的所有子目录（相对路径，已排序）
    pub fn scan_dirs(&self, root: &Path) -> Result<Vec<String>> {
        let dirs = self.walk(root, true)?;
        debug!("扫描目录完成: {} ({} 个目录)", root.display(), dirs.len());
        Ok(dirs)
    }

    fn walk(&self, root: &Path, dirs: bool) -> Result<Vec<String>> {
        if !root.is_dir() {
            return Err(SyncError::MissingRoot(root.to_path_buf()));
        }

        let mut paths = Vec::new();

        for entry in WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|source| SyncError::Scan {
                path: root.to_path_buf(),
                source,
            })?;

            let file_type = entry.file_type();
            if dirs {
                if !file_type.is_dir() {
                    continue;
                }
            } else if !file_type.is_file()
                || !self.matches_filter(&entry.file_name().to_string_lossy())
            {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let relative = Self::normalize_path(&relative.to_string_lossy());

            if self.should_exclude(&relative) {
                continue;
            }

            paths.push(relative);
        }

        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}
