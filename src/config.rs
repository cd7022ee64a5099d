//! 同步配置模块

use crate::logging::LogConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 文件差异检测方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    /// 比较修改时间
    #[default]
    Timestamp,
    /// 逐字节比较
    Binary,
    /// 比较内容哈希（目标目录保存哈希索引）
    Hash,
}

impl std::fmt::Display for CompareMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareMode::Timestamp => write!(f, "timestamp"),
            CompareMode::Binary => write!(f, "binary"),
            CompareMode::Hash => write!(f, "hash"),
        }
    }
}

/// 一对 源目录 / 目标目录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPair {
    pub source: PathBuf,
    pub target: PathBuf,
    /// 文件名过滤模式
    #[serde(default = "default_filter")]
    pub filter: String,
    /// 忽略规则（子串匹配）
    #[serde(default)]
    pub ignore: Vec<String>,
}

fn default_filter() -> String {
    "*".to_string()
}

impl SyncPair {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            filter: default_filter(),
            ignore: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_ignore<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore = rules.into_iter().map(Into::into).collect();
        self
    }

    /// 补全缺省值并统一路径分隔符
    pub fn normalized(mut self) -> Self {
        if self.filter.trim().is_empty() {
            self.filter = default_filter();
        }
        self.ignore = self
            .ignore
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| r.replace('\\', "/"))
            .collect();
        self
    }
}

/// 同步选项
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    #[serde(default)]
    pub mode: CompareMode,
    /// 时间比较的容差（毫秒），仅用于 Timestamp 模式
    #[serde(default)]
    pub time_resolution_ms: u64,
    /// 每个阶段输出到控制台的进度报告次数
    #[serde(default = "default_report_count")]
    pub report_count: usize,
    /// 最大并发数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_report_count() -> usize {
    100
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mode: CompareMode::default(),
            time_resolution_ms: 0,
            report_count: default_report_count(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl SyncOptions {
    pub fn with_mode(mut self, mode: CompareMode) -> Self {
        self.mode = mode;
        self
    }
}

/// 多目录对配置文件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairConfigFile {
    pub pairs: Vec<SyncPair>,
    /// 文件中指定的检测方式，覆盖命令行默认值
    #[serde(default)]
    pub mode: Option<CompareMode>,
    #[serde(default)]
    pub time_resolution_ms: Option<u64>,
    /// 运行日志设置
    #[serde(default)]
    pub log: Option<LogConfig>,
}

impl PairConfigFile {
    /// 从 JSON 文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config: PairConfigFile = serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;

        Ok(Self {
            pairs: config.pairs.into_iter().map(SyncPair::normalized).collect(),
            ..config
        })
    }

    /// 保存为 JSON 文件
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 合并文件中的选项
    pub fn apply_to(&self, mut options: SyncOptions) -> SyncOptions {
        if let Some(mode) = self.mode {
            options.mode = mode;
        }
        if let Some(res) = self.time_resolution_ms {
            options.time_resolution_ms = res;
        }
        options
    }
}
