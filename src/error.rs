//! 错误类型

use std::path::PathBuf;
use thiserror::Error;

/// 同步过程中的错误
#[derive(Error, Debug)]
pub enum SyncError {
    /// 源路径与目标路径互相包含
    #[error("源路径与目标路径必须完全不同: {source_root} <-> {target_root}")]
    PathOverlap {
        source_root: PathBuf,
        target_root: PathBuf,
    },

    /// 根目录不存在
    #[error("目录不存在: {0}")]
    MissingRoot(PathBuf),

    /// 遍历目录失败
    #[error("扫描目录失败 {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// 过滤模式无效
    #[error("无效的过滤模式: {0}")]
    Pattern(#[from] regex::Error),

    /// 单个文件的 IO 错误
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 哈希索引行格式错误
    #[error("哈希索引第 {line} 行格式错误: {content:?}")]
    Format { line: usize, content: String },

    /// 并发控制被关闭
    #[error("并发控制已关闭")]
    PoolClosed(#[from] tokio::sync::AcquireError),

    /// 工作线程异常退出
    #[error("工作线程异常: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// 是否为前置条件错误（在任何修改之前终止）
    pub fn is_precondition(&self) -> bool {
        matches!(self, SyncError::PathOverlap { .. } | SyncError::MissingRoot(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
