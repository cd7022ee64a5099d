//! 复制进度统计

use crate::core::comparator::DiffResult;
use crate::core::pool::map_blocking;
use crate::error::Result;
use crate::logging::{LogSink, LogTarget};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// 格式化字节数（二进制单位，保留一位小数）
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{}{}", bytes, UNITS[0]);
    }

    let mut value = bytes as f64;
    let mut place = 0;
    while value >= 1024.0 && place < UNITS.len() - 1 {
        value /= 1024.0;
        place += 1;
    }

    format!("{:.1}{}", value, UNITS[place])
}

/// 复制进度
///
/// 创建时统计所有新增和修改文件的大小，复制过程中按下标累加。
pub struct ProgressTracker {
    new_sizes: Vec<u64>,
    modified_sizes: Vec<u64>,
    new_total: u64,
    modified_total: u64,
    new_done: AtomicU64,
    modified_done: AtomicU64,
    sink: LogSink,
}

impl ProgressTracker {
    pub async fn new(diff: &DiffResult, max_concurrent: usize, sink: LogSink) -> Result<Self> {
        sink.line("正在统计新文件大小");
        let new_sizes = Self::sizes(&diff.source_root, &diff.added, max_concurrent).await?;
        let new_total = new_sizes.iter().sum();
        sink.line(format!("新文件: {}", format_bytes(new_total)));

        sink.line("正在统计修改文件大小");
        let modified_sizes = Self::sizes(&diff.source_root, &diff.modified, max_concurrent).await?;
        let modified_total = modified_sizes.iter().sum();
        sink.line(format!("修改文件: {}", format_bytes(modified_total)));
        sink.line(format!(
            "共需复制: {}",
            format_bytes(new_total + modified_total)
        ));

        Ok(Self {
            new_sizes,
            modified_sizes,
            new_total,
            modified_total,
            new_done: AtomicU64::new(0),
            modified_done: AtomicU64::new(0),
            sink,
        })
    }

    /// 并行获取文件大小，失败记为 0
    async fn sizes(root: &Path, paths: &[String], max_concurrent: usize) -> Result<Vec<u64>> {
        let paths: Arc<Vec<PathBuf>> = Arc::new(paths.iter().map(|p| root.join(p)).collect());
        let count = paths.len();
        map_blocking(count, max_concurrent, move |i| {
            std::fs::metadata(&paths[i]).map(|m| m.len()).unwrap_or(0)
        })
        .await
    }

    pub fn new_total(&self) -> u64 {
        self.new_total
    }

    pub fn modified_total(&self) -> u64 {
        self.modified_total
    }

    pub fn total(&self) -> u64 {
        self.new_total + self.modified_total
    }

    pub fn new_done(&self) -> u64 {
        self.new_done.load(Ordering::Relaxed)
    }

    pub fn modified_done(&self) -> u64 {
        self.modified_done.load(Ordering::Relaxed)
    }

    pub fn copied(&self) -> u64 {
        self.new_done() + self.modified_done()
    }

    /// 第 `index` 个新文件处理完成
    pub fn add_new(&self, index: usize) {
        let size = self.new_sizes.get(index).copied().unwrap_or(0);
        self.new_done.fetch_add(size, Ordering::Relaxed);
    }

    /// 第 `index` 个修改文件处理完成
    pub fn add_modified(&self, index: usize) {
        let size = self.modified_sizes.get(index).copied().unwrap_or(0);
        self.modified_done.fetch_add(size, Ordering::Relaxed);
    }

    pub fn report_line(&self) -> String {
        format!(
            "新文件: {} / {}, 修改文件: {} / {}, 总计: {} / {}",
            format_bytes(self.new_done()),
            format_bytes(self.new_total),
            format_bytes(self.modified_done()),
            format_bytes(self.modified_total),
            format_bytes(self.copied()),
            format_bytes(self.total()),
        )
    }

    pub fn write_report(&self, target: LogTarget) {
        self.sink.write_line(self.report_line(), target);
    }

    pub fn write_new_file_detail(&self, source: &str, target: &str, index: usize) {
        let size = self.new_sizes.get(index).copied().unwrap_or(0);
        self.sink.write_line(
            format!(
                "已复制 {} 到 {}, 大小 {} --- 新文件: {} / {}",
                source,
                target,
                format_bytes(size),
                format_bytes(self.new_done()),
                format_bytes(self.new_total)
            ),
            LogTarget::FILE,
        );
    }

    pub fn write_modified_file_detail(&self, source: &str, target: &str, index: usize) {
        let size = self.modified_sizes.get(index).copied().unwrap_or(0);
        self.sink.write_line(
            format!(
                "已覆盖 {} 到 {}, 大小 {} --- 修改文件: {} / {}",
                source,
                target,
                format_bytes(size),
                format_bytes(self.modified_done()),
                format_bytes(self.modified_total)
            ),
            LogTarget::FILE,
        );
    }
}
