//! 修改检测 - 判断两侧都存在的文件是否需要覆盖
//!
//! 三种方式共享同一个入口 [`ChangeDetector::classify_modified`]：
//! 单个文件比较失败时记录错误并视为未修改，不重试也不中断。

use crate::config::{CompareMode, SyncOptions};
use crate::core::cache::{hash_file, HashIndex, HASH_INDEX_FILE};
use crate::core::pool::{map_blocking, should_report};
use crate::error::Result;
use crate::logging::{LogSink, LogTarget};
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// 逐字节比较时每次读取的字节数
const BYTES_TO_READ: usize = 8;

/// 检测所需的上下文
#[derive(Clone)]
pub struct DetectContext {
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    pub max_concurrent: usize,
    pub report_count: usize,
    pub sink: LogSink,
}

/// 检测结果
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// 需要覆盖的文件（与输入顺序一致）
    pub modified: Vec<String>,
    /// 每个共同文件的源哈希，仅 Hash 模式；计算失败为 None
    pub source_hashes: Option<Vec<Option<String>>>,
}

/// 单个文件的比较结果
struct Outcome {
    modified: bool,
    source_hash: Option<String>,
    detail: Option<String>,
}

/// 修改检测方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDetector {
    Timestamp { resolution: Duration },
    Binary,
    Hash,
}

impl ChangeDetector {
    pub fn from_options(options: &SyncOptions) -> Self {
        match options.mode {
            CompareMode::Timestamp => ChangeDetector::Timestamp {
                resolution: Duration::from_millis(options.time_resolution_ms),
            },
            CompareMode::Binary => ChangeDetector::Binary,
            CompareMode::Hash => ChangeDetector::Hash,
        }
    }

    /// 该方式在扫描时需要额外排除的文件
    pub fn reserved_file(&self) -> Option<&'static str> {
        match self {
            ChangeDetector::Hash => Some(HASH_INDEX_FILE),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ChangeDetector::Timestamp { .. } => "已比较修改时间",
            ChangeDetector::Binary => "已逐字节比较",
            ChangeDetector::Hash => "已计算哈希",
        }
    }

    /// 在共同文件中找出被修改的文件
    pub async fn classify_modified(
        &self,
        common: Arc<Vec<String>>,
        ctx: &DetectContext,
    ) -> Result<Detection> {
        match *self {
            ChangeDetector::Timestamp { resolution } => {
                let outcomes = run(self.label(), common.clone(), ctx, move |src, dst, _| {
                    let (modified, src_time, dst_time) =
                        TimestampStrategy::compare(src, dst, resolution)?;
                    Ok(Outcome {
                        modified,
                        source_hash: None,
                        detail: Some(format!(
                            "源 = {} -- 目标 = {}",
                            format_time(src_time),
                            format_time(dst_time)
                        )),
                    })
                })
                .await?;
                Ok(collect(&common, outcomes, false))
            }
            ChangeDetector::Binary => {
                let outcomes = run(self.label(), common.clone(), ctx, |src, dst, _| {
                    Ok(Outcome {
                        modified: BinaryStrategy::files_differ(src, dst)?,
                        source_hash: None,
                        detail: None,
                    })
                })
                .await?;
                Ok(collect(&common, outcomes, false))
            }
            ChangeDetector::Hash => {
                let index = Arc::new(load_index(ctx).await?);
                let outcomes = run(self.label(), common.clone(), ctx, move |src, dst, rel| {
                    let (modified, source_hash) = HashStrategy::compare(src, dst, rel, &index)?;
                    Ok(Outcome {
                        modified,
                        source_hash: Some(source_hash),
                        detail: None,
                    })
                })
                .await?;
                Ok(collect(&common, outcomes, true))
            }
        }
    }
}

/// 按修改时间比较
pub struct TimestampStrategy;

impl TimestampStrategy {
    /// 时间差超过 `resolution` 视为修改
    pub fn compare(
        source: &Path,
        target: &Path,
        resolution: Duration,
    ) -> io::Result<(bool, SystemTime, SystemTime)> {
        let src_time = std::fs::metadata(source)?.modified()?;
        let dst_time = std::fs::metadata(target)?.modified()?;

        let diff = match src_time.duration_since(dst_time) {
            Ok(d) => d,
            Err(e) => e.duration(),
        };

        Ok((diff > resolution, src_time, dst_time))
    }
}

/// 逐字节比较
pub struct BinaryStrategy;

impl BinaryStrategy {
    /// 两个文件内容是否不同
    pub fn files_differ(source: &Path, target: &Path) -> io::Result<bool> {
        let src_file = File::open(source)?;
        let dst_file = File::open(target)?;

        // 大小不同，肯定不同
        if src_file.metadata()?.len() != dst_file.metadata()?.len() {
            return Ok(true);
        }

        let mut src_reader = BufReader::new(src_file);
        let mut dst_reader = BufReader::new(dst_file);
        let mut src_chunk = [0u8; BYTES_TO_READ];
        let mut dst_chunk = [0u8; BYTES_TO_READ];

        loop {
            let n_src = fill_chunk(&mut src_reader, &mut src_chunk)?;
            let n_dst = fill_chunk(&mut dst_reader, &mut dst_chunk)?;

            if n_src != n_dst || src_chunk[..n_src] != dst_chunk[..n_dst] {
                return Ok(true);
            }
            if n_src < BYTES_TO_READ {
                return Ok(false);
            }
        }
    }
}

/// 尽量填满缓冲区，返回实际读取的字节数（小于缓冲区长度表示到达末尾）
fn fill_chunk(reader: &mut impl Read, chunk: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < chunk.len() {
        match reader.read(&mut chunk[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// 按内容哈希比较，目标哈希优先取自索引
pub struct HashStrategy;

impl HashStrategy {
    /// 返回（是否修改，源哈希）
    pub fn compare(
        source: &Path,
        target: &Path,
        relative: &str,
        index: &HashIndex,
    ) -> io::Result<(bool, String)> {
        let source_hash = hash_file(source)?;

        // 索引中的哈希不再校验目标文件；空哈希表示上次未能记录，需要重新计算
        let target_hash = match index.get(relative).filter(|hash| !hash.is_empty()) {
            Some(hash) => hash.to_string(),
            None => hash_file(target)?,
        };

        Ok((source_hash != target_hash, source_hash))
    }
}

async fn load_index(ctx: &DetectContext) -> Result<HashIndex> {
    let target_root = ctx.target_root.clone();
    match tokio::task::spawn_blocking(move || HashIndex::load(&target_root)).await? {
        Ok((index, skipped)) => {
            for e in skipped {
                warn!("跳过哈希索引行: {}", e);
                ctx.sink.line(format!("跳过哈希索引中格式错误的行: {}", e));
            }
            Ok(index)
        }
        Err(e) => {
            // 无法读取索引时重新计算所有目标哈希
            warn!("读取哈希索引失败: {}", e);
            ctx.sink.error(&e);
            Ok(HashIndex::default())
        }
    }
}

/// 并行比较每个共同文件，失败的文件视为未修改
async fn run<F>(
    label: &'static str,
    common: Arc<Vec<String>>,
    ctx: &DetectContext,
    compare: F,
) -> Result<Vec<Option<Outcome>>>
where
    F: Fn(&Path, &Path, &str) -> io::Result<Outcome> + Send + Sync + 'static,
{
    let total = common.len();
    let done = Arc::new(AtomicUsize::new(0));
    let ctx = ctx.clone();

    debug!("开始比较 {} 个共同文件", total);

    map_blocking(total, ctx.max_concurrent, move |i| {
        let relative = &common[i];
        let src = ctx.source_root.join(relative);
        let dst = ctx.target_root.join(relative);

        match compare(&src, &dst, relative) {
            Ok(outcome) => {
                let progress = done.fetch_add(1, Ordering::Relaxed) + 1;
                let detail = outcome
                    .detail
                    .as_ref()
                    .map(|d| format!(" : {}", d))
                    .unwrap_or_default();
                ctx.sink.write_line(
                    format!("{} {} / {} : {}{}", label, progress, total, relative, detail),
                    LogTarget::FILE,
                );
                if should_report(progress, total, ctx.report_count) {
                    ctx.sink.write_line(
                        format!("{} {} / {} 个文件", label, progress, total),
                        LogTarget::CONSOLE,
                    );
                }
                Some(outcome)
            }
            Err(e) => {
                warn!("比较文件失败 {}: {}", relative, e);
                ctx.sink.error(format!("比较文件失败 {}: {}", relative, e));
                None
            }
        }
    })
    .await
}

fn collect(common: &[String], outcomes: Vec<Option<Outcome>>, with_hashes: bool) -> Detection {
    let mut modified = Vec::new();
    let mut hashes = Vec::with_capacity(if with_hashes { common.len() } else { 0 });

    for (path, outcome) in common.iter().zip(outcomes) {
        match outcome {
            Some(outcome) => {
                if outcome.modified {
                    modified.push(path.clone());
                }
                if with_hashes {
                    hashes.push(outcome.source_hash);
                }
            }
            None => {
                if with_hashes {
                    hashes.push(None);
                }
            }
        }
    }

    Detection {
        modified,
        source_hashes: with_hashes.then_some(hashes),
    }
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}
