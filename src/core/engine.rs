use crate::config::{SyncOptions, SyncPair};
use crate::core::cache::HashIndex;
use crate::core::comparator::{DiffResult, FileComparator};
use crate::core::detector::{ChangeDetector, DetectContext};
use crate::core::pool::{map_blocking, should_report};
use crate::core::progress::ProgressTracker;
use crate::core::scanner::{FileScanner, ScanConfig};
use crate::error::{Result, SyncError};
use crate::logging::{LogSink, LogTarget};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 单个目录对的同步报告
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub source: PathBuf,
    pub target: PathBuf,
    pub dirs_pruned: usize,
    pub files_deleted: usize,
    pub files_added: usize,
    pub files_overwritten: usize,
    pub bytes_copied: u64,
    /// 可恢复错误的数量，0 表示完全成功
    pub errors: u64,
    pub duration_ms: u64,
}

/// 同步引擎
pub struct SyncEngine {
    options: SyncOptions,
    sink: LogSink,
}

impl SyncEngine {
    pub fn new(options: SyncOptions, sink: LogSink) -> Self {
        Self { options, sink }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// 依次同步多个目录对，返回错误总数
    ///
    /// 某个目录对的前置检查失败时记一个错误，继续处理下一个。
    pub async fn sync_pairs(&self, pairs: &[SyncPair]) -> u64 {
        let mut errors = 0;

        for (i, pair) in pairs.iter().enumerate() {
            if i > 0 {
                self.sink.line(" ");
            }
            match self.sync_pair(pair).await {
                Ok(report) => errors += report.errors,
                Err(e) => {
                    warn!("同步失败 {} -> {}: {}", pair.source.display(), pair.target.display(), e);
                    self.sink.error(&e);
                    errors += 1;
                }
            }
        }

        errors
    }

    /// 同步一个目录对
    ///
    /// 只有前置条件不满足或扫描失败时返回错误；单个文件的失败计入报告。
    pub async fn sync_pair(&self, pair: &SyncPair) -> Result<SyncReport> {
        let started = Instant::now();
        let pair = pair.clone().normalized();
        let source = normalize_lexically(&absolute(&pair.source)?);
        let target = normalize_lexically(&absolute(&pair.target)?);

        check_paths(&source, &target)?;
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| SyncError::io(&target, e))?;

        let detector = ChangeDetector::from_options(&self.options);
        info!(
            "开始同步: {} -> {} (模式 {})",
            source.display(),
            target.display(),
            self.options.mode
        );
        self.sink.line(format!(
            "开始同步目录对 {} ---- {}",
            source.display(),
            target.display()
        ));

        let mut report = SyncReport {
            source: source.clone(),
            target: target.clone(),
            ..Default::default()
        };

        // 阶段 1：先删除目标中多余的目录
        self.sink.line("正在比较目录差异");
        let dir_scanner = FileScanner::with_config(ScanConfig::new("*", pair.ignore.clone()))?;
        report.dirs_pruned = self
            .prune_directories(&dir_scanner, &source, &target)
            .await?;

        // 扫描文件并计算差异
        self.sink.line("正在比较文件差异");
        let mut scan_config = ScanConfig::new(pair.filter.clone(), pair.ignore.clone());
        if let Some(reserved) = detector.reserved_file() {
            scan_config = scan_config.ignoring(reserved);
        }
        let scanner = FileScanner::with_config(scan_config)?;
        let source_files = scan_blocking(&scanner, &source).await?;
        let target_files = scan_blocking(&scanner, &target).await?;

        let ctx = DetectContext {
            source_root: source.clone(),
            target_root: target.clone(),
            max_concurrent: self.options.max_concurrent,
            report_count: self.options.report_count,
            sink: self.sink.clone(),
        };
        let diff = Arc::new(
            FileComparator::compare(&source_files, &target_files, &detector, &ctx).await?,
        );
        debug!(
            "比较完成: {} 个新增, {} 个删除, {} 个修改",
            diff.added.len(),
            diff.removed.len(),
            diff.modified.len()
        );

        if diff.is_clean() {
            self.sink.line("两侧文件已一致");
        }

        let mut errors = 0u64;

        // 阶段 2：删除目标中多余的文件
        let (deleted, failed) = self.delete_files(&diff).await?;
        report.files_deleted = deleted;
        errors += failed as u64;

        let tracker = Arc::new(
            ProgressTracker::new(&diff, self.options.max_concurrent, self.sink.clone()).await?,
        );

        // 阶段 3：复制新文件
        let outcomes = self.add_files(&diff, &tracker).await?;
        report.files_added = outcomes.iter().filter(|ok| **ok).count();
        errors += outcomes.iter().filter(|ok| !**ok).count() as u64;

        // 阶段 4：覆盖修改过的文件
        let outcomes = self.overwrite_files(&diff, &tracker).await?;
        report.files_overwritten = outcomes.iter().filter(|ok| **ok).count();
        errors += outcomes.iter().filter(|ok| !**ok).count() as u64;

        if diff.source_hashes.is_some() {
            let failed: HashSet<String> = diff
                .modified
                .iter()
                .zip(&outcomes)
                .filter(|(_, ok)| !**ok)
                .map(|(path, _)| path.clone())
                .collect();
            let diff = diff.clone();
            let written =
                tokio::task::spawn_blocking(move || write_hash_index(&diff, &failed)).await?;
            if let Err(e) = written {
                warn!("写入哈希索引失败: {}", e);
                self.sink.error(&e);
                errors += 1;
            }
        }

        report.bytes_copied = tracker.copied();
        report.errors = errors;
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "同步完成: {} -> {} - 新增 {}, 覆盖 {}, 删除 {}, 错误 {}",
            source.display(),
            target.display(),
            report.files_added,
            report.files_overwritten,
            report.files_deleted,
            errors
        );
        self.sink.line(format!(
            "同步结束: {} ---- {}, 共 {} 个错误",
            source.display(),
            target.display(),
            errors
        ));

        Ok(report)
    }

    /// 删除仅在目标中存在的目录（失败只记录，不计入错误）
    async fn prune_directories(
        &self,
        scanner: &FileScanner,
        source: &Path,
        target: &Path,
    ) -> Result<usize> {
        let source_dirs = {
            let scanner = scanner.clone();
            let root = source.to_path_buf();
            tokio::task::spawn_blocking(move || scanner.scan_dirs(&root)).await??
        };
        let target_dirs = {
            let scanner = scanner.clone();
            let root = target.to_path_buf();
            tokio::task::spawn_blocking(move || scanner.scan_dirs(&root)).await??
        };

        let dirs = Arc::new(FileComparator::diff_dirs(&source_dirs, &target_dirs));
        let total = dirs.len();
        self.sink.line(format!("{} 个目录将被删除", total));

        let target = target.to_path_buf();
        let sink = self.sink.clone();
        let report_count = self.options.report_count;
        let done = Arc::new(AtomicUsize::new(0));

        let outcomes = map_blocking(total, self.options.max_concurrent, move |i| {
            let path = target.join(&dirs[i]);
            let result = remove_dir(&path);
            if let Err(e) = &result {
                sink.error(format!("删除目录失败 {}: {}", path.display(), e));
            }

            let progress = done.fetch_add(1, Ordering::Relaxed) + 1;
            sink.write_line(
                format!("已删除目录 {} --- {} / {} 个目录", path.display(), progress, total),
                LogTarget::FILE,
            );
            if should_report(progress, total, report_count) {
                sink.write_line(
                    format!("已删除 {} / {} 个目录", progress, total),
                    LogTarget::CONSOLE,
                );
            }
            result.is_ok()
        })
        .await?;

        Ok(outcomes.into_iter().filter(|ok| *ok).count())
    }

    /// 删除仅在目标中存在的文件，返回（成功数，失败数）
    async fn delete_files(&self, diff: &Arc<DiffResult>) -> Result<(usize, usize)> {
        let total = diff.removed.len();
        self.sink.line(format!("{} 个文件将被删除", total));

        let diff = diff.clone();
        let sink = self.sink.clone();
        let report_count = self.options.report_count;
        let done = Arc::new(AtomicUsize::new(0));

        let outcomes = map_blocking(total, self.options.max_concurrent, move |i| {
            let path = diff.target_root.join(&diff.removed[i]);
            let ok = match remove_file(&path) {
                Ok(()) => true,
                Err(e) => {
                    sink.error(SyncError::io(&path, e));
                    false
                }
            };

            let progress = done.fetch_add(1, Ordering::Relaxed) + 1;
            sink.write_line(
                format!("已删除 {} --- {} / {} 个文件", path.display(), progress, total),
                LogTarget::FILE,
            );
            if should_report(progress, total, report_count) {
                sink.write_line(
                    format!("已删除 {} / {} 个文件", progress, total),
                    LogTarget::CONSOLE,
                );
            }
            ok
        })
        .await?;

        let deleted = outcomes.iter().filter(|ok| **ok).count();
        Ok((deleted, total - deleted))
    }

    /// 复制仅在源中存在的文件（不覆盖），返回每个文件是否成功
    async fn add_files(
        &self,
        diff: &Arc<DiffResult>,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<Vec<bool>> {
        let total = diff.added.len();
        self.sink.line(format!("正在复制 {} 个新文件", total));

        let diff = diff.clone();
        let progress_tracker = tracker.clone();
        let sink = self.sink.clone();
        let report_count = self.options.report_count;
        let done = Arc::new(AtomicUsize::new(0));

        let outcomes = map_blocking(total, self.options.max_concurrent, move |i| {
            let relative = &diff.added[i];
            let src = diff.source_root.join(relative);
            let dst = diff.target_root.join(relative);

            let ok = match copy_file(&src, &dst, false) {
                Ok(_) => true,
                Err(e) => {
                    sink.error(format!("复制 {} 到 {} 失败: {}", src.display(), dst.display(), e));
                    false
                }
            };
            progress_tracker.add_new(i);

            let progress = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress_tracker.write_new_file_detail(
                &src.to_string_lossy(),
                &dst.to_string_lossy(),
                i,
            );
            if should_report(progress, total, report_count) {
                progress_tracker.write_report(LogTarget::CONSOLE);
            }
            ok
        })
        .await?;

        tracker.write_report(LogTarget::ALL);
        Ok(outcomes)
    }

    /// 用源文件覆盖修改过的目标文件，返回每个文件是否成功
    async fn overwrite_files(
        &self,
        diff: &Arc<DiffResult>,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<Vec<bool>> {
        let total = diff.modified.len();
        self.sink.line(format!("正在覆盖 {} 个修改文件", total));

        let diff = diff.clone();
        let progress_tracker = tracker.clone();
        let sink = self.sink.clone();
        let report_count = self.options.report_count;
        let done = Arc::new(AtomicUsize::new(0));

        let outcomes = map_blocking(total, self.options.max_concurrent, move |i| {
            let relative = &diff.modified[i];
            let src = diff.source_root.join(relative);
            let dst = diff.target_root.join(relative);

            let ok = match copy_file(&src, &dst, true) {
                Ok(_) => true,
                Err(e) => {
                    sink.error(format!("覆盖 {} 到 {} 失败: {}", src.display(), dst.display(), e));
                    false
                }
            };
            progress_tracker.add_modified(i);

            let progress = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress_tracker.write_modified_file_detail(
                &src.to_string_lossy(),
                &dst.to_string_lossy(),
                i,
            );
            if should_report(progress, total, report_count) {
                progress_tracker.write_report(LogTarget::CONSOLE);
            }
            ok
        })
        .await?;

        tracker.write_report(LogTarget::ALL);
        Ok(outcomes)
    }
}

async fn scan_blocking(scanner: &FileScanner, root: &Path) -> Result<Vec<String>> {
    let scanner = scanner.clone();
    let root = root.to_path_buf();
    // 使用 spawn_blocking 避免阻塞 async runtime
    tokio::task::spawn_blocking(move || scanner.scan_files(&root)).await?
}

/// 重写哈希索引：每个共同文件一行；计算失败或覆盖失败的文件写空哈希
fn write_hash_index(diff: &DiffResult, failed: &HashSet<String>) -> Result<usize> {
    let hashes = diff.source_hashes.as_deref().unwrap_or_default();
    let entries = diff.common.iter().zip(hashes).map(|(path, hash)| {
        let hash = if failed.contains(path) {
            None
        } else {
            hash.as_deref()
        };
        (path.as_str(), hash)
    });

    HashIndex::save(&diff.target_root, entries)
}

/// 检查源和目标互不包含，源目录必须存在
fn check_paths(source: &Path, target: &Path) -> Result<()> {
    if source.starts_with(target) || target.starts_with(source) {
        return Err(SyncError::PathOverlap {
            source_root: source.to_path_buf(),
            target_root: target.to_path_buf(),
        });
    }

    if !source.is_dir() {
        return Err(SyncError::MissingRoot(source.to_path_buf()));
    }

    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| SyncError::io(path, e))
}

/// 去掉路径中的 `.` 和 `..`（不访问文件系统）
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// 递归删除目录，目录已不存在视为成功
fn remove_dir(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// 删除文件，文件已不存在视为成功
fn remove_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// 复制文件并保留修改时间；`overwrite` 为 false 时目标已存在即失败
fn copy_file(source: &Path, target: &Path, overwrite: bool) -> io::Result<u64> {
    if let Some(parent) = target.parent() {
        // 并发创建同一目录时已存在不算错误
        fs::create_dir_all(parent)?;
    }

    let mut reader = File::open(source)?;
    let modified = reader.metadata()?.modified()?;

    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut writer = options.open(target)?;

    let bytes = io::copy(&mut reader, &mut writer)?;
    writer.set_modified(modified)?;
    Ok(bytes)
}
