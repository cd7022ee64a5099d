use mirrorsync_lib::config::{CompareMode, SyncOptions, SyncPair};
use mirrorsync_lib::core::{HashIndex, HASH_INDEX_FILE};
use mirrorsync_lib::logging::{LogSink, LogSinkConfig, LogSinkGuard};
use mirrorsync_lib::{SyncEngine, SyncError};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

struct Fixture {
    _root: TempDir,
    source: std::path::PathBuf,
    target: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("source");
        let target = root.path().join("target");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&target).unwrap();
        Self {
            _root: root,
            source,
            target,
        }
    }

    fn pair(&self) -> SyncPair {
        SyncPair::new(&self.source, &self.target)
    }
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn read(root: &Path, relative: &str) -> String {
    fs::read_to_string(root.join(relative)).unwrap()
}

fn set_mtime(path: &Path, time: SystemTime) {
    fs::OpenOptions::new()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

/// 列出目录下所有文件（相对路径，排序）
fn tree(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .filter(|p| !p.starts_with(HASH_INDEX_FILE))
        .collect();
    files.sort();
    files
}

fn quiet_sink() -> (LogSink, LogSinkGuard) {
    LogSink::start(LogSinkConfig {
        console: false,
        ..Default::default()
    })
    .unwrap()
}

fn engine(mode: CompareMode, sink: LogSink) -> SyncEngine {
    SyncEngine::new(SyncOptions::default().with_mode(mode), sink)
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let fx = Fixture::new();
    write(&fx.source, "a.txt", "X");
    write(&fx.source, "b/c.txt", "Y");
    write(&fx.target, "a.txt", "X");
    write(&fx.target, "b/c.txt", "Z");
    write(&fx.target, "d.txt", "W");

    let (sink, guard) = quiet_sink();
    let report = engine(CompareMode::Binary, sink)
        .sync_pair(&fx.pair())
        .await
        .unwrap();
    guard.shutdown().await;

    assert_eq!(report.errors, 0);
    assert_eq!(report.files_deleted, 1);
    assert_eq!(report.files_added, 0);
    assert_eq!(report.files_overwritten, 1);
    assert_eq!(report.dirs_pruned, 0);

    assert_eq!(tree(&fx.target), vec!["a.txt", "b/c.txt"]);
    assert_eq!(read(&fx.target, "b/c.txt"), "Y");
}

#[tokio::test]
async fn test_converges_and_is_idempotent_in_every_mode() {
    for mode in [CompareMode::Timestamp, CompareMode::Binary, CompareMode::Hash] {
        let fx = Fixture::new();
        write(&fx.source, "one.txt", "1");
        write(&fx.source, "nested/deep/two.txt", "22");
        write(&fx.source, "nested/three.bin", "333");
        write(&fx.target, "nested/three.bin", "old");
        write(&fx.target, "stale.txt", "gone");
        set_mtime(
            &fx.target.join("nested/three.bin"),
            SystemTime::now() - Duration::from_secs(60),
        );

        let (sink, guard) = quiet_sink();
        let engine = engine(mode, sink);

        let first = engine.sync_pair(&fx.pair()).await.unwrap();
        assert_eq!(first.errors, 0, "mode {}", mode);
        assert_eq!(tree(&fx.source), tree(&fx.target), "mode {}", mode);
        assert_eq!(read(&fx.target, "nested/three.bin"), "333");

        let second = engine.sync_pair(&fx.pair()).await.unwrap();
        assert_eq!(second.errors, 0, "mode {}", mode);
        assert_eq!(second.files_added, 0, "mode {}", mode);
        assert_eq!(second.files_deleted, 0, "mode {}", mode);
        assert_eq!(second.files_overwritten, 0, "mode {}", mode);
        assert_eq!(second.bytes_copied, 0, "mode {}", mode);

        guard.shutdown().await;
    }
}

#[tokio::test]
async fn test_copies_preserve_source_mtime() {
    let fx = Fixture::new();
    write(&fx.source, "a.txt", "content");
    let past = SystemTime::now() - Duration::from_secs(3600);
    set_mtime(&fx.source.join("a.txt"), past);

    let (sink, guard) = quiet_sink();
    engine(CompareMode::Timestamp, sink)
        .sync_pair(&fx.pair())
        .await
        .unwrap();
    guard.shutdown().await;

    let copied = fs::metadata(fx.target.join("a.txt")).unwrap().modified().unwrap();
    assert_eq!(copied, past);
}

#[tokio::test]
async fn test_hash_mode_ignores_touch_only_edits() {
    let fx = Fixture::new();
    write(&fx.source, "a.txt", "alpha");
    write(&fx.source, "b.txt", "beta");

    let (sink, guard) = quiet_sink();
    let engine = engine(CompareMode::Hash, sink);
    engine.sync_pair(&fx.pair()).await.unwrap();
    // 第二次运行时两侧都有文件，索引中会记录所有共同文件
    engine.sync_pair(&fx.pair()).await.unwrap();

    let (index, skipped) = HashIndex::load(&fx.target).unwrap();
    assert!(skipped.is_empty());
    assert_eq!(index.len(), 2);
    assert!(index.get("a.txt").is_some_and(|h| !h.is_empty()));

    // 只修改时间，不修改内容
    let later = SystemTime::now() + Duration::from_secs(7200);
    set_mtime(&fx.source.join("a.txt"), later);
    set_mtime(&fx.target.join("b.txt"), later);
    let report = engine.sync_pair(&fx.pair()).await.unwrap();
    assert_eq!(report.files_overwritten, 0);

    // 内容变化仍能检测到
    write(&fx.source, "b.txt", "beta v2");
    let report = engine.sync_pair(&fx.pair()).await.unwrap();
    assert_eq!(report.files_overwritten, 1);
    assert_eq!(read(&fx.target, "b.txt"), "beta v2");

    guard.shutdown().await;
}

#[tokio::test]
async fn test_hash_index_is_never_mirrored_or_deleted() {
    let fx = Fixture::new();
    write(&fx.source, "a.txt", "alpha");
    write(&fx.target, "a.txt", "stale");

    let (sink, guard) = quiet_sink();
    let report = engine(CompareMode::Hash, sink)
        .sync_pair(&fx.pair())
        .await
        .unwrap();
    guard.shutdown().await;

    assert_eq!(report.files_overwritten, 1);
    assert_eq!(report.files_deleted, 0);
    assert!(fx.target.join(HASH_INDEX_FILE).is_file());
    assert!(!fx.source.join(HASH_INDEX_FILE).exists());

    let content = fs::read_to_string(fx.target.join(HASH_INDEX_FILE)).unwrap();
    assert_eq!(content.lines().count(), 1);
    assert!(content.ends_with("|a.txt\n"));
}

#[tokio::test]
async fn test_prunes_top_level_directories_only() {
    let fx = Fixture::new();
    write(&fx.source, "keep/file.txt", "k");
    write(&fx.target, "keep/file.txt", "k");
    write(&fx.target, "keep/old/inner.txt", "x");
    write(&fx.target, "old/x/y/deep.txt", "x");
    write(&fx.target, "old/z.txt", "x");
    fs::create_dir_all(fx.target.join("empty/nested")).unwrap();

    let (sink, guard) = quiet_sink();
    let report = engine(CompareMode::Binary, sink)
        .sync_pair(&fx.pair())
        .await
        .unwrap();
    guard.shutdown().await;

    assert_eq!(report.dirs_pruned, 3);
    // 被删除目录中的文件不会再作为多余文件报告
    assert_eq!(report.files_deleted, 0);
    assert_eq!(report.errors, 0);
    assert!(!fx.target.join("old").exists());
    assert!(!fx.target.join("empty").exists());
    assert!(!fx.target.join("keep/old").exists());
    assert_eq!(tree(&fx.target), vec!["keep/file.txt"]);
}

#[tokio::test]
async fn test_ignore_rules_apply_to_both_sides() {
    let fx = Fixture::new();
    write(&fx.source, "public.txt", "p");
    write(&fx.source, "my_secret.txt", "s");
    write(&fx.source, "secret/key.pem", "k");
    write(&fx.target, "secret/old.pem", "o");
    // 同名文件也不会被覆盖
    write(&fx.target, "secret/key.pem", "stale key");

    let (sink, guard) = quiet_sink();
    let report = engine(CompareMode::Binary, sink)
        .sync_pair(&fx.pair().with_ignore(["secret"]))
        .await
        .unwrap();
    guard.shutdown().await;

    assert_eq!(report.files_added, 1);
    assert_eq!(report.files_overwritten, 0);
    assert_eq!(report.files_deleted, 0);
    assert_eq!(report.dirs_pruned, 0);
    assert_eq!(
        tree(&fx.target),
        vec!["public.txt", "secret/key.pem", "secret/old.pem"]
    );
    assert_eq!(read(&fx.target, "secret/key.pem"), "stale key");
}

#[tokio::test]
async fn test_failed_item_is_counted_and_run_continues() {
    let fx = Fixture::new();
    write(&fx.source, "dir/a.txt", "a");
    write(&fx.source, "b.txt", "b");
    // 目标中的同名普通文件挡住了 dir/ 的创建，且不匹配过滤模式
    write(&fx.target, "dir", "not a directory");
    let log_path = fx.target.with_file_name("logs").join("run.log");

    let (sink, guard) = LogSink::start(LogSinkConfig {
        file: Some(log_path.clone()),
        console: false,
        ..Default::default()
    })
    .unwrap();
    let report = engine(CompareMode::Timestamp, sink)
        .sync_pair(&fx.pair().with_filter("*.txt"))
        .await
        .unwrap();
    guard.shutdown().await;

    assert_eq!(report.errors, 1);
    assert_eq!(report.files_added, 1);
    assert_eq!(read(&fx.target, "b.txt"), "b");
    assert_eq!(read(&fx.target, "dir"), "not a directory");

    let log = fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("错误: 复制"));
    assert!(log.contains("共 1 个错误"));
}

#[tokio::test]
async fn test_hash_mode_rehashes_empty_index_entries() {
    let fx = Fixture::new();
    write(&fx.source, "a.txt", "same");
    write(&fx.target, "a.txt", "same");
    fs::write(fx.target.join(HASH_INDEX_FILE), "|a.txt\n").unwrap();

    let (sink, guard) = quiet_sink();
    let report = engine(CompareMode::Hash, sink)
        .sync_pair(&fx.pair())
        .await
        .unwrap();
    guard.shutdown().await;

    assert_eq!(report.files_overwritten, 0);
    assert_eq!(report.bytes_copied, 0);

    let (index, _) = HashIndex::load(&fx.target).unwrap();
    assert!(index.get("a.txt").is_some_and(|h| h.len() == 16));
}

#[tokio::test]
async fn test_filter_pattern_limits_files() {
    let fx = Fixture::new();
    write(&fx.source, "a.txt", "a");
    write(&fx.source, "b.log", "b");
    write(&fx.source, "sub/c.txt", "c");
    write(&fx.target, "keep.log", "k");

    let (sink, guard) = quiet_sink();
    let report = engine(CompareMode::Timestamp, sink)
        .sync_pair(&fx.pair().with_filter("*.txt"))
        .await
        .unwrap();
    guard.shutdown().await;

    assert_eq!(report.files_added, 2);
    assert_eq!(report.files_deleted, 0);
    assert_eq!(tree(&fx.target), vec!["a.txt", "keep.log", "sub/c.txt"]);
}

#[tokio::test]
async fn test_overlapping_paths_rejected_before_any_change() {
    let fx = Fixture::new();
    write(&fx.source, "a.txt", "a");
    let nested = fx.source.join("backup");

    let (sink, guard) = quiet_sink();
    let engine = engine(CompareMode::Timestamp, sink);

    let err = engine
        .sync_pair(&SyncPair::new(&fx.source, &nested))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PathOverlap { .. }));
    assert!(err.is_precondition());
    assert!(!nested.exists());

    let err = engine
        .sync_pair(&SyncPair::new(&fx.source, fx.source.join("..").join("source")))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PathOverlap { .. }));

    guard.shutdown().await;
}

#[tokio::test]
async fn test_missing_target_is_created() {
    let fx = Fixture::new();
    write(&fx.source, "a/b.txt", "b");
    let target = fx.target.join("fresh/mirror");

    let (sink, guard) = quiet_sink();
    let report = engine(CompareMode::Binary, sink)
        .sync_pair(&SyncPair::new(&fx.source, &target))
        .await
        .unwrap();
    guard.shutdown().await;

    assert_eq!(report.files_added, 1);
    assert_eq!(read(&target, "a/b.txt"), "b");
}

#[tokio::test]
async fn test_sync_pairs_counts_failed_pair_and_continues() {
    let fx = Fixture::new();
    write(&fx.source, "a.txt", "a");
    let missing = fx.source.with_file_name("does_not_exist");

    let (sink, guard) = quiet_sink();
    let errors = engine(CompareMode::Timestamp, sink)
        .sync_pairs(&[
            SyncPair::new(&missing, fx.target.join("x")),
            fx.pair(),
        ])
        .await;
    guard.shutdown().await;

    assert_eq!(errors, 1);
    assert_eq!(read(&fx.target, "a.txt"), "a");
    assert!(!fx.target.join("x").exists());
}

#[tokio::test]
async fn test_run_log_records_summary() {
    let fx = Fixture::new();
    write(&fx.source, "a.txt", "a");
    write(&fx.source, "b.txt", "bb");
    let log_path = fx.target.with_file_name("logs").join("run.log");

    let (sink, guard) = LogSink::start(LogSinkConfig {
        file: Some(log_path.clone()),
        console: false,
        ..Default::default()
    })
    .unwrap();
    engine(CompareMode::Timestamp, sink)
        .sync_pair(&fx.pair())
        .await
        .unwrap();
    guard.shutdown().await;

    let log = fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("正在复制 2 个新文件"));
    assert!(log.contains("新文件: 3B / 3B"));
    assert!(log.contains("共 0 个错误"));
    assert!(!log.contains("错误: "));
}
