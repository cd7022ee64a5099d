//! 日志模块 - 异步运行日志（文件 + 控制台）和诊断日志配置

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 错误信息的分隔行，便于在日志中检索
pub const ERROR_MARKER: &str = "!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!";

/// 诊断日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 运行日志文件最大大小（MB），0 表示不限制
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 运行日志刷新间隔（毫秒）
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

fn default_flush_delay_ms() -> u64 {
    1000
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_size_mb: default_max_size_mb(),
            level: default_level(),
            flush_delay_ms: default_flush_delay_ms(),
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 日志输出目标（可组合）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogTarget(u8);

impl LogTarget {
    pub const FILE: LogTarget = LogTarget(1 << 0);
    pub const CONSOLE: LogTarget = LogTarget(1 << 1);
    pub const ALL: LogTarget = LogTarget(Self::FILE.0 | Self::CONSOLE.0);

    pub fn contains(self, other: LogTarget) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LogTarget {
    type Output = LogTarget;

    fn bitor(self, rhs: LogTarget) -> LogTarget {
        LogTarget(self.0 | rhs.0)
    }
}

/// 带大小限制的日志文件
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: Option<BufWriter<File>>,
}

impl SizeRotatingWriter {
    pub fn new(file_path: &Path, max_size_mb: u32) -> io::Result<Self> {
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let max_size = (max_size_mb as u64) * 1024 * 1024;
        let writer = Self::open_file(file_path, max_size)?;

        Ok(Self {
            file_path: file_path.to_path_buf(),
            max_size,
            writer: Some(writer),
        })
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        // 检查现有文件大小，如果超过限制则轮转
        if max_size > 0 {
            if let Ok(metadata) = fs::metadata(file_path) {
                if metadata.len() > max_size {
                    Self::rotate_log(file_path)?;
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(BufWriter::new(file))
    }

    /// 轮转日志文件，当前文件改名为 *.old
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let mut backup = file_path.as_os_str().to_owned();
        backup.push(".old");
        let backup_path = PathBuf::from(backup);

        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }

        fs::rename(file_path, &backup_path)
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writeln!(writer, "{}", line),
            None => Err(io::Error::new(io::ErrorKind::Other, "Writer not available")),
        }
    }

    /// 刷新缓冲区，必要时轮转
    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }

        if self.max_size == 0 {
            return Ok(());
        }

        let too_large = fs::metadata(&self.file_path)
            .map(|m| m.len() > self.max_size)
            .unwrap_or(false);
        if too_large {
            self.writer = None;
            Self::rotate_log(&self.file_path)?;
            self.writer = Some(Self::open_file(&self.file_path, self.max_size)?);
        }

        Ok(())
    }
}

/// 运行日志配置
#[derive(Debug, Clone)]
pub struct LogSinkConfig {
    /// 日志文件路径，None 表示只输出到控制台
    pub file: Option<PathBuf>,
    pub max_size_mb: u32,
    pub flush_delay: Duration,
    /// 是否输出到控制台
    pub console: bool,
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            file: None,
            max_size_mb: default_max_size_mb(),
            flush_delay: Duration::from_millis(default_flush_delay_ms()),
            console: true,
        }
    }
}

enum Message {
    Line {
        text: String,
        target: LogTarget,
        stamp: String,
    },
    Shutdown,
}

/// 异步运行日志
///
/// 所有行按调用顺序进入同一个队列，由单个消费者写出；
/// 另有一个定时任务周期性地刷新日志文件。
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<Message>,
}

/// 持有后台任务，用于关闭日志
pub struct LogSinkGuard {
    tx: mpsc::UnboundedSender<Message>,
    consumer: JoinHandle<()>,
    flusher: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    file: Option<Arc<Mutex<SizeRotatingWriter>>>,
}

impl LogSink {
    /// 启动日志任务，必须在 tokio 运行时内调用
    pub fn start(config: LogSinkConfig) -> io::Result<(LogSink, LogSinkGuard)> {
        let file = match &config.file {
            Some(path) => Some(Arc::new(Mutex::new(SizeRotatingWriter::new(
                path,
                config.max_size_mb,
            )?))),
            None => None,
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let console = config.console;
        let consumer_file = file.clone();

        // 消费者：逐条写出，直到收到关闭消息
        let consumer = tokio::task::spawn_blocking(move || {
            while let Some(message) = rx.blocking_recv() {
                match message {
                    Message::Line {
                        text,
                        target,
                        stamp,
                    } => {
                        if console && target.contains(LogTarget::CONSOLE) {
                            println!("{} : {}", stamp, text);
                        }
                        let file = consumer_file
                            .as_ref()
                            .filter(|_| target.contains(LogTarget::FILE));
                        if let Some(file) = file {
                            let mut guard = file.lock().unwrap_or_else(|e| e.into_inner());
                            if let Err(e) = guard.write_line(&format!("{} : {}", stamp, text)) {
                                tracing::warn!("写入日志文件失败: {}", e);
                            }
                        }
                    }
                    Message::Shutdown => break,
                }
            }
        });

        let cancel = CancellationToken::new();
        let flusher = file.clone().map(|file| {
            let cancel = cancel.clone();
            let delay = config.flush_delay;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {
                            let mut guard = file.lock().unwrap_or_else(|e| e.into_inner());
                            if let Err(e) = guard.flush() {
                                tracing::warn!("刷新日志文件失败: {}", e);
                            }
                        }
                    }
                }
            })
        });

        let guard = LogSinkGuard {
            tx: tx.clone(),
            consumer,
            flusher,
            cancel,
            file,
        };

        Ok((LogSink { tx }, guard))
    }

    /// 写入一行日志
    pub fn write_line(&self, text: impl Into<String>, target: LogTarget) {
        let message = Message::Line {
            text: text.into(),
            target,
            stamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        // 日志已关闭时丢弃
        let _ = self.tx.send(message);
    }

    /// 同时写入文件和控制台
    pub fn line(&self, text: impl Into<String>) {
        self.write_line(text, LogTarget::ALL);
    }

    /// 写入带分隔标记的错误信息
    pub fn error(&self, detail: impl std::fmt::Display) {
        self.line(format!(
            "\n{marker}\n错误: {detail}\n{marker}",
            marker = ERROR_MARKER,
            detail = detail
        ));
    }
}

impl LogSinkGuard {
    /// 按顺序写完队列中的日志，停止刷新任务并刷新文件
    pub async fn shutdown(self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Err(e) = self.consumer.await {
            tracing::warn!("日志任务异常退出: {}", e);
        }

        self.cancel.cancel();
        if let Some(flusher) = self.flusher {
            let _ = flusher.await;
        }

        if let Some(file) = self.file {
            let mut guard = file.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = guard.flush() {
                tracing::warn!("刷新日志文件失败: {}", e);
            }
        }
    }
}
