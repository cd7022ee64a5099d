use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use mirrorsync_lib::config::{CompareMode, PairConfigFile, SyncOptions, SyncPair};
use mirrorsync_lib::logging::{LogConfig, LogSink, LogSinkConfig};
use mirrorsync_lib::SyncEngine;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 单向目录镜像工具
#[derive(Parser, Debug)]
#[command(name = "mirrorsync", version, about = "单向目录镜像同步")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 直接指定一个目录对
    Direct(DirectArgs),
    /// 从 JSON 配置文件读取目录对
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct DirectArgs {
    /// 源目录
    #[arg(short, long)]
    source: PathBuf,

    /// 目标目录
    #[arg(short, long)]
    target: PathBuf,

    /// 文件名过滤模式（支持 * 和 ?）
    #[arg(short, long, default_value = "*")]
    pattern: String,

    /// 忽略包含该字符串的路径（可重复）
    #[arg(short, long = "ignore")]
    ignore: Vec<String>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// 配置文件列表
    #[arg(required = true)]
    files: Vec<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// 修改检测方式
    #[arg(short, long, value_enum)]
    mode: Option<CompareMode>,

    /// 修改时间比较容差（毫秒）
    #[arg(long = "time-res")]
    time_resolution_ms: Option<u64>,

    /// 每个阶段在控制台输出的进度次数
    #[arg(short, long = "report", default_value_t = 100)]
    report_count: usize,

    /// 最大并发数
    #[arg(short = 'j', long = "jobs", default_value_t = 4)]
    max_concurrent: usize,

    /// 运行日志文件
    #[arg(short, long = "log")]
    log_file: Option<PathBuf>,

    /// 日志文件刷新间隔（毫秒）
    #[arg(short, long = "flush")]
    flush_delay_ms: Option<u64>,
}

impl CommonArgs {
    fn options(&self) -> SyncOptions {
        self.override_options(SyncOptions {
            report_count: self.report_count,
            max_concurrent: self.max_concurrent,
            ..Default::default()
        })
    }

    /// 命令行显式指定的选项优先于配置文件
    fn override_options(&self, mut options: SyncOptions) -> SyncOptions {
        if let Some(mode) = self.mode {
            options.mode = mode;
        }
        if let Some(res) = self.time_resolution_ms {
            options.time_resolution_ms = res;
        }
        options
    }

    fn override_log(&self, mut log: LogConfig) -> LogConfig {
        if let Some(delay) = self.flush_delay_ms {
            log.flush_delay_ms = delay;
        }
        log
    }
}

/// 一次运行的全部内容
struct Plan {
    jobs: Vec<(SyncPair, SyncOptions)>,
    log: LogConfig,
    log_file: Option<PathBuf>,
}

/// 初始化诊断日志，输出到 stderr
fn init_logging(config: &LogConfig) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.tracing_level().as_str()));

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let subscriber = tracing_subscriber::registry().with(env_filter).with(layer);
    let _ = tracing::subscriber::set_global_default(subscriber);

    guard
}

/// 汇总要同步的目录对、选项和日志设置
fn plan(command: &Command) -> anyhow::Result<Plan> {
    match command {
        Command::Direct(args) => {
            let pair = SyncPair::new(&args.source, &args.target)
                .with_filter(args.pattern.clone())
                .with_ignore(args.ignore.iter().cloned())
                .normalized();
            Ok(Plan {
                jobs: vec![(pair, args.common.options())],
                log: args.common.override_log(LogConfig::default()),
                log_file: args.common.log_file.clone(),
            })
        }
        Command::Config(args) => {
            let mut jobs = Vec::new();
            let mut log = LogConfig::default();
            for file in &args.files {
                let config = PairConfigFile::load(file)?;
                let options = config.apply_to(args.common.options());
                let options = args.common.override_options(options);
                if let Some(file_log) = &config.log {
                    log = file_log.clone();
                }
                jobs.extend(config.pairs.into_iter().map(|pair| (pair, options.clone())));
            }
            Ok(Plan {
                jobs,
                log: args.common.override_log(log),
                log_file: args.common.log_file.clone(),
            })
        }
    }
}

async fn run(plan: Plan) -> anyhow::Result<u64> {
    let (sink, guard) = LogSink::start(LogSinkConfig {
        file: plan.log_file.clone(),
        max_size_mb: plan.log.max_size_mb,
        flush_delay: Duration::from_millis(plan.log.flush_delay_ms),
        console: true,
    })
    .with_context(|| "创建运行日志失败")?;

    sink.line(format!(
        "mirrorsync {} 启动, 共 {} 个目录对",
        env!("CARGO_PKG_VERSION"),
        plan.jobs.len()
    ));

    let mut errors = 0;
    for (pair, options) in &plan.jobs {
        let engine = SyncEngine::new(options.clone(), sink.clone());
        errors += engine.sync_pairs(std::slice::from_ref(pair)).await;
    }

    sink.line(format!("全部完成, 共 {} 个错误", errors));
    drop(sink);
    guard.shutdown().await;

    Ok(errors)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let plan = match plan(&cli.command) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("错误: {:#}", e);
            return ExitCode::from(2);
        }
    };
    let _log_guard = init_logging(&plan.log);

    match run(plan).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(errors) => {
            tracing::warn!("同步完成, 共 {} 个错误", errors);
            ExitCode::from(1)
        }
        Err(e) => {
            tracing::error!("同步失败: {:#}", e);
            eprintln!("错误: {:#}", e);
            ExitCode::from(2)
        }
    }
}
