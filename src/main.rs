//! 应用程序入口 (Application Entrypoint)
//!
//! 负责 CLI 指令解析、遥测层初始化、依赖注入及系统生命周期管理。

mod core;
mod engine;
mod interfaces;
mod network;
mod packer;
mod sites;
mod ui;
mod utils;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::core::config::{AppConfig, MaxConcurrency, Settings};
use crate::core::event::create_event_channel;
use crate::core::filter::{Filterable, filter_ranges, sort_by_number};
use crate::core::model::format_number;
use crate::core::range;
use crate::engine::{ChapterPipeline, PipelineOptions, RetryPolicy};
use crate::interfaces::{PageFetcher, SiteAdapter};
use crate::network::ServiceContext;
use crate::packer::ArchiveFormat;
use crate::sites::SiteRegistry;
use crate::ui::{Ui, get_multi};

/// 进度条感知的日志写入器 (TUI-aware Log Writer)
///
/// 确保非同步日志输出不会破坏终端进度条的渲染布局。
struct IndicatifWriter;

impl io::Write for IndicatifWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let _ = get_multi().println(s.trim_end());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for IndicatifWriter {
    type Writer = IndicatifWriter;

    fn make_writer(&self) -> Self::Writer {
        IndicatifWriter
    }
}

/// 漫画章节下载器
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// 系列 URL 与可选的章节区间 (如 "1-3,5")，顺序不限
    #[arg(required = true, num_args = 1..=2, value_name = "URL [RANGE]")]
    args: Vec<String>,

    /// 将所有章节打包为单一文件
    #[arg(short, long)]
    bundle: bool,

    /// 同时下载的章节数 (上限 5)
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// 每章同时下载的页面数 (上限 10)
    #[arg(short = 'C', long)]
    concurrency_pages: Option<usize>,

    /// 首选语言 (两位代码)
    #[arg(short, long)]
    language: Option<String>,

    /// 文件名模板，可用 {series} {number} {title} {language}
    #[arg(short = 't', long)]
    filename_template: Option<String>,

    /// 输出目录
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// 归档格式: cbz | zip | raw | epub
    #[arg(short, long)]
    format: Option<ArchiveFormat>,

    /// 未指定区间时不再询问，直接下载全部章节
    #[arg(short = 'y', long)]
    yes: bool,

    /// 指定配置文件 (不再读取默认位置与环境变量)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(long)]
    debug: bool,
}

impl Cli {
    /// 以 `http` 开头的参数视为 URL，另一个视为区间
    fn split_args(&self) -> (Option<&str>, Option<&str>) {
        let mut url = None;
        let mut range = None;
        for arg in &self.args {
            if arg.starts_with("http") && url.is_none() {
                url = Some(arg.as_str());
            } else {
                range = Some(arg.as_str());
            }
        }
        (url, range)
    }

    /// 命令行参数覆盖配置文件中的下载参数
    fn settings(&self, config: &AppConfig) -> Settings {
        let base = Settings::from_config(&config.download);
        let download = &config.download;
        Settings {
            bundle: self.bundle || base.bundle,
            max_concurrency: MaxConcurrency::capped(
                self.concurrency.unwrap_or(download.concurrency),
                self.concurrency_pages.unwrap_or(download.concurrency_pages),
            ),
            language: self.language.clone().or(base.language),
            filename_template: self.filename_template.clone().unwrap_or(base.filename_template),
            output_dir: self.output_dir.clone().unwrap_or(base.output_dir),
            format: self.format.unwrap_or(base.format),
            range: self.split_args().1.unwrap_or_default().to_string(),
        }
    }
}

fn debug_requested(cli: &Cli) -> bool {
    cli.debug
        || std::env::var("DEBUG").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(IndicatifWriter)
        .with_target(false)
        .with_ansi(true)
        .init();
}

/// 询问是否下载全部章节
fn confirm(prompt: &str) -> io::Result<bool> {
    get_multi().suspend(|| {
        print!("{} [y/N] ", prompt);
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(debug_requested(&cli));

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let (url, range_arg) = cli.split_args();
    let Some(url) = url else {
        bail!("missing series URL (an argument starting with http)");
    };

    // 依赖项初始化与注入 (Dependency Injection)
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    };
    let config = Arc::new(config.context("failed to load configuration")?);
    let settings = Arc::new(cli.settings(&config));
    let ctx = ServiceContext::new(config.clone()).context("failed to build HTTP client")?;

    let site: Arc<dyn SiteAdapter> = Arc::from(
        SiteRegistry::default()
            .detect(url, settings.clone(), &ctx)
            .await
            .context("site not supported")?,
    );
    if site.uses_browser() {
        info!("{} 需要远程浏览器，解析可能较慢", site.id());
    }

    let title = site.fetch_title().await.context("failed to fetch title")?;
    info!("作品: {}", title);

    let (mut chapters, errors) = site.fetch_chapters().await;
    for e in &errors {
        warn!("章节列表部分获取失败: {}", e);
    }
    if chapters.is_empty() {
        match errors.into_iter().next() {
            Some(e) => return Err(e).context("failed to fetch chapters"),
            None => bail!("no chapters found for {}", title),
        }
    }
    sort_by_number(&mut chapters);

    let range_text = match range_arg {
        Some(text) => text.to_string(),
        None => {
            let last = chapters.last().map(|c| c.number()).unwrap_or(1.0);
            let all = format!("1-{}", format_number(last));
            if !cli.yes {
                let prompt = format!("No range given, download all chapters ({}) of {}?", all, title);
                if !confirm(&prompt).context("failed to read confirmation")? {
                    info!("已取消");
                    return Ok(ExitCode::SUCCESS);
                }
            }
            all
        }
    };

    let ranges = range::parse(&range_text).with_context(|| format!("invalid range {:?}", range_text))?;
    let selected = filter_ranges(&chapters, &ranges);
    if selected.is_empty() {
        bail!("no chapters match {}", range::format_ranges(&ranges));
    }
    for chapter in &selected {
        tracing::debug!("已选择 {} {}", format_number(chapter.number()), chapter.title());
    }

    tokio::fs::create_dir_all(&settings.output_dir)
        .await
        .with_context(|| format!("failed to create output directory {:?}", settings.output_dir))?;

    let mut options = PipelineOptions::from_site(site.as_ref(), title, RetryPolicy::from(&config.retry));
    options.range = range_text;

    // 建立 UI 事件反馈链路 (Event feedback loop)
    let (event_sender, event_receiver) = create_event_channel();
    let ui_handle = Ui::run(event_receiver);

    let fetcher: Arc<dyn PageFetcher> = Arc::new(ctx.http.clone());
    let pipeline = ChapterPipeline::new(site, fetcher, options).with_events(event_sender);

    // 信号处理与优雅退出 (Signal Handling)
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let result = tokio::select! {
        result = pipeline.run(selected) => result,
        _ = shutdown.cancelled() => {
            warn!("收到中断信号，已停止下载");
            return Ok(ExitCode::from(130));
        }
    };

    // 发送端全部释放后 UI 任务退出
    drop(pipeline);
    let _ = ui_handle.await;

    let report = result.context("bundle failed")?;
    for (number, reason) in &report.failed {
        warn!("章节 {} 下载失败: {}", format_number(*number), reason);
    }
    if let Some(path) = &report.bundle {
        info!("合集: {}", path.display());
    }
    info!(
        "完成 {} 个章节，失败 {} 个",
        report.completed.len(),
        report.failed.len()
    );

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("comic-downloader").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn url_and_range_are_order_agnostic() {
        let a = cli(&["https://mangadex.org/title/x", "1-3,5"]);
        let b = cli(&["1-3,5", "https://mangadex.org/title/x"]);
        assert_eq!(a.split_args(), (Some("https://mangadex.org/title/x"), Some("1-3,5")));
        assert_eq!(a.split_args(), b.split_args());
        assert_eq!(cli(&["http://x.org/a"]).split_args(), (Some("http://x.org/a"), None));
    }

    #[test]
    fn flags_override_config_and_are_capped() {
        let parsed = cli(&[
            "https://x.org/a",
            "-b",
            "-c",
            "9",
            "-C",
            "3",
            "-f",
            "EPUB",
            "-t",
            "{series} {number}",
            "-l",
            "es",
        ]);
        let settings = parsed.settings(&AppConfig::default());
        assert!(settings.bundle);
        assert_eq!(settings.max_concurrency, MaxConcurrency { chapters: 5, pages: 3 });
        assert_eq!(settings.format, ArchiveFormat::Epub);
        assert_eq!(settings.filename_template, "{series} {number}");
        assert_eq!(settings.language.as_deref(), Some("es"));
        assert_eq!(settings.range, "");
    }

    #[test]
    fn config_values_apply_without_flags() {
        let mut config = AppConfig::default();
        config.download.concurrency = 2;
        config.download.bundle = true;
        let settings = cli(&["https://x.org/a", "4"]).settings(&config);
        assert!(settings.bundle);
        assert_eq!(settings.max_concurrency.chapters, 2);
        assert_eq!(settings.range, "4");
    }
}
