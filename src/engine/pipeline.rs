//! 章节下载管线
//!
//! 负责协调整个任务：章节级有界并发 -> 页面调度 -> 单章归档或合集暂存 -> 合集打包。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::core::error::{ComicError, Result};
use crate::core::event::{DownloadEvent, EventSender};
use crate::core::model::{Chapter, ChapterState, DownloadedChapter, format_number};
use crate::interfaces::{PageFetcher, SiteAdapter};
use crate::packer::{pack_bundle, pack_single};

use super::context::{PipelineOptions, RuntimeContext};
use super::scheduler::{ChapterFetchScheduler, PageProgress, ProgressFn};

/// 单章节执行结果
#[derive(Debug)]
enum ChapterOutcome {
    Archived { slot: usize, number: f64, path: PathBuf },
    Staged { slot: usize, number: f64 },
    Failed { slot: usize, number: f64, error: String },
}

impl ChapterOutcome {
    fn slot(&self) -> usize {
        match self {
            Self::Archived { slot, .. } | Self::Staged { slot, .. } | Self::Failed { slot, .. } => *slot,
        }
    }
}

/// 任务汇总
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// 成功下载的章节号
    pub completed: Vec<f64>,
    /// 失败章节及原因
    pub failed: Vec<(f64, String)>,
    /// 非合集模式的归档路径
    pub archived: Vec<PathBuf>,
    pub bundle: Option<PathBuf>,
}

impl PipelineReport {
    fn record(&mut self, outcome: ChapterOutcome) {
        match outcome {
            ChapterOutcome::Archived { number, path, .. } => {
                self.completed.push(number);
                self.archived.push(path);
            }
            ChapterOutcome::Staged { number, .. } => self.completed.push(number),
            ChapterOutcome::Failed { number, error, .. } => self.failed.push((number, error)),
        }
    }
}

/// 章节下载管线
pub struct ChapterPipeline {
    site: Arc<dyn SiteAdapter>,
    fetcher: Arc<dyn PageFetcher>,
    options: PipelineOptions,
    events: Option<EventSender>,
}

impl ChapterPipeline {
    pub fn new(site: Arc<dyn SiteAdapter>, fetcher: Arc<dyn PageFetcher>, options: PipelineOptions) -> Self {
        Self {
            site,
            fetcher,
            options,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// 执行下载流程
    ///
    /// 单章失败只记录在报告中；合集打包失败则整体返回错误。
    pub async fn run(&self, chapters: Vec<Chapter>) -> Result<PipelineReport> {
        let scheduler = ChapterFetchScheduler::new(
            self.fetcher.clone(),
            self.options.page_concurrency,
            self.options.retry,
        );
        let ctx = Arc::new(RuntimeContext::new(
            self.site.clone(),
            scheduler,
            self.options.clone(),
            self.events.clone(),
        ));

        ctx.emit(DownloadEvent::JobStarted {
            series: self.options.series.clone(),
            chapters: chapters.iter().map(display_title).collect(),
        });
        info!("共 {} 个章节待下载: {}", chapters.len(), self.options.series);

        // 按 slot 记录尚未回报结果的章节
        let mut pending: Vec<Option<f64>> = chapters.iter().map(|c| Some(c.number)).collect();
        let mut join_set = JoinSet::new();
        for (slot, chapter) in chapters.into_iter().enumerate() {
            join_set.spawn(run_chapter(ctx.clone(), slot, chapter));
        }

        let mut report = PipelineReport::default();
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(outcome) => {
                    if let Some(entry) = pending.get_mut(outcome.slot()) {
                        *entry = None;
                    }
                    report.record(outcome);
                }
                Err(e) => error!("章节任务异常退出: {}", e),
            }
        }
        for number in pending.into_iter().flatten() {
            report.failed.push((number, "chapter task aborted".to_string()));
        }

        if self.options.bundle {
            report.bundle = Some(self.finalize_bundle(&ctx).await?);
        }

        ctx.emit(DownloadEvent::JobFinished {
            completed: report.completed.len(),
            failed: report.failed.len(),
        });
        Ok(report)
    }

    /// 汇总暂存章节并打包为单一产物
    async fn finalize_bundle(&self, ctx: &Arc<RuntimeContext>) -> Result<PathBuf> {
        let mut staged = std::mem::take(&mut *ctx.staged.lock());
        sort_staged(&mut staged);

        let total_files = staged.iter().map(|c| c.files.len() as u64).sum();
        ctx.emit(DownloadEvent::BundleStarted { total_files });
        info!("正在打包合集 ({} 个章节)...", staged.len());

        let worker = ctx.clone();
        let result = tokio::task::spawn_blocking(move || {
            let tick = || worker.emit(DownloadEvent::BundleTick);
            pack_bundle(&worker.pack_target(), &staged, &worker.options.range, &tick)
        })
        .await
        .map_err(|e| ComicError::Custom(format!("bundle worker failed: {}", e)))
        .and_then(|r| r);

        match result {
            Ok(path) => {
                ctx.emit(DownloadEvent::BundleSaved {
                    path: path.display().to_string(),
                });
                info!("合集已保存: {:?}", path);
                Ok(path)
            }
            Err(e) => {
                error!("合集打包失败: {}", e);
                ctx.emit(DownloadEvent::BundleFailed { error: e.to_string() });
                Err(e)
            }
        }
    }
}

/// 合集按章节号稳定排序，同号保持完成顺序
pub fn sort_staged(staged: &mut [DownloadedChapter]) {
    staged.sort_by(|a, b| a.chapter.number.total_cmp(&b.chapter.number));
}

fn display_title(chapter: &Chapter) -> String {
    if chapter.title.is_empty() {
        format!("Chapter {}", format_number(chapter.number))
    } else {
        chapter.title.clone()
    }
}

/// 单章节任务：获取 -> 下载 -> 归档/暂存
async fn run_chapter(ctx: Arc<RuntimeContext>, slot: usize, chapter: Chapter) -> ChapterOutcome {
    let number = chapter.number;
    let _permit = match ctx.chapter_slots.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            return ChapterOutcome::Failed {
                slot,
                number,
                error: e.to_string(),
            };
        }
    };

    ctx.advance(slot, ChapterState::Pending, ChapterState::Fetching);
    let detailed = match fetch_detail(&ctx, slot, &chapter).await {
        Ok(detailed) => detailed,
        Err(e) => {
            warn!("章节 {} 获取失败: {}", format_number(number), e);
            ctx.fail(slot, ChapterState::Fetching, e.to_string());
            return ChapterOutcome::Failed {
                slot,
                number,
                error: e.to_string(),
            };
        }
    };

    ctx.emit(DownloadEvent::ChapterTotal {
        slot,
        total: ctx.options.chapter_ticks(detailed.pages.len()),
    });
    ctx.advance(slot, ChapterState::Fetching, ChapterState::Downloading);

    let files = match ctx
        .scheduler
        .fetch(&detailed, ctx.site.base_url(), page_progress(&ctx, slot))
        .await
    {
        Ok(files) => files,
        Err(e) => {
            warn!("章节 {} 下载失败: {}", format_number(number), e);
            ctx.fail(slot, ChapterState::Downloading, e.to_string());
            return ChapterOutcome::Failed {
                slot,
                number,
                error: e.to_string(),
            };
        }
    };

    let downloaded = DownloadedChapter {
        chapter: detailed,
        files,
    };

    if ctx.options.bundle {
        ctx.staged.lock().push(downloaded);
        ctx.advance(slot, ChapterState::Downloading, ChapterState::Staged);
        ctx.advance(slot, ChapterState::Staged, ChapterState::Done);
        return ChapterOutcome::Staged { slot, number };
    }

    ctx.advance(slot, ChapterState::Downloading, ChapterState::Archiving);
    let worker = ctx.clone();
    let archived = tokio::task::spawn_blocking(move || {
        let tick = || worker.tick(slot);
        pack_single(&worker.pack_target(), &downloaded, &tick)
    })
    .await
    .map_err(|e| ComicError::Custom(format!("archive worker failed: {}", e)))
    .and_then(|r| r);

    match archived {
        Ok(path) => {
            info!("章节 {} 已保存: {:?}", format_number(number), path);
            ctx.emit(DownloadEvent::ChapterArchived {
                slot,
                path: path.display().to_string(),
            });
            ctx.advance(slot, ChapterState::Archiving, ChapterState::Done);
            ChapterOutcome::Archived { slot, number, path }
        }
        Err(e) => {
            // 归档失败不影响其他章节；状态机上仍以 Done 收尾，报告中计入失败
            warn!("章节 {} 归档失败: {}", format_number(number), e);
            let error = format!("archive failed: {}", e);
            ctx.emit(DownloadEvent::ChapterState {
                slot,
                state: ChapterState::Done,
                detail: Some(error.clone()),
            });
            ChapterOutcome::Failed { slot, number, error }
        }
    }
}

/// 获取章节页面，站点支持时使用带进度的获取方式
async fn fetch_detail(ctx: &Arc<RuntimeContext>, slot: usize, chapter: &Chapter) -> Result<Chapter> {
    match ctx.site.progress_fetcher() {
        Some(fetcher) => {
            let tick = || ctx.tick(slot);
            fetcher.fetch_chapter_with_progress(chapter, &tick).await
        }
        None => ctx.site.fetch_chapter(chapter).await,
    }
}

/// 每页完成推进一格，失败页额外上报错误
fn page_progress(ctx: &Arc<RuntimeContext>, slot: usize) -> ProgressFn {
    let ctx = ctx.clone();
    Arc::new(move |progress: PageProgress| {
        ctx.tick(slot);
        if let Some(error) = progress.error {
            ctx.emit(DownloadEvent::PageFailed {
                slot,
                page: progress.page,
                error,
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs::File;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::core::config::Settings;
    use crate::core::event::create_event_channel;
    use crate::core::model::Page;
    use crate::engine::scheduler::RetryPolicy;
    use crate::interfaces::ProgressFetcher;
    use crate::packer::ArchiveFormat;

    /// 内存站点：章节号 -> (页数, 延迟)，可指定失败章节
    struct FakeSite {
        settings: Settings,
        layout: HashMap<String, (u32, u64)>,
        broken: Option<String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        with_progress: bool,
    }

    impl FakeSite {
        fn new(layout: &[(f64, u32, u64)]) -> Self {
            Self {
                settings: Settings::default(),
                layout: layout
                    .iter()
                    .map(|&(n, pages, delay)| (format!("c{n}"), (pages, delay)))
                    .collect(),
                broken: None,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                with_progress: false,
            }
        }

        fn chapters(&self, numbers: &[f64]) -> Vec<Chapter> {
            numbers
                .iter()
                .map(|&n| Chapter::new(n, format!("Chapter {n}"), format!("c{n}")))
                .collect()
        }
    }

    #[async_trait]
    impl SiteAdapter for FakeSite {
        fn id(&self) -> &str {
            "fake"
        }

        async fn test(&self) -> Result<bool> {
            Ok(true)
        }

        async fn fetch_title(&self) -> Result<String> {
            Ok("Fake".into())
        }

        async fn fetch_chapters(&self) -> (Vec<Chapter>, Vec<ComicError>) {
            (Vec::new(), Vec::new())
        }

        async fn fetch_chapter(&self, chapter: &Chapter) -> Result<Chapter> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let (pages, delay) = self.layout.get(&chapter.locator).copied().unwrap_or((1, 1));
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.broken.as_deref() == Some(chapter.locator.as_str()) {
                return Err(ComicError::Parse("chapter page missing".into()));
            }
            let pages = (1..=pages)
                .map(|p| Page::new(p, format!("{}/{p}.jpg", chapter.locator)))
                .collect();
            Ok(chapter.with_pages(pages))
        }

        fn progress_fetcher(&self) -> Option<&dyn ProgressFetcher> {
            if self.with_progress { Some(self) } else { None }
        }

        fn base_url(&self) -> &str {
            "https://fake.example/"
        }

        fn settings(&self) -> &Settings {
            &self.settings
        }
    }

    #[async_trait]
    impl ProgressFetcher for FakeSite {
        async fn fetch_chapter_with_progress(
            &self,
            chapter: &Chapter,
            tick: &(dyn Fn() + Send + Sync),
        ) -> Result<Chapter> {
            tick();
            tick();
            self.fetch_chapter(chapter).await
        }
    }

    struct EchoFetcher;

    #[async_trait]
    impl PageFetcher for EchoFetcher {
        async fn fetch(&self, url: &str, _referer: &str) -> Result<Bytes> {
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(Bytes::from(url.to_string()))
        }
    }

    /// 指定前缀的页面始终失败
    struct FailingFetcher {
        prefix: &'static str,
    }

    #[async_trait]
    impl PageFetcher for FailingFetcher {
        async fn fetch(&self, url: &str, _referer: &str) -> Result<Bytes> {
            if url.starts_with(self.prefix) {
                return Err(ComicError::Custom(format!("refused {url}")));
            }
            Ok(Bytes::from(url.to_string()))
        }
    }

    fn options(dir: &std::path::Path, bundle: bool) -> PipelineOptions {
        PipelineOptions::builder()
            .series("Fake")
            .output_dir(dir)
            .bundle(bundle)
            .format(ArchiveFormat::Cbz)
            .range("1-2")
            .retry(RetryPolicy {
                attempts: 2,
                backoff: Duration::from_millis(5),
            })
            .build()
    }

    fn downloaded(number: f64) -> DownloadedChapter {
        DownloadedChapter {
            chapter: Chapter::new(number, "", "x"),
            files: Vec::new(),
        }
    }

    #[test]
    fn staged_chapters_sort_by_number() {
        let mut staged = vec![downloaded(3.0), downloaded(1.0), downloaded(2.0)];
        sort_staged(&mut staged);
        let numbers: Vec<f64> = staged.iter().map(|c| c.chapter.number).collect();
        assert_eq!(numbers, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn bundle_orders_chapters_regardless_of_completion() {
        let dir = tempfile::tempdir().unwrap();
        // 章节 1 更慢，先完成的是章节 2
        let site = Arc::new(FakeSite::new(&[(2.0, 3, 1), (1.0, 2, 40)]));
        let chapters = site.chapters(&[2.0, 1.0]);
        let pipeline = ChapterPipeline::new(site, Arc::new(EchoFetcher), options(dir.path(), true));

        let report = pipeline.run(chapters).await.unwrap();

        let path = report.bundle.expect("bundle path");
        assert_eq!(path, dir.path().join("Fake Chapters 1-2 - bundle.cbz"));
        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "Chapter 01/001.jpg",
                "Chapter 01/002.jpg",
                "Chapter 02/001.jpg",
                "Chapter 02/002.jpg",
                "Chapter 02/003.jpg",
            ]
        );
        assert!(report.archived.is_empty());
    }

    #[tokio::test]
    async fn failing_chapter_does_not_affect_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let mut site = FakeSite::new(&[(1.0, 2, 1), (2.0, 2, 1), (3.0, 2, 1)]);
        site.broken = Some("c2".into());
        let site = Arc::new(site);
        let chapters = site.chapters(&[1.0, 2.0, 3.0]);
        let pipeline = ChapterPipeline::new(site, Arc::new(EchoFetcher), options(dir.path(), false));

        let report = pipeline.run(chapters).await.unwrap();

        let mut completed = report.completed.clone();
        completed.sort_by(f64::total_cmp);
        assert_eq!(completed, vec![1.0, 3.0]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, 2.0);
        assert_eq!(report.archived.len(), 2);
        assert!(dir.path().join("Fake 0001 - Chapter 1.cbz").is_file());
        assert!(dir.path().join("Fake 0003 - Chapter 3.cbz").is_file());
        assert!(report.bundle.is_none());
    }

    #[tokio::test]
    async fn chapter_concurrency_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let layout: Vec<(f64, u32, u64)> = (1..=8).map(|n| (n as f64, 1, 15)).collect();
        let site = Arc::new(FakeSite::new(&layout));
        let chapters = site.chapters(&layout.iter().map(|l| l.0).collect::<Vec<_>>());
        let mut opts = options(dir.path(), false);
        opts.chapter_concurrency = 2;
        let pipeline = ChapterPipeline::new(site.clone(), Arc::new(EchoFetcher), opts);

        let report = pipeline.run(chapters).await.unwrap();

        assert_eq!(report.completed.len(), 8);
        let peak = site.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak {peak}");
    }

    #[tokio::test]
    async fn progress_events_follow_tick_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut site = FakeSite::new(&[(1.0, 3, 1)]);
        site.with_progress = true;
        let site = Arc::new(site);
        let chapters = site.chapters(&[1.0]);
        let (tx, rx) = create_event_channel();
        let pipeline =
            ChapterPipeline::new(site, Arc::new(EchoFetcher), options(dir.path(), false)).with_events(tx);

        pipeline.run(chapters).await.unwrap();

        let mut ticks = 0;
        let mut total = None;
        let mut states = Vec::new();
        while let Some(event) = rx.try_recv() {
            match event {
                DownloadEvent::ChapterTick { delta, .. } => ticks += delta,
                DownloadEvent::ChapterTotal { total: t, .. } => total = Some(t),
                DownloadEvent::ChapterState { state, .. } => states.push(state),
                _ => {}
            }
        }
        // 2 次获取进度 + 3 页下载 + 3 页归档
        assert_eq!(ticks, 8);
        assert_eq!(total, Some(86));
        assert_eq!(
            states,
            vec![
                ChapterState::Fetching,
                ChapterState::Downloading,
                ChapterState::Archiving,
                ChapterState::Done
            ]
        );
    }

    #[tokio::test]
    async fn empty_bundle_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut site = FakeSite::new(&[(1.0, 1, 1)]);
        site.broken = Some("c1".into());
        let site = Arc::new(site);
        let chapters = site.chapters(&[1.0]);
        let pipeline = ChapterPipeline::new(site, Arc::new(EchoFetcher), options(dir.path(), true));

        let err = pipeline.run(chapters).await.unwrap_err();
        assert!(matches!(err, ComicError::NothingToBundle));
    }

    #[tokio::test]
    async fn overlapping_ranges_bundle_repeated_chapter() {
        let dir = tempfile::tempdir().unwrap();
        let site = Arc::new(FakeSite::new(&[(1.0, 1, 1), (2.0, 2, 1)]));
        let chapters = site.chapters(&[1.0, 2.0, 2.0]);
        let mut opts = options(dir.path(), true);
        opts.range = "1-2,2".into();
        let pipeline = ChapterPipeline::new(site, Arc::new(EchoFetcher), opts);

        let report = pipeline.run(chapters).await.unwrap();

        assert_eq!(report.completed.len(), 3);
        let path = report.bundle.expect("bundle path");
        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "Chapter 01/001.jpg",
                "Chapter 02/001.jpg",
                "Chapter 02/002.jpg",
                "Chapter 02 (2)/001.jpg",
                "Chapter 02 (2)/002.jpg",
            ]
        );
    }

    #[tokio::test]
    async fn page_failure_fails_only_its_chapter() {
        let dir = tempfile::tempdir().unwrap();
        let site = Arc::new(FakeSite::new(&[(1.0, 2, 1), (2.0, 3, 1), (3.0, 2, 1)]));
        let chapters = site.chapters(&[1.0, 2.0, 3.0]);
        let (tx, rx) = create_event_channel();
        let pipeline = ChapterPipeline::new(
            site,
            Arc::new(FailingFetcher { prefix: "c2/" }),
            options(dir.path(), false),
        )
        .with_events(tx);

        let report = pipeline.run(chapters).await.unwrap();

        assert_eq!(report.failed.len(), 1);
        let (number, reason) = &report.failed[0];
        assert_eq!(*number, 2.0);
        assert!(reason.starts_with("page "), "{reason}");
        let mut completed = report.completed.clone();
        completed.sort_by(f64::total_cmp);
        assert_eq!(completed, vec![1.0, 3.0]);
        assert!(dir.path().join("Fake 0001 - Chapter 1.cbz").is_file());
        assert!(dir.path().join("Fake 0003 - Chapter 3.cbz").is_file());
        assert!(!dir.path().join("Fake 0002 - Chapter 2.cbz").exists());

        let mut page_failures = Vec::new();
        let mut failed_slots = Vec::new();
        while let Some(event) = rx.try_recv() {
            match event {
                DownloadEvent::PageFailed { slot, .. } => page_failures.push(slot),
                DownloadEvent::ChapterState {
                    slot,
                    state: ChapterState::Failed,
                    ..
                } => failed_slots.push(slot),
                _ => {}
            }
        }
        assert!(!page_failures.is_empty());
        assert!(page_failures.iter().all(|&slot| slot == 1));
        assert_eq!(failed_slots, vec![1]);
    }

    #[tokio::test]
    async fn archive_failure_is_reported_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let site = Arc::new(FakeSite::new(&[(1.0, 2, 1)]));
        let chapters = site.chapters(&[1.0]);
        let missing = dir.path().join("missing");
        let pipeline = ChapterPipeline::new(site, Arc::new(EchoFetcher), options(&missing, false));

        let report = pipeline.run(chapters).await.unwrap();

        assert!(report.completed.is_empty());
        assert!(report.archived.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.starts_with("archive failed"), "{}", report.failed[0].1);
    }
}
