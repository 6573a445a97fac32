//! 引擎运行时上下文 (Runtime Context)
//!
//! 维护章节任务间的共享状态：站点、页面调度器、章节信号量、合集暂存区与事件出口。

use std::path::PathBuf;
use std::sync::Arc;

use bon::Builder;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::core::config::MAX_CHAPTER_CONCURRENCY;
use crate::core::event::{DownloadEvent, EventSender};
use crate::core::model::{ChapterState, DownloadedChapter};
use crate::interfaces::SiteAdapter;
use crate::packer::{ArchiveFormat, PackTarget};

use super::scheduler::{ChapterFetchScheduler, RetryPolicy};

/// 章节 "获取" 阶段占用的基础进度量
pub const FETCH_TICKS: u64 = 80;

/// 单次下载任务参数
#[derive(Debug, Clone, Builder)]
pub struct PipelineOptions {
    #[builder(default = MAX_CHAPTER_CONCURRENCY)]
    pub chapter_concurrency: usize,
    #[builder(default = crate::core::config::MAX_PAGE_CONCURRENCY)]
    pub page_concurrency: usize,
    #[builder(default)]
    pub bundle: bool,
    #[builder(into, default = PathBuf::from("."))]
    pub output_dir: PathBuf,
    #[builder(into, default = crate::core::config::DEFAULT_FILENAME_TEMPLATE.to_string())]
    pub filename_template: String,
    #[builder(default)]
    pub format: ArchiveFormat,
    /// 用户输入的原始区间表达式，用于合集命名
    #[builder(into, default)]
    pub range: String,
    /// 作品标题
    #[builder(into)]
    pub series: String,
    #[builder(default)]
    pub retry: RetryPolicy,
}

impl PipelineOptions {
    /// 从站点设置派生
    pub fn from_site(site: &dyn SiteAdapter, series: impl Into<String>, retry: RetryPolicy) -> Self {
        let settings = site.settings();
        let limits = site.max_concurrency();
        Self {
            chapter_concurrency: limits.chapters,
            page_concurrency: limits.pages,
            bundle: settings.bundle,
            output_dir: settings.output_dir.clone(),
            filename_template: site.filename_template().to_string(),
            format: site.format(),
            range: settings.range.clone(),
            series: series.into(),
            retry,
        }
    }

    /// 页数确定后章节进度条的总量；合集模式不计归档阶段
    pub fn chapter_ticks(&self, pages: usize) -> u64 {
        let pages = pages as u64;
        FETCH_TICKS + pages + if self.bundle { 0 } else { pages }
    }
}

/// 任务执行运行时上下文
pub struct RuntimeContext {
    pub site: Arc<dyn SiteAdapter>,
    pub scheduler: ChapterFetchScheduler,
    /// 章节级并发信号量
    pub chapter_slots: Arc<Semaphore>,
    pub options: PipelineOptions,
    /// 合集暂存区 (唯一的跨任务可变状态)
    pub staged: Mutex<Vec<DownloadedChapter>>,
    pub events: Option<EventSender>,
}

impl RuntimeContext {
    pub fn new(
        site: Arc<dyn SiteAdapter>,
        scheduler: ChapterFetchScheduler,
        options: PipelineOptions,
        events: Option<EventSender>,
    ) -> Self {
        let permits = options.chapter_concurrency.clamp(1, MAX_CHAPTER_CONCURRENCY);
        Self {
            site,
            scheduler,
            chapter_slots: Arc::new(Semaphore::new(permits)),
            options,
            staged: Mutex::new(Vec::new()),
            events,
        }
    }

    /// 向事件总线推送消息
    pub fn emit(&self, event: DownloadEvent) {
        if let Some(ref sender) = self.events {
            sender.emit(event);
        }
    }

    pub fn tick(&self, slot: usize) {
        if let Some(ref sender) = self.events {
            sender.chapter_tick(slot);
        }
    }

    /// 推进章节状态 (仅发出合法迁移)
    pub fn advance(&self, slot: usize, from: ChapterState, to: ChapterState) {
        debug_assert!(from.can_advance_to(to), "{from} -> {to}");
        debug!("章节 #{} {} -> {}", slot, from, to);
        if let Some(ref sender) = self.events {
            sender.chapter_state(slot, to);
        }
    }

    pub fn fail(&self, slot: usize, from: ChapterState, error: String) {
        debug_assert!(from.can_advance_to(ChapterState::Failed));
        self.emit(DownloadEvent::ChapterState {
            slot,
            state: ChapterState::Failed,
            detail: Some(error),
        });
    }

    pub fn pack_target(&self) -> PackTarget<'_> {
        PackTarget {
            output_dir: &self.options.output_dir,
            template: &self.options.filename_template,
            series: &self.options.series,
            format: self.options.format,
        }
    }
}
