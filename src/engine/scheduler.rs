//! 章节内页面调度器 (Page Fetch Scheduler)
//!
//! 以有界并发下载单个章节的全部页面：每页一个任务，信号量限流，
//! 固定间隔重试，首个错误胜出，最终按页码恢复顺序。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::core::config::{MAX_PAGE_CONCURRENCY, RetryConfig};
use crate::core::error::{ComicError, Result};
use crate::core::model::{Chapter, DownloadedFile, Page};
use crate::interfaces::PageFetcher;

/// 单页重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数 (含首次)
    pub attempts: u32,
    /// 两次尝试之间的固定间隔
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            attempts: cfg.attempts.max(1),
            backoff: Duration::from_millis(cfg.backoff_ms),
        }
    }
}

/// 单页完成通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageProgress {
    pub page: u32,
    /// `page * 100 / total`
    pub percent: u32,
    /// 失败时的错误描述
    pub error: Option<String>,
}

pub type ProgressFn = Arc<dyn Fn(PageProgress) + Send + Sync>;

/// 首错槽位：只记录第一个错误，同时对外暴露失败标志
#[derive(Default)]
struct FirstError {
    failed: AtomicBool,
    slot: Mutex<Option<ComicError>>,
}

impl FirstError {
    fn record(&self, err: ComicError) {
        if !self.failed.swap(true, Ordering::SeqCst) {
            *self.slot.lock() = Some(err);
        }
    }

    fn is_set(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn take(&self) -> Option<ComicError> {
        self.slot.lock().take()
    }
}

/// 章节页面调度器
#[derive(Clone)]
pub struct ChapterFetchScheduler {
    fetcher: Arc<dyn PageFetcher>,
    concurrency: usize,
    retry: RetryPolicy,
}

impl ChapterFetchScheduler {
    pub fn new(fetcher: Arc<dyn PageFetcher>, concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.clamp(1, MAX_PAGE_CONCURRENCY),
            retry,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 下载章节全部页面
    ///
    /// 成功时返回按页码排序、长度等于页数的文件列表；任一页耗尽重试后返回首个错误。
    /// 无论成败，所有已派发任务都会在返回前被回收。
    pub async fn fetch(
        &self,
        chapter: &Chapter,
        referer: &str,
        on_progress: ProgressFn,
    ) -> Result<Vec<DownloadedFile>> {
        let total = chapter.pages.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let slots = Arc::new(Semaphore::new(self.concurrency));
        let first_error = Arc::new(FirstError::default());
        let referer: Arc<str> = Arc::from(referer);
        let mut join_set = JoinSet::new();

        for (index, page) in chapter.pages.iter().cloned().enumerate() {
            let slots = slots.clone();
            let first_error = first_error.clone();
            let fetcher = self.fetcher.clone();
            let referer = referer.clone();
            let on_progress = on_progress.clone();
            let retry = self.retry;

            join_set.spawn(async move {
                let _permit = match slots.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        first_error.record(ComicError::Custom(e.to_string()));
                        return None;
                    }
                };

                // 其他页面已失败，未开始的页面不再发起请求
                if first_error.is_set() {
                    return None;
                }

                let percent = (page.number as usize * 100 / total).min(100) as u32;
                match fetch_with_retry(fetcher.as_ref(), &page, &referer, retry).await {
                    Ok(data) => {
                        on_progress(PageProgress {
                            page: page.number,
                            percent,
                            error: None,
                        });
                        Some((index, DownloadedFile::new(&page, data)))
                    }
                    Err(e) => {
                        on_progress(PageProgress {
                            page: page.number,
                            percent,
                            error: Some(e.to_string()),
                        });
                        // 在释放许可前登记，保证排队中的页面能看到失败标志
                        first_error.record(ComicError::PageFailed {
                            page: page.number,
                            source: Box::new(e),
                        });
                        None
                    }
                }
            });
        }

        let mut files: Vec<Option<DownloadedFile>> = (0..total).map(|_| None).collect();
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(Some((index, file))) => files[index] = Some(file),
                Ok(None) => {}
                Err(e) => first_error.record(ComicError::Custom(format!("page task aborted: {}", e))),
            }
        }

        if let Some(err) = first_error.take() {
            warn!("章节 {} 下载失败: {}", chapter.title, err);
            return Err(err);
        }

        let mut files = files
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ComicError::Custom(format!("missing pages for {}", chapter.title)))?;
        files.sort_by_key(|f| f.page);
        Ok(files)
    }
}

/// 固定间隔重试，仅最后一次失败向上传递
async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    page: &Page,
    referer: &str,
    retry: RetryPolicy,
) -> Result<Bytes> {
    let mut attempt = 1;
    loop {
        match fetcher.fetch(&page.url, referer).await {
            Ok(data) => return Ok(data),
            Err(e) if attempt < retry.attempts => {
                debug!("第 {} 页第 {} 次请求失败，稍后重试: {}", page.number, attempt, e);
                tokio::time::sleep(retry.backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
