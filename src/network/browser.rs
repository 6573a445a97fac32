//! 远程浏览器服务
//!
//! 通过 DevTools WebSocket 连接远程无头浏览器 (browserless)，在目标页面中执行脚本并取回结果。

use std::time::Duration;

use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::core::config::BrowserConfig;
use crate::core::error::{ComicError, Result};

const SELECTOR_POLL: Duration = Duration::from_millis(250);

fn browser_err(e: impl std::fmt::Display) -> ComicError {
    ComicError::Browser(e.to_string())
}

/// 页面脚本任务
#[derive(Debug, Clone)]
pub struct BrowserJob<'a> {
    pub url: &'a str,
    /// 执行脚本前需要出现的元素
    pub wait_for: &'a str,
    /// 元素出现后的额外等待 (懒加载图片等)
    pub settle: Duration,
    /// 返回值可被 JSON 反序列化的表达式
    pub script: &'a str,
}

/// 浏览器会话
/// 采用显式的所有权管理，确保关闭逻辑的确定性
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    async fn connect(endpoint: &str) -> Result<Self> {
        let (browser, mut handler) = Browser::connect(endpoint).await.map_err(browser_err)?;

        // 启动事件循环
        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(Self { browser, handler })
    }

    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("关闭远程浏览器会话: {}", e);
        }
        self.handler.abort();
    }
}

/// 远程浏览器服务
pub struct RemoteBrowser {
    config: BrowserConfig,
}

impl RemoteBrowser {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    /// 打开页面、等待元素并执行脚本；连接与执行共用一个总超时
    pub async fn evaluate<T: DeserializeOwned>(&self, job: BrowserJob<'_>) -> Result<T> {
        let endpoint = self.config.endpoint()?;
        let limit = Duration::from_secs(self.config.timeout_secs);

        debug!("远程浏览器加载 {}", job.url);
        let mut session = None;
        let result = timeout(limit, Self::run_session(&endpoint, &job, &mut session)).await;
        if let Some(session) = session {
            session.close().await;
        }

        result.map_err(|_| ComicError::Browser(format!("{} timed out after {:?}", job.url, limit)))?
    }

    /// 建立的会话写入 `slot`，超时后仍可由调用方关闭
    async fn run_session<T: DeserializeOwned>(
        endpoint: &str,
        job: &BrowserJob<'_>,
        slot: &mut Option<BrowserSession>,
    ) -> Result<T> {
        let session = slot.insert(BrowserSession::connect(endpoint).await?);
        Self::execute(&session.browser, job).await
    }

    async fn execute<T: DeserializeOwned>(browser: &Browser, job: &BrowserJob<'_>) -> Result<T> {
        let page = browser.new_page(job.url).await.map_err(browser_err)?;
        Self::wait_for(&page, job.wait_for).await;
        if !job.settle.is_zero() {
            sleep(job.settle).await;
        }

        let value = page
            .evaluate(job.script)
            .await
            .map_err(browser_err)?
            .into_value::<T>()
            .map_err(browser_err);

        if let Err(e) = page.close().await {
            debug!("关闭页面: {}", e);
        }
        value
    }

    /// 轮询等待元素出现，由外层超时兜底
    async fn wait_for(page: &Page, selector: &str) {
        if selector.is_empty() {
            return;
        }
        while page.find_element(selector).await.is_err() {
            sleep(SELECTOR_POLL).await;
        }
    }
}
