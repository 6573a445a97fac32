//! 站点定义
//!
//! 每个受支持站点实现的核心接口：URL 识别、标题、章节列表与章节页面。

use async_trait::async_trait;

use crate::core::config::{MaxConcurrency, Settings};
use crate::core::error::{ComicError, Result};
use crate::core::model::Chapter;
use crate::packer::ArchiveFormat;

/// 站点适配器 Trait
///
/// 适配器在构造时接收不可变的 [`Settings`]，其余访问器均由其派生。
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// 站点唯一标识
    fn id(&self) -> &str;

    /// 判断 URL 是否归属本站点 (部分站点需要联网探测)
    async fn test(&self) -> Result<bool>;

    /// 获取作品标题 (首次获取后缓存)
    async fn fetch_title(&self) -> Result<String>;

    /// 获取章节列表
    ///
    /// 部分分页失败时返回已取得的章节与错误集合，由调用方决定是否继续。
    async fn fetch_chapters(&self) -> (Vec<Chapter>, Vec<ComicError>);

    /// 获取章节页面，返回填充了 `pages` 的新章节
    async fn fetch_chapter(&self, chapter: &Chapter) -> Result<Chapter>;

    /// 可选能力：带进度回调的章节获取
    fn progress_fetcher(&self) -> Option<&dyn ProgressFetcher> {
        None
    }

    /// 是否依赖远程浏览器
    fn uses_browser(&self) -> bool {
        false
    }

    /// 作为页面请求 Referer 的站点地址
    fn base_url(&self) -> &str;

    fn settings(&self) -> &Settings;

    fn max_concurrency(&self) -> MaxConcurrency {
        self.settings().max_concurrency
    }

    fn preferred_language(&self) -> Option<&str> {
        self.settings().language.as_deref()
    }

    fn filename_template(&self) -> &str {
        &self.settings().filename_template
    }

    fn format(&self) -> ArchiveFormat {
        self.settings().format
    }
}

/// 进度感知的章节获取 (耗时较长的浏览器站点)
#[async_trait]
pub trait ProgressFetcher: Send + Sync {
    /// `tick` 在获取期间被周期性调用
    async fn fetch_chapter_with_progress(
        &self,
        chapter: &Chapter,
        tick: &(dyn Fn() + Send + Sync),
    ) -> Result<Chapter>;
}
