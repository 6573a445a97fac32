//! asuracomic.net
//!
//! 页面由前端渲染，标题、章节与图片均通过远程浏览器执行脚本获取。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use crate::core::config::Settings;
use crate::core::error::{ComicError, Result};
use crate::core::model::{Chapter, Page};
use crate::interfaces::{ProgressFetcher, SiteAdapter};
use crate::network::browser::{BrowserJob, RemoteBrowser};
use crate::utils::{origin_of, tick_while};

/// 浏览器会话期间的进度心跳间隔
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// 章节列表与图片懒加载的额外等待
const SETTLE: Duration = Duration::from_secs(5);

const TITLE_JS: &str = r#"(() => {
    const el = document.querySelector("div.text-center.sm\\:text-left span.text-xl.font-bold");
    const text = el ? el.textContent.trim() : "";
    return text || document.title.trim();
})()"#;

const CHAPTERS_JS: &str = r#"(() => {
    const chapters = [];
    for (const link of document.querySelectorAll("div.overflow-y-auto a")) {
        const raw = link.textContent.trim();
        const match = raw.match(/(Chapter\s*\d+(?:\.\d+)?)/i);
        const title = match ? match[0] : raw;
        const number = match ? parseFloat(match[0].replace(/[^0-9.]/g, "")) : 0;
        let href = link.getAttribute("href");
        if (href && !href.startsWith("http")) {
            if (href[0] !== "/") {
                href = "/" + href;
            }
            href = window.location.origin + "/series" + href;
        }
        chapters.push({ title, number, url: href || "" });
    }
    return JSON.stringify(chapters);
})()"#;

const IMAGES_JS: &str = r#"JSON.stringify(
    Array.from(document.querySelectorAll("div.w-full.mx-auto.center img")).map(img => img.src)
)"#;

#[derive(Debug, Deserialize)]
struct ChapterData {
    #[serde(default)]
    title: String,
    #[serde(default)]
    number: f64,
    #[serde(default)]
    url: String,
}

pub struct Asura {
    url: String,
    base_url: String,
    settings: Arc<Settings>,
    browser: Arc<RemoteBrowser>,
    title: OnceCell<String>,
}

impl Asura {
    pub fn new(url: &Url, settings: Arc<Settings>, browser: Arc<RemoteBrowser>) -> Self {
        Self {
            url: url.to_string(),
            base_url: origin_of(url),
            settings,
            browser,
            title: OnceCell::new(),
        }
    }

    fn parse_chapter_list(json: &str) -> Result<Vec<Chapter>> {
        let items: Vec<ChapterData> = serde_json::from_str(json)?;
        Ok(items
            .into_iter()
            .filter(|c| !c.url.is_empty())
            .map(|c| Chapter::new(c.number, c.title, c.url).with_language("en"))
            .collect())
    }

    fn parse_images(json: &str) -> Result<Vec<Page>> {
        let sources: Vec<String> = serde_json::from_str(json)?;
        if sources.is_empty() {
            return Err(ComicError::Parse("no images found on chapter page".into()));
        }
        Ok(sources
            .into_iter()
            .enumerate()
            .map(|(i, src)| Page::new(i as u32 + 1, src))
            .collect())
    }
}

#[async_trait]
impl SiteAdapter for Asura {
    fn id(&self) -> &str {
        "asura"
    }

    async fn test(&self) -> Result<bool> {
        Ok(self.url.contains("asuracomic.net"))
    }

    async fn fetch_title(&self) -> Result<String> {
        self.title
            .get_or_try_init(|| async {
                let title: String = self
                    .browser
                    .evaluate(BrowserJob {
                        url: &self.url,
                        wait_for: "body",
                        settle: Duration::ZERO,
                        script: TITLE_JS,
                    })
                    .await?;
                Ok::<_, ComicError>(title.trim().to_string())
            })
            .await
            .cloned()
    }

    async fn fetch_chapters(&self) -> (Vec<Chapter>, Vec<ComicError>) {
        let json: Result<String> = self
            .browser
            .evaluate(BrowserJob {
                url: &self.url,
                wait_for: "div.overflow-y-auto",
                settle: SETTLE,
                script: CHAPTERS_JS,
            })
            .await;

        match json.and_then(|json| Self::parse_chapter_list(&json)) {
            Ok(chapters) => {
                debug!("浏览器解析到 {} 个章节", chapters.len());
                (chapters, Vec::new())
            }
            Err(e) => (Vec::new(), vec![e]),
        }
    }

    async fn fetch_chapter(&self, chapter: &Chapter) -> Result<Chapter> {
        let json: String = self
            .browser
            .evaluate(BrowserJob {
                url: &chapter.locator,
                wait_for: "body",
                settle: SETTLE,
                script: IMAGES_JS,
            })
            .await?;

        let pages = Self::parse_images(&json)?;
        Ok(chapter.with_pages(pages).with_language("en"))
    }

    fn progress_fetcher(&self) -> Option<&dyn ProgressFetcher> {
        Some(self)
    }

    fn uses_browser(&self) -> bool {
        true
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }
}

#[async_trait]
impl ProgressFetcher for Asura {
    async fn fetch_chapter_with_progress(
        &self,
        chapter: &Chapter,
        tick: &(dyn Fn() + Send + Sync),
    ) -> Result<Chapter> {
        tick_while(self.fetch_chapter(chapter), TICK_INTERVAL, tick).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BrowserConfig;

    fn adapter(url: &str) -> Asura {
        Asura::new(
            &Url::parse(url).unwrap(),
            Arc::new(Settings::default()),
            Arc::new(RemoteBrowser::new(BrowserConfig::default())),
        )
    }

    #[tokio::test]
    async fn recognises_asura_urls() {
        let site = adapter("https://asuracomic.net/series/omniscient-reader-1a2b3c");
        assert!(site.test().await.unwrap());
        assert!(site.uses_browser());
        assert!(site.progress_fetcher().is_some());
        assert_eq!(site.base_url(), "https://asuracomic.net");

        let other = adapter("https://mangadex.org/title/x");
        assert!(!other.test().await.unwrap());
    }

    #[test]
    fn chapter_list_skips_entries_without_url() {
        let json = r#"[
            {"title": "Chapter 12.5", "number": 12.5, "url": "https://asuracomic.net/series/x/chapter/12.5"},
            {"title": "Teaser", "number": 0, "url": ""}
        ]"#;
        let chapters = Asura::parse_chapter_list(json).unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].number, 12.5);
        assert_eq!(chapters[0].title, "Chapter 12.5");
        assert_eq!(chapters[0].language, "en");
    }

    #[test]
    fn image_list_is_numbered_from_one() {
        let pages = Asura::parse_images(r#"["https://gg.asuracomic.net/a.webp","https://gg.asuracomic.net/b.webp"]"#)
            .unwrap();
        assert_eq!(pages[0], Page::new(1, "https://gg.asuracomic.net/a.webp"));
        assert_eq!(pages[1].number, 2);

        assert!(matches!(Asura::parse_images("[]"), Err(ComicError::Parse(_))));
    }
}
