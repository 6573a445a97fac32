use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use crate::core::config::Settings;
use crate::core::error::{ComicError, Result};
use crate::core::model::{Chapter, Page};
use crate::interfaces::SiteAdapter;
use crate::network::HttpClient;
use crate::utils::{collapse_whitespace, find_uuid, origin_of};

/// 图片 CDN 路径前缀，后接页面标识
const IMAGE_BASE: &str = "https://pack-yak.intomanga.com/images/manga/ms/chapter/ch/page/p/";

/// 站点只提供西班牙语内容
const LANGUAGE: &str = "es";

// --- 预编译 Selectors ---
struct SiteSelectors {
    title: Selector,
    page_list: Selector,
    option: Selector,
}

static SELECTORS: OnceLock<SiteSelectors> = OnceLock::new();

impl SiteSelectors {
    fn get() -> &'static SiteSelectors {
        SELECTORS.get_or_init(|| SiteSelectors {
            title: Selector::parse("h1").unwrap(),
            page_list: Selector::parse("select.PageListClass").unwrap(),
            option: Selector::parse("option").unwrap(),
        })
    }
}

/// `getall` 的外层响应，`data` 是再次编码的 JSON 字符串
#[derive(Debug, Deserialize)]
struct RawFeed {
    #[serde(alias = "Data")]
    data: String,
}

#[derive(Debug, Deserialize)]
struct ChapterFeed {
    #[serde(default, alias = "Result")]
    result: Vec<FeedEntry>,
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    #[serde(alias = "Identification")]
    identification: String,
    #[serde(alias = "Number")]
    number: f64,
    #[serde(default, rename = "pagesCount", alias = "PagesCount")]
    pages_count: f64,
}

/// inmanga.com
pub struct Inmanga {
    url: String,
    base_url: String,
    settings: Arc<Settings>,
    http: HttpClient,
    title: OnceCell<String>,
}

impl Inmanga {
    pub fn new(url: &Url, settings: Arc<Settings>, http: HttpClient) -> Self {
        Self {
            url: url.to_string(),
            base_url: origin_of(url),
            settings,
            http,
            title: OnceCell::new(),
        }
    }

    fn parse_title(html: &str) -> String {
        let doc = Html::parse_document(html);
        doc.select(&SiteSelectors::get().title)
            .next()
            .map(|h1| collapse_whitespace(&h1.text().collect::<String>()))
            .unwrap_or_default()
    }

    fn parse_feed(body: &str) -> Result<Vec<Chapter>> {
        let raw: RawFeed = serde_json::from_str(body)?;
        let feed: ChapterFeed = serde_json::from_str(&raw.data)?;

        Ok(feed
            .result
            .into_iter()
            .map(|entry| {
                let title = format!("Capítulo {:04}", entry.number as i64);
                let mut chapter = Chapter::new(entry.number, title, entry.identification).with_language(LANGUAGE);
                chapter.page_count = entry.pages_count as u32;
                chapter
            })
            .collect())
    }

    /// 只取第一个页面选择框 (页面上存在重复的一份)
    fn parse_pages(html: &str) -> Vec<Page> {
        let doc = Html::parse_document(html);
        let s = SiteSelectors::get();

        let Some(select) = doc.select(&s.page_list).next() else {
            return Vec::new();
        };

        select
            .select(&s.option)
            .enumerate()
            .filter_map(|(i, option)| {
                let value = option.value().attr("value").unwrap_or_default().trim();
                if value.is_empty() {
                    return None;
                }
                let number = option
                    .text()
                    .collect::<String>()
                    .trim()
                    .parse::<u32>()
                    .unwrap_or(i as u32 + 1);
                Some(Page::new(number, format!("{}{}", IMAGE_BASE, value)))
            })
            .collect()
    }
}

#[async_trait]
impl SiteAdapter for Inmanga {
    fn id(&self) -> &str {
        "inmanga"
    }

    async fn test(&self) -> Result<bool> {
        Ok(self.url.contains("inmanga.com"))
    }

    async fn fetch_title(&self) -> Result<String> {
        self.title
            .get_or_try_init(|| async {
                let html = self.http.get_text(&self.url).await?;
                Ok::<_, ComicError>(Self::parse_title(&html))
            })
            .await
            .cloned()
    }

    async fn fetch_chapters(&self) -> (Vec<Chapter>, Vec<ComicError>) {
        let Some(id) = find_uuid(&self.url) else {
            return (Vec::new(), vec![ComicError::Parse(format!("no manga id in {}", self.url))]);
        };

        let url = format!("{}/chapter/getall?mangaIdentification={}", self.base_url, id);
        let result = match self.http.get_text(&url).await {
            Ok(body) => Self::parse_feed(&body),
            Err(e) => Err(e),
        };

        match result {
            Ok(chapters) => {
                debug!("解析到 {} 个章节", chapters.len());
                (chapters, Vec::new())
            }
            Err(e) => (Vec::new(), vec![e]),
        }
    }

    async fn fetch_chapter(&self, chapter: &Chapter) -> Result<Chapter> {
        let url = format!(
            "{}/chapter/chapterIndexControls?identification={}",
            self.base_url, chapter.locator
        );
        let html = self.http.get_text(&url).await?;
        let pages = Self::parse_pages(&html);
        debug!("{} 共 {} 页", chapter.title, pages.len());

        Ok(chapter.with_pages(pages).with_language(LANGUAGE))
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }
}
