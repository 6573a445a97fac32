//! reaperscans.com
//!
//! 章节列表来自分页 JSON API，章节图片从阅读页 HTML 中解析。

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, error};
use url::Url;

use crate::core::config::Settings;
use crate::core::error::{ComicError, Result};
use crate::core::model::{Chapter, Page};
use crate::interfaces::SiteAdapter;
use crate::network::HttpClient;
use crate::utils::{origin_of, to_absolute_url};

pub const DEFAULT_API_BASE: &str = "https://api.reaperscans.com";

const PER_PAGE: usize = 100;

struct SiteSelectors {
    images: Selector,
}

static SELECTORS: OnceLock<SiteSelectors> = OnceLock::new();

impl SiteSelectors {
    fn get() -> &'static SiteSelectors {
        SELECTORS.get_or_init(|| SiteSelectors {
            images: Selector::parse("div.container div.flex.flex-col.justify-center.items-center img").unwrap(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SeriesResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ChapterFeed {
    meta: FeedMeta,
    #[serde(default)]
    data: Vec<FeedChapter>,
}

#[derive(Debug, Deserialize)]
struct FeedMeta {
    #[serde(default)]
    last_page: usize,
}

#[derive(Debug, Deserialize)]
struct FeedChapter {
    chapter_slug: String,
    #[serde(default)]
    chapter_name: String,
    #[serde(default)]
    chapter_title: Option<String>,
    /// 形如 "51.0"
    #[serde(default)]
    index: String,
}

pub struct Reaperscans {
    url: String,
    base_url: String,
    api_base: String,
    slug: Option<String>,
    settings: Arc<Settings>,
    http: HttpClient,
}

impl Reaperscans {
    pub fn new(url: &Url, settings: Arc<Settings>, http: HttpClient) -> Self {
        let slug = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string);
        Self {
            url: url.to_string(),
            base_url: origin_of(url),
            api_base: DEFAULT_API_BASE.to_string(),
            slug,
            settings,
            http,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn slug(&self) -> Result<&str> {
        self.slug
            .as_deref()
            .ok_or_else(|| ComicError::Parse(format!("no series slug in {}", self.url)))
    }

    async fn series_id(&self, slug: &str) -> Result<u64> {
        let series: SeriesResponse = self.http.get_json(&format!("{}/series/{}", self.api_base, slug)).await?;
        debug!("系列 {} 的 id 为 {}", slug, series.id);
        Ok(series.id)
    }

    fn chapter_from_feed(&self, slug: &str, entry: FeedChapter) -> Chapter {
        let number = entry.index.trim().parse::<f64>().unwrap_or(0.0);
        let title = entry
            .chapter_title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(entry.chapter_name);
        let locator = format!("{}/series/{}/{}", self.base_url, slug, entry.chapter_slug);
        Chapter::new(number, title, locator).with_language("en")
    }

    fn parse_pages(&self, html: &str) -> Vec<Page> {
        let doc = Html::parse_document(html);
        let Ok(base) = Url::parse(&self.base_url) else {
            return Vec::new();
        };

        doc.select(&SiteSelectors::get().images)
            .filter_map(|img| {
                let src = img.value().attr("src").unwrap_or_default().trim();
                (!src.is_empty()).then(|| to_absolute_url(&base, src))
            })
            .enumerate()
            .map(|(i, src)| Page::new(i as u32 + 1, src))
            .collect()
    }
}

/// "the-100th-regression" -> "The 100th Regression"
fn title_from_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl SiteAdapter for Reaperscans {
    fn id(&self) -> &str {
        "reaperscans"
    }

    async fn test(&self) -> Result<bool> {
        Ok(self.url.contains("reaperscans.com"))
    }

    async fn fetch_title(&self) -> Result<String> {
        Ok(title_from_slug(self.slug()?))
    }

    async fn fetch_chapters(&self) -> (Vec<Chapter>, Vec<ComicError>) {
        let slug = match self.slug() {
            Ok(slug) => slug,
            Err(e) => return (Vec::new(), vec![e]),
        };
        let id = match self.series_id(slug).await {
            Ok(id) => id,
            Err(e) => return (Vec::new(), vec![e]),
        };

        let mut chapters = Vec::new();
        let mut errors = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}/chapters/{}?page={}&perPage={}&order=desc",
                self.api_base, id, page, PER_PAGE
            );
            let feed: ChapterFeed = match self.http.get_json(&url).await {
                Ok(feed) => feed,
                Err(e) => {
                    error!("获取章节列表失败 (第 {} 页): {}", page, e);
                    errors.push(e);
                    break;
                }
            };

            if feed.data.is_empty() {
                break;
            }
            chapters.extend(feed.data.into_iter().map(|entry| self.chapter_from_feed(slug, entry)));

            if page >= feed.meta.last_page {
                break;
            }
            page += 1;
        }

        debug!("共获取 {} 个章节", chapters.len());
        (chapters, errors)
    }

    async fn fetch_chapter(&self, chapter: &Chapter) -> Result<Chapter> {
        let html = self
            .http
            .get(&chapter.locator, Some(&self.base_url))
            .await?
            .text()
            .await?;

        let pages = self.parse_pages(&html);
        if pages.is_empty() {
            return Err(ComicError::Parse(format!("no images found on {}", chapter.locator)));
        }
        debug!("{} 共 {} 页", chapter.title, pages.len());
        Ok(chapter.with_pages(pages).with_language("en"))
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }
}
