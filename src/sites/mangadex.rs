use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, error};
use url::Url;

use crate::core::config::Settings;
use crate::core::error::{ComicError, Result};
use crate::core::model::{Chapter, Page};
use crate::interfaces::SiteAdapter;
use crate::network::HttpClient;
use crate::utils::{find_uuid, origin_of};

pub const DEFAULT_API_BASE: &str = "https://api.mangadex.org";

/// 单次 feed 请求的章节数上限
const FEED_LIMIT: usize = 500;

// --- API 响应结构 ---

#[derive(Debug, Deserialize)]
struct MangaResponse {
    data: MangaData,
}

#[derive(Debug, Deserialize)]
struct MangaData {
    attributes: MangaAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MangaAttributes {
    #[serde(default)]
    title: HashMap<String, String>,
    #[serde(default)]
    alt_titles: Vec<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    data: Vec<FeedChapter>,
}

#[derive(Debug, Deserialize)]
struct FeedChapter {
    id: String,
    attributes: FeedAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedAttributes {
    #[serde(default)]
    chapter: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    translated_language: String,
    #[serde(default)]
    pages: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHomeResponse {
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Debug, Deserialize)]
struct AtHomeChapter {
    hash: String,
    #[serde(default)]
    data: Vec<String>,
}

/// mangadex.org (JSON API)
pub struct Mangadex {
    url: String,
    base_url: String,
    api_base: String,
    settings: Arc<Settings>,
    http: HttpClient,
    title: OnceCell<String>,
}

impl Mangadex {
    pub fn new(url: &Url, settings: Arc<Settings>, http: HttpClient) -> Self {
        Self {
            url: url.to_string(),
            base_url: origin_of(url),
            api_base: DEFAULT_API_BASE.to_string(),
            settings,
            http,
            title: OnceCell::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn manga_id(&self) -> Result<&str> {
        find_uuid(&self.url).ok_or_else(|| ComicError::Parse(format!("no manga id in {}", self.url)))
    }

    fn feed_url(&self, id: &str, offset: usize) -> Result<String> {
        let mut params = vec![
            ("limit", FEED_LIMIT.to_string()),
            ("order[volume]", "asc".to_string()),
            ("order[chapter]", "asc".to_string()),
            ("offset", offset.to_string()),
        ];
        if let Some(lang) = self.preferred_language() {
            params.push(("translatedLanguage[]", lang.to_string()));
        }
        let query = serde_urlencoded::to_string(&params).map_err(|e| ComicError::Parse(e.to_string()))?;
        Ok(format!("{}/manga/{}/feed?{}", self.api_base, id, query))
    }

    async fn load_title(&self) -> Result<String> {
        let id = self.manga_id()?;
        let body: MangaResponse = self.http.get_json(&format!("{}/manga/{}", self.api_base, id)).await?;
        let attrs = body.data.attributes;

        if let Some(lang) = self.preferred_language() {
            let translated = attrs.alt_titles.iter().find_map(|titles| titles.get(lang));
            if let Some(title) = translated {
                debug!("使用 {} 译名: {}", lang, title);
                return Ok(title.clone());
            }
        }

        Ok(attrs.title.get("en").cloned().unwrap_or_default())
    }
}

#[async_trait]
impl SiteAdapter for Mangadex {
    fn id(&self) -> &str {
        "mangadex"
    }

    async fn test(&self) -> Result<bool> {
        Ok(self.url.contains("mangadex.org"))
    }

    async fn fetch_title(&self) -> Result<String> {
        self.title.get_or_try_init(|| self.load_title()).await.cloned()
    }

    async fn fetch_chapters(&self) -> (Vec<Chapter>, Vec<ComicError>) {
        let mut chapters = Vec::new();
        let mut errors = Vec::new();

        let id = match self.manga_id() {
            Ok(id) => id,
            Err(e) => return (chapters, vec![e]),
        };

        let mut offset = 0;
        loop {
            let page: FeedResponse = match self.feed_url(id, offset) {
                Ok(url) => match self.http.get_json(&url).await {
                    Ok(page) => page,
                    Err(e) => {
                        error!("获取章节列表失败 (offset {}): {}", offset, e);
                        errors.push(e);
                        break;
                    }
                },
                Err(e) => {
                    errors.push(e);
                    break;
                }
            };

            if page.data.is_empty() {
                break;
            }

            for item in page.data {
                let attrs = item.attributes;
                let number = attrs
                    .chapter
                    .as_deref()
                    .and_then(|c| c.trim().parse::<f64>().ok())
                    .unwrap_or(0.0);
                let mut chapter = Chapter::new(number, attrs.title.unwrap_or_default(), item.id)
                    .with_language(attrs.translated_language);
                chapter.page_count = attrs.pages;
                chapters.push(chapter);
            }
            offset += FEED_LIMIT;
        }

        debug!("共获取 {} 个章节", chapters.len());
        (chapters, errors)
    }

    async fn fetch_chapter(&self, chapter: &Chapter) -> Result<Chapter> {
        let url = format!("{}/at-home/server/{}", self.api_base, chapter.locator);
        let body: AtHomeResponse = self.http.get_json(&url).await?;

        let base = body.base_url.trim_end_matches('/');
        let pages = body
            .chapter
            .data
            .iter()
            .enumerate()
            .map(|(i, file)| Page::new(i as u32 + 1, format!("{}/data/{}/{}", base, body.chapter.hash, file)))
            .collect();

        let mut detailed = chapter.with_pages(pages);
        detailed.title = format!("Chapter {:04} {}", chapter.number as i64, chapter.title)
            .trim_end()
            .to_string();
        Ok(detailed)
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }
}
