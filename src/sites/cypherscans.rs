//! cypheroscans.xyz
//!
//! 标题与章节列表直接解析 HTML；阅读页图片懒加载，需要远程浏览器渲染后再解析。

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use crate::core::config::Settings;
use crate::core::error::{ComicError, Result};
use crate::core::model::{Chapter, Page};
use crate::interfaces::{ProgressFetcher, SiteAdapter};
use crate::network::HttpClient;
use crate::network::browser::{BrowserJob, RemoteBrowser};
use crate::utils::{collapse_whitespace, origin_of, tick_while, to_absolute_url};

const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// 阅读区出现后等待懒加载图片
const SETTLE: Duration = Duration::from_secs(5);

const OUTER_HTML_JS: &str = "document.documentElement.outerHTML";

struct SiteSelectors {
    title: Selector,
    chapter_item: Selector,
    link: Selector,
    chapter_num: Selector,
    image: Selector,
}

static SELECTORS: OnceLock<SiteSelectors> = OnceLock::new();

impl SiteSelectors {
    fn get() -> &'static SiteSelectors {
        SELECTORS.get_or_init(|| SiteSelectors {
            title: Selector::parse("div#titledesktop h1.entry-title").unwrap(),
            chapter_item: Selector::parse("div.eplister#chapterlist ul li").unwrap(),
            link: Selector::parse("a").unwrap(),
            chapter_num: Selector::parse("span.chapternum").unwrap(),
            image: Selector::parse("div#readerarea img.ts-main-image").unwrap(),
        })
    }
}

pub struct Cypherscans {
    url: String,
    base_url: String,
    settings: Arc<Settings>,
    http: HttpClient,
    browser: Arc<RemoteBrowser>,
    title: OnceCell<String>,
}

impl Cypherscans {
    pub fn new(url: &Url, settings: Arc<Settings>, http: HttpClient, browser: Arc<RemoteBrowser>) -> Self {
        Self {
            url: url.to_string(),
            base_url: origin_of(url),
            settings,
            http,
            browser,
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

    fn parse_chapters(&self, html: &str) -> Vec<Chapter> {
        let doc = Html::parse_document(html);
        let s = SiteSelectors::get();
        let Ok(base) = Url::parse(&self.url) else {
            return Vec::new();
        };

        doc.select(&s.chapter_item)
            .filter_map(|item| {
                let link = item.select(&s.link).next()?;
                let href = link.value().attr("href").unwrap_or_default().trim();
                if href.is_empty() {
                    return None;
                }

                let label = link
                    .select(&s.chapter_num)
                    .next()
                    .map(|span| collapse_whitespace(&span.text().collect::<String>()))
                    .filter(|text| !text.is_empty())?;
                let number = label
                    .trim_start_matches("Chapter")
                    .trim()
                    .parse::<f64>()
                    .unwrap_or_else(|_| {
                        debug!("无法解析章节号: {}", label);
                        0.0
                    });

                Some(Chapter::new(number, label, to_absolute_url(&base, href)).with_language("en"))
            })
            .collect()
    }

    fn parse_pages(html: &str) -> Result<Vec<Page>> {
        let doc = Html::parse_document(html);
        let pages: Vec<Page> = doc
            .select(&SiteSelectors::get().image)
            .filter_map(|img| {
                let src = img.value().attr("src").unwrap_or_default().trim();
                (!src.is_empty()).then(|| src.to_string())
            })
            .enumerate()
            .map(|(i, src)| Page::new(i as u32 + 1, src))
            .collect();

        if pages.is_empty() {
            return Err(ComicError::Parse("no images found on chapter page".into()));
        }
        Ok(pages)
    }
}

#[async_trait]
impl SiteAdapter for Cypherscans {
    fn id(&self) -> &str {
        "cypherscans"
    }

    async fn test(&self) -> Result<bool> {
        Ok(self.url.contains("cypheroscans.xyz"))
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
        match self.http.get_text(&self.url).await {
            Ok(html) => {
                let chapters = self.parse_chapters(&html);
                debug!("解析到 {} 个章节", chapters.len());
                (chapters, Vec::new())
            }
            Err(e) => (Vec::new(), vec![e]),
        }
    }

    async fn fetch_chapter(&self, chapter: &Chapter) -> Result<Chapter> {
        let html: String = self
            .browser
            .evaluate(BrowserJob {
                url: &chapter.locator,
                wait_for: "div#readerarea",
                settle: SETTLE,
                script: OUTER_HTML_JS,
            })
            .await?;

        let pages = Self::parse_pages(&html)?;
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
impl ProgressFetcher for Cypherscans {
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
    use crate::core::config::{BrowserConfig, HttpConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SERIES_HTML: &str = r#"
        <div id="titledesktop"><div id="titlemove">
          <h1 class="entry-title" itemprop="name">  Martial   Peak </h1>
        </div></div>
        <div class="eplister" id="chapterlist"><ul>
          <li data-num="681"><a href="https://cypheroscans.xyz/martial-peak-chapter-681/">
            <span class="chapternum">Chapter 681</span><span class="chapterdate">May 2, 2025</span></a></li>
          <li data-num="680.5"><a href="/martial-peak-chapter-680-5/">
            <span class="chapternum">Chapter 680.5</span></a></li>
          <li><a href=""><span class="chapternum">Chapter 679</span></a></li>
          <li><a href="/notice/"><span class="chapternum"></span></a></li>
          <li><a href="/special/"><span class="chapternum">Special</span></a></li>
        </ul></div>
    "#;

    fn adapter(url: &str) -> Cypherscans {
        Cypherscans::new(
            &Url::parse(url).unwrap(),
            Arc::new(Settings::default()),
            HttpClient::new(&HttpConfig::default()).unwrap(),
            Arc::new(RemoteBrowser::new(BrowserConfig::default())),
        )
    }

    #[tokio::test]
    async fn recognises_cypherscans_urls() {
        let site = adapter("https://cypheroscans.xyz/manga/martial-peak/");
        assert!(site.test().await.unwrap());
        assert!(site.uses_browser());
        assert!(site.progress_fetcher().is_some());
        assert_eq!(site.base_url(), "https://cypheroscans.xyz");
    }

    #[tokio::test]
    async fn title_and_chapter_list_come_from_series_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manga/martial-peak/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SERIES_HTML))
            .expect(2)
            .mount(&server)
            .await;

        let site = adapter(&format!("{}/manga/martial-peak/", server.uri()));
        assert_eq!(site.fetch_title().await.unwrap(), "Martial Peak");
        assert_eq!(site.fetch_title().await.unwrap(), "Martial Peak");

        let (chapters, errors) = site.fetch_chapters().await;
        assert!(errors.is_empty());
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].number, 681.0);
        assert_eq!(chapters[0].title, "Chapter 681");
        assert_eq!(chapters[0].locator, "https://cypheroscans.xyz/martial-peak-chapter-681/");
        assert_eq!(chapters[1].number, 680.5);
        assert_eq!(
            chapters[1].locator,
            format!("{}/martial-peak-chapter-680-5/", server.uri())
        );
        assert_eq!(chapters[2].number, 0.0);
        assert_eq!(chapters[2].title, "Special");
    }

    #[tokio::test]
    async fn series_page_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let site = adapter(&format!("{}/manga/missing/", server.uri()));
        let (chapters, errors) = site.fetch_chapters().await;
        assert!(chapters.is_empty());
        assert!(matches!(errors.as_slice(), [ComicError::HttpStatus { .. }]));
    }

    #[test]
    fn reader_images_are_numbered_in_document_order() {
        let html = r#"
            <div id="readerarea">
              <img class="ts-main-image" src="https://cdn.cypheroscans.xyz/681/01.webp">
              <img class="ts-main-image lazy" src="">
              <img class="ts-main-image" src="https://cdn.cypheroscans.xyz/681/02.webp">
              <img class="ad" src="https://ads.example/x.gif">
            </div>
        "#;
        let pages = Cypherscans::parse_pages(html).unwrap();
        assert_eq!(
            pages,
            vec![
                Page::new(1, "https://cdn.cypheroscans.xyz/681/01.webp"),
                Page::new(2, "https://cdn.cypheroscans.xyz/681/02.webp"),
            ]
        );

        assert!(matches!(
            Cypherscans::parse_pages("<div id=\"readerarea\"></div>"),
            Err(ComicError::Parse(_))
        ));
    }
}
