//! 纯 HTML 站点 (无 AJAX 分页)
//!
//! 通过一张固定的选择器表识别页面结构：依次尝试每一行，第一条能匹配到章节行的配置生效。

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use crate::core::config::Settings;
use crate::core::error::{ComicError, Result};
use crate::core::model::{Chapter, Page};
use crate::interfaces::SiteAdapter;
use crate::network::HttpClient;
use crate::utils::{collapse_whitespace, origin_of, to_absolute_url};

/// 单个站点的页面结构
struct SiteProfile {
    name: &'static str,
    title: &'static str,
    rows: &'static str,
    /// 为空时直接使用行元素自身的 href
    link: &'static str,
    chapter: &'static str,
    chapter_title: &'static str,
    image: &'static str,
}

const PROFILES: &[SiteProfile] = &[
    SiteProfile {
        name: "tcbscans",
        title: "h1",
        rows: "main .mx-auto .grid .col-span-2 a",
        link: "",
        chapter: ".font-bold",
        chapter_title: ".text-gray-500",
        image: "picture img",
    },
    SiteProfile {
        name: "manganato",
        title: "h1",
        rows: "div.panel-story-chapter-list .row-content-chapter li",
        link: "a",
        chapter: "a",
        chapter_title: "a",
        image: "div.container-chapter-reader img",
    },
    SiteProfile {
        name: "mangapanda",
        title: "h1",
        rows: "#examples div.chapter-list .row",
        link: "a",
        chapter: "a",
        chapter_title: "a",
        image: "div.container-chapter-reader img",
    },
    SiteProfile {
        name: "mangakakalot",
        title: "h1",
        rows: "div.chapter-list .row",
        link: "a",
        chapter: "a",
        chapter_title: "a",
        image: "div.container-chapter-reader img,#vungdoc img",
    },
    SiteProfile {
        name: "mangamonks",
        title: "h3.info-title",
        rows: "#chapter .chapter-list li",
        link: "a",
        chapter: ".chapter-number",
        chapter_title: ".chapter-number",
        image: "#imageContainer img",
    },
];

/// 预编译后的选择器，与 `PROFILES` 一一对应
struct CompiledProfile {
    title: Selector,
    rows: Selector,
    link: Option<Selector>,
    chapter: Selector,
    chapter_title: Selector,
    image: Selector,
}

static COMPILED: OnceLock<Vec<CompiledProfile>> = OnceLock::new();
static ARRAY_DATA: OnceLock<Selector> = OnceLock::new();
static CHAPTER_RE: OnceLock<Regex> = OnceLock::new();

fn compiled() -> &'static [CompiledProfile] {
    COMPILED.get_or_init(|| {
        PROFILES
            .iter()
            .map(|p| CompiledProfile {
                title: Selector::parse(p.title).unwrap(),
                rows: Selector::parse(p.rows).unwrap(),
                link: (!p.link.is_empty()).then(|| Selector::parse(p.link).unwrap()),
                chapter: Selector::parse(p.chapter).unwrap(),
                chapter_title: Selector::parse(p.chapter_title).unwrap(),
                image: Selector::parse(p.image).unwrap(),
            })
            .collect()
    })
}

fn chapter_re() -> &'static Regex {
    CHAPTER_RE.get_or_init(|| Regex::new(r"Chapter\s*(\d+\.?\d*)").unwrap())
}

fn text_of(el: ElementRef<'_>, selector: &Selector) -> String {
    el.select(selector).flat_map(|e| e.text()).collect()
}

/// 识别结果：系列页 HTML 与命中的配置序号
///
/// `scraper::Html` 不是 `Send`，因此只保存原始文本，按需重新解析。
struct Detected {
    html: String,
    profile: usize,
}

pub struct PlainHtml {
    url: Url,
    base_url: String,
    settings: Arc<Settings>,
    http: HttpClient,
    detected: OnceCell<Detected>,
}

impl PlainHtml {
    pub fn new(url: &Url, settings: Arc<Settings>, http: HttpClient) -> Self {
        Self {
            url: url.clone(),
            base_url: origin_of(url),
            settings,
            http,
            detected: OnceCell::new(),
        }
    }

    fn match_profile(html: &str) -> Option<usize> {
        let doc = Html::parse_document(html);
        compiled().iter().position(|p| {
            let found = doc.select(&p.rows).count();
            found > 0
        })
    }

    async fn detected(&self) -> Result<&Detected> {
        self.detected
            .get_or_try_init(|| async {
                let html = self.http.get_text(self.url.as_str()).await?;
                match Self::match_profile(&html) {
                    Some(profile) => {
                        debug!("命中页面结构: {}", PROFILES[profile].name);
                        Ok(Detected { html, profile })
                    }
                    None => Err(ComicError::UnsupportedSite(self.url.to_string())),
                }
            })
            .await
    }

    fn parse_title(detected: &Detected) -> String {
        let doc = Html::parse_document(&detected.html);
        let p = &compiled()[detected.profile];
        doc.select(&p.title)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .unwrap_or_default()
    }

    fn parse_chapters(&self, detected: &Detected) -> (Vec<Chapter>, Vec<ComicError>) {
        let doc = Html::parse_document(&detected.html);
        let p = &compiled()[detected.profile];
        let mut chapters = Vec::new();
        let mut errors = Vec::new();

        for (i, row) in doc.select(&p.rows).enumerate() {
            let label = text_of(row, &p.chapter);
            let Some(caps) = chapter_re().captures(&label) else {
                debug!("跳过非章节行 #{}", i);
                continue;
            };

            let number = match caps[1].parse::<f64>() {
                Ok(n) => n,
                Err(e) => {
                    errors.push(ComicError::Parse(format!("chapter number {:?}: {}", &caps[1], e)));
                    continue;
                }
            };

            let href = match &p.link {
                Some(link) => row.select(link).next().and_then(|a| a.value().attr("href")),
                None => row.value().attr("href"),
            }
            .unwrap_or_default();

            let title = collapse_whitespace(&text_of(row, &p.chapter_title));
            chapters.push(Chapter::new(number, title, to_absolute_url(&self.url, href)).with_language("en"));
        }

        (chapters, errors)
    }

    /// 图片地址：优先隐藏的 `#arraydata` 列表，否则使用配置的图片选择器
    fn parse_images(html: &str, image: &Selector) -> Vec<String> {
        let doc = Html::parse_document(html);
        let array_data = ARRAY_DATA.get_or_init(|| Selector::parse("#arraydata").unwrap());

        let hidden: Vec<_> = doc.select(array_data).collect();
        if let [single] = hidden.as_slice() {
            return single
                .text()
                .collect::<String>()
                .split(',')
                .map(|s| s.trim().to_string())
                .collect();
        }

        doc.select(image)
            .map(|img| {
                let src = img.value().attr("src").unwrap_or_default().trim();
                if src.is_empty() || src.starts_with("data:image") {
                    img.value().attr("data-src").unwrap_or_default().trim().to_string()
                } else {
                    src.to_string()
                }
            })
            .collect()
    }
}

#[async_trait]
impl SiteAdapter for PlainHtml {
    fn id(&self) -> &str {
        "plainhtml"
    }

    async fn test(&self) -> Result<bool> {
        if self.url.as_str().contains("asuracomic.net") {
            return Ok(false);
        }
        match self.detected().await {
            Ok(_) => Ok(true),
            Err(ComicError::UnsupportedSite(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn fetch_title(&self) -> Result<String> {
        let detected = self.detected().await?;
        Ok(Self::parse_title(detected))
    }

    async fn fetch_chapters(&self) -> (Vec<Chapter>, Vec<ComicError>) {
        match self.detected().await {
            Ok(detected) => self.parse_chapters(detected),
            Err(e) => (Vec::new(), vec![e]),
        }
    }

    async fn fetch_chapter(&self, chapter: &Chapter) -> Result<Chapter> {
        let detected = self.detected().await?;
        let html = self.http.get_text(&chapter.locator).await?;
        let images = Self::parse_images(&html, &compiled()[detected.profile].image);

        let pages = images
            .iter()
            .enumerate()
            .filter_map(|(i, src)| {
                if src.is_empty() {
                    info!("{} 第 {} 页没有图片地址，已忽略", chapter.title, i + 1);
                    return None;
                }
                Some(Page::new(i as u32 + 1, to_absolute_url(&self.url, src)))
            })
            .collect();

        Ok(chapter.with_pages(pages).with_language("en"))
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::HttpConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MANGANATO_SERIES: &str = r#"
        <html><body>
          <h1>  Solo
              Leveling </h1>
          <div class="panel-story-chapter-list">
            <ul class="row-content-chapter">
              <li><a href="/chapter/solo/chapter-2">Chapter 2: Arise</a></li>
              <li><a href="https://cdn.other.org/chapter-1.5">Chapter 1.5</a></li>
              <li><a href="/notice">Notice</a></li>
            </ul>
          </div>
        </body></html>
    "#;

    const TCB_SERIES: &str = r#"
        <html><body><h1>One Piece</h1>
          <main><div class="mx-auto"><div class="grid"><div class="col-span-2">
            <a href="/chapters/7/one-piece-chapter-1100"><div class="font-bold">One Piece Chapter 1100</div><div class="text-gray-500">Kuma</div></a>
          </div></div></div></main>
        </body></html>
    "#;

    fn adapter(url: &str) -> PlainHtml {
        let http = HttpClient::new(&HttpConfig::default()).unwrap();
        PlainHtml::new(&Url::parse(url).unwrap(), Arc::new(Settings::default()), http)
    }

    async fn serve(body: &'static str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manga/series"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn first_matching_profile_wins() {
        assert_eq!(PlainHtml::match_profile(TCB_SERIES), Some(0));
        assert_eq!(PlainHtml::match_profile(MANGANATO_SERIES), Some(1));
        assert_eq!(PlainHtml::match_profile("<html><h1>x</h1></html>"), None);
    }

    #[tokio::test]
    async fn asura_urls_are_skipped_without_fetching() {
        let site = adapter("https://asuracomic.net/series/foo");
        assert!(!site.test().await.unwrap());
    }

    #[tokio::test]
    async fn unknown_layout_is_not_supported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><p>hi</p></html>"))
            .mount(&server)
            .await;

        let site = adapter(&format!("{}/manga/series", server.uri()));
        assert!(!site.test().await.unwrap());
    }

    #[tokio::test]
    async fn parses_title_and_chapters_from_one_download() {
        let server = serve(MANGANATO_SERIES).await;
        let site = adapter(&format!("{}/manga/series", server.uri()));

        assert!(site.test().await.unwrap());
        assert_eq!(site.fetch_title().await.unwrap(), "Solo Leveling");

        let (chapters, errors) = site.fetch_chapters().await;
        assert!(errors.is_empty());
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].number, 2.0);
        assert_eq!(chapters[0].title, "Chapter 2: Arise");
        assert_eq!(chapters[0].locator, format!("{}/chapter/solo/chapter-2", server.uri()));
        assert_eq!(chapters[1].number, 1.5);
        assert_eq!(chapters[1].locator, "https://cdn.other.org/chapter-1.5");
    }

    #[tokio::test]
    async fn row_href_is_used_without_link_selector() {
        let server = serve(TCB_SERIES).await;
        let site = adapter(&format!("{}/manga/series", server.uri()));

        let (chapters, _) = site.fetch_chapters().await;
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].number, 1100.0);
        assert_eq!(chapters[0].title, "Kuma");
        assert_eq!(
            chapters[0].locator,
            format!("{}/chapters/7/one-piece-chapter-1100", server.uri())
        );
    }

    #[test]
    fn images_fall_back_to_data_src() {
        let image = Selector::parse("div.container-chapter-reader img").unwrap();
        let html = r#"
            <div class="container-chapter-reader">
              <img src="https://img.example.com/1.jpg">
              <img src="data:image/gif;base64,R0lGOD" data-src="/img/2.png">
              <img src="">
            </div>
        "#;
        assert_eq!(
            PlainHtml::parse_images(html, &image),
            vec!["https://img.example.com/1.jpg", "/img/2.png", ""]
        );
    }

    #[test]
    fn hidden_array_data_takes_precedence() {
        let image = Selector::parse("img").unwrap();
        let html = r#"<p id="arraydata" style="display:none">https://a/1.jpg, https://a/2.jpg</p><img src="x.jpg">"#;
        assert_eq!(
            PlainHtml::parse_images(html, &image),
            vec!["https://a/1.jpg", "https://a/2.jpg"]
        );
    }

    #[tokio::test]
    async fn empty_image_urls_are_skipped() {
        let server = serve(MANGANATO_SERIES).await;
        Mock::given(method("GET"))
            .and(path("/chapter/solo/chapter-2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<div class="container-chapter-reader"><img src="/i/1.jpg"><img src=""><img src="/i/3.jpg"></div>"#,
            ))
            .mount(&server)
            .await;

        let site = adapter(&format!("{}/manga/series", server.uri()));
        let chapter = Chapter::new(2.0, "Chapter 2", format!("{}/chapter/solo/chapter-2", server.uri()));
        let detailed = site.fetch_chapter(&chapter).await.unwrap();

        assert_eq!(detailed.page_count, 2);
        assert_eq!(detailed.pages[0], Page::new(1, format!("{}/i/1.jpg", server.uri())));
        assert_eq!(detailed.pages[1], Page::new(3, format!("{}/i/3.jpg", server.uri())));
    }
}
