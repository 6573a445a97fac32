//! 领域模型 (Domain Model)
//!
//! 章节、页面与下载产物的数据结构，以及章节状态机。

use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// 章节信息
///
/// 列表阶段 `pages` 为空，由 `SiteAdapter::fetch_chapter` 返回带页面的新实例。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chapter {
    /// 章节序号，允许小数 (如 10.5)
    pub number: f64,
    pub title: String,
    /// 两位语言代码，未知时为空
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub page_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<Page>,
    /// 站点私有定位符 (API id 或章节 URL)
    pub locator: String,
}

impl Chapter {
    pub fn new(number: f64, title: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            locator: locator.into(),
            ..Default::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// 基于当前章节派生一个已填充页面的实例
    pub fn with_pages(&self, pages: Vec<Page>) -> Self {
        Self {
            page_count: pages.len() as u32,
            pages,
            ..self.clone()
        }
    }
}

/// 单页图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 从 1 开始的序号，决定最终顺序
    pub number: u32,
    pub url: String,
}

impl Page {
    pub fn new(number: u32, url: impl Into<String>) -> Self {
        Self {
            number,
            url: url.into(),
        }
    }
}

/// 已下载的单页数据
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub page: u32,
    pub data: Bytes,
    /// 归档内使用的扩展名
    pub extension: String,
}

impl DownloadedFile {
    pub fn new(page: &Page, data: Bytes) -> Self {
        Self {
            page: page.number,
            data,
            extension: image_extension(&page.url),
        }
    }
}

/// 已完成下载的章节，交由打包阶段恰好消费一次
#[derive(Debug)]
pub struct DownloadedChapter {
    pub chapter: Chapter,
    pub files: Vec<DownloadedFile>,
}

/// 章节生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ChapterState {
    Pending,
    Fetching,
    Downloading,
    Archiving,
    /// 已暂存至合集缓冲区
    Staged,
    Done,
    Failed,
}

impl ChapterState {
    /// 校验状态迁移是否合法
    pub fn can_advance_to(self, next: ChapterState) -> bool {
        use ChapterState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Fetching, Downloading)
                | (Fetching, Failed)
                | (Downloading, Archiving)
                | (Downloading, Staged)
                | (Downloading, Failed)
                | (Archiving, Done)
                | (Staged, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ChapterState::Done | ChapterState::Failed)
    }
}

/// 从图片 URL 推断扩展名，无法识别时回退为 jpg
pub fn image_extension(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let ext = Path::new(path)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());

    match ext {
        Some(ext) if mime_guess::from_ext(&ext).first().is_some_and(|m| m.type_() == mime_guess::mime::IMAGE) => {
            if ext == "jpeg" { "jpg".into() } else { ext }
        }
        _ => "jpg".into(),
    }
}

/// 章节号展示格式: 整数不带小数部分
pub fn format_number(number: f64) -> String {
    if number.fract() == 0.0 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_comes_from_url_path() {
        assert_eq!(image_extension("https://cdn.example/a/001.png?token=1"), "png");
        assert_eq!(image_extension("https://cdn.example/a/001.JPEG"), "jpg");
        assert_eq!(image_extension("https://cdn.example/a/001.webp#x"), "webp");
        assert_eq!(image_extension("https://cdn.example/a/page/17"), "jpg");
        assert_eq!(image_extension("https://cdn.example/a/index.html"), "jpg");
    }

    #[test]
    fn with_pages_keeps_listing_fields() {
        let listed = Chapter::new(3.0, "Chapter 3", "abc").with_language("en");
        let full = listed.with_pages(vec![Page::new(1, "u1"), Page::new(2, "u2")]);
        assert!(listed.pages.is_empty());
        assert_eq!(full.page_count, 2);
        assert_eq!(full.locator, "abc");
        assert_eq!(full.language, "en");
    }

    #[test]
    fn failed_only_reachable_from_fetch_or_download() {
        use ChapterState::*;
        assert!(Fetching.can_advance_to(Failed));
        assert!(Downloading.can_advance_to(Failed));
        assert!(!Archiving.can_advance_to(Failed));
        assert!(!Staged.can_advance_to(Failed));
        assert!(!Pending.can_advance_to(Downloading));
        assert!(!Done.can_advance_to(Fetching));
        assert!(Failed.is_terminal() && Done.is_terminal());
    }

    #[test]
    fn numbers_render_without_trailing_zero() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(10.5), "10.5");
    }
}
