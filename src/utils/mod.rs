use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use url::Url;

/// 将相对链接补全为绝对地址
pub fn to_absolute_url(base: &Url, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return String::new();
    }

    if let Some(path_without_slashes) = href.strip_prefix("//") {
        return format!("{}://{}", base.scheme(), path_without_slashes);
    }

    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// `scheme://host[:port]`
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

static UUID_RE: OnceLock<Regex> = OnceLock::new();

/// 提取字符串中第一个 UUID 形式的标识
pub fn find_uuid(text: &str) -> Option<&str> {
    UUID_RE
        .get_or_init(|| Regex::new(r"([\w\d]{8}(?:-[\w\d]{4}){3}-[\w\d]{12})").unwrap())
        .find(text)
        .map(|m| m.as_str())
}

static SPACES_RE: OnceLock<Regex> = OnceLock::new();

/// 合并连续空白并去除首尾空白
pub fn collapse_whitespace(text: &str) -> String {
    SPACES_RE
        .get_or_init(|| Regex::new(r"\s+").unwrap())
        .replace_all(text, " ")
        .trim()
        .to_string()
}

/// 在 `fut` 完成前按 `period` 周期调用 `tick`
pub async fn tick_while<F>(fut: F, period: Duration, tick: &(dyn Fn() + Send + Sync)) -> F::Output
where
    F: Future,
{
    let mut ticker = tokio::time::interval(period);
    // interval 的首次 tick 立即完成
    ticker.tick().await;

    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return out,
            _ = ticker.tick() => tick(),
        }
    }
}
