//! 错误处理体系 (Error Handling System)
//!
//! 定义下载流程中各阶段的领域错误以及全局 Result 别名。

use reqwest::StatusCode;
use thiserror::Error;

/// 全局错误定义 (Downloader Domain Errors)
#[derive(Error, Debug)]
pub enum ComicError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// 非 2xx 响应
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("EPUB error: {0}")]
    Epub(String),

    #[error("Parsing error: {0}")]
    Parse(String),

    /// 区间表达式中无法解析的片段
    #[error("invalid range token `{token}`")]
    InvalidRange { token: String },

    #[error("site not supported: {0}")]
    UnsupportedSite(String),

    #[error("filename template error: {0}")]
    Template(String),

    #[error("no files to pack")]
    EmptyChapter,

    #[error("no chapters were downloaded, nothing to bundle")]
    NothingToBundle,

    /// 单页在耗尽重试后仍失败
    #[error("page {page} failed: {source}")]
    PageFailed {
        page: u32,
        #[source]
        source: Box<ComicError>,
    },

    #[error("Other error: {0}")]
    Custom(String),
}

/// 全局 Result 别名
pub type Result<T> = std::result::Result<T, ComicError>;
