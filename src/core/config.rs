//! 配置管理系统 (Configuration Management)
//!
//! 负责配置文件与环境变量的分层加载，并与命令行参数合并为不可变的 [`Settings`]。

use std::path::{Path, PathBuf};

use bon::Builder;
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::Deserialize;

use crate::core::error::{ComicError, Result};
use crate::packer::ArchiveFormat;

/// 章节级并发上限
pub const MAX_CHAPTER_CONCURRENCY: usize = 5;
/// 单章节内页面并发上限
pub const MAX_PAGE_CONCURRENCY: usize = 10;

pub const DEFAULT_FILENAME_TEMPLATE: &str = "{series} {number} - {title}";

const CONFIG_FILE: &str = "comic-downloader.toml";
const ENV_PREFIX: &str = "COMIC";

/// 全局应用配置
#[derive(Debug, Deserialize, Builder, Clone, Default)]
pub struct AppConfig {
    /// 下载参数默认值 (命令行可覆盖)
    #[serde(default)]
    #[builder(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    #[builder(default)]
    pub http: HttpConfig,

    /// 单页重试策略
    #[serde(default)]
    #[builder(default)]
    pub retry: RetryConfig,

    /// 远程浏览器 (browserless) 配置
    #[serde(default)]
    #[builder(default)]
    pub browser: BrowserConfig,
}

/// 下载参数
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct DownloadConfig {
    #[serde(default)]
    #[builder(default)]
    pub bundle: bool,
    #[serde(default = "default_chapter_concurrency")]
    #[builder(default = default_chapter_concurrency())]
    pub concurrency: usize,
    #[serde(default = "default_page_concurrency")]
    #[builder(default = default_page_concurrency())]
    pub concurrency_pages: usize,
    pub language: Option<String>,
    #[serde(default = "default_filename_template")]
    #[builder(default = default_filename_template())]
    pub filename_template: String,
    #[serde(default = "default_output_dir")]
    #[builder(default = default_output_dir())]
    pub output_dir: PathBuf,
    #[serde(default)]
    #[builder(default)]
    pub format: ArchiveFormat,
}

/// HTTP 客户端参数
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    #[builder(default = default_user_agent())]
    pub user_agent: String,
    #[serde(default = "default_http_timeout")]
    #[builder(default = default_http_timeout())]
    pub timeout_secs: u64,
    /// 部分镜像站证书配置有误，允许显式放行
    #[serde(default)]
    #[builder(default)]
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Deserialize, Builder, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    #[builder(default = default_retry_attempts())]
    pub attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    #[builder(default = default_retry_backoff_ms())]
    pub backoff_ms: u64,
}

/// 远程浏览器配置
///
/// 未显式给出 `ws_url` 时，按 `BROWSERLESS_TOKEN` / `BROWSERLESS_HOST_IP` / `DOCKER`
/// 环境变量拼接 browserless 地址。
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct BrowserConfig {
    pub ws_url: Option<String>,
    pub host: Option<String>,
    pub token: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub docker: bool,
    /// 单次浏览器会话的总超时
    #[serde(default = "default_browser_timeout")]
    #[builder(default = default_browser_timeout())]
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn default_chapter_concurrency() -> usize {
    MAX_CHAPTER_CONCURRENCY
}
fn default_page_concurrency() -> usize {
    MAX_PAGE_CONCURRENCY
}
fn default_filename_template() -> String {
    DEFAULT_FILENAME_TEMPLATE.to_string()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}
fn default_http_timeout() -> u64 {
    60
}
fn default_retry_attempts() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_browser_timeout() -> u64 {
    30
}

impl AppConfig {
    /// 从文件系统与环境变量加载配置
    ///
    /// 优先使用工作目录下的配置文件，其次为平台配置目录。
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = Self::config_file() {
            builder = builder.add_source(File::from(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        settings.try_deserialize().map_err(ComicError::Config)
    }

    /// 从指定文件加载，不读取环境变量
    pub fn from_file(path: &Path) -> Result<Self> {
        Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize()
            .map_err(ComicError::Config)
    }

    fn config_file() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "comic-downloader")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .filter(|p| p.exists())
    }
}

impl BrowserConfig {
    /// 解析远程浏览器 DevTools 地址
    pub fn endpoint(&self) -> Result<String> {
        self.endpoint_with(|key| std::env::var(key).ok())
    }

    fn endpoint_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<String> {
        if let Some(url) = &self.ws_url {
            return Ok(url.clone());
        }

        let token = self
            .token
            .clone()
            .or_else(|| env("BROWSERLESS_TOKEN"))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ComicError::Browser("BROWSERLESS_TOKEN is not set".into()))?;

        let docker = self.docker || env("DOCKER").is_some_and(|v| v.eq_ignore_ascii_case("true"));
        if docker {
            return Ok(format!("ws://comic-downloader-browserless:3000?token={}", token));
        }

        let host = self
            .host
            .clone()
            .or_else(|| env("BROWSERLESS_HOST_IP"))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Ok(format!("ws://{}:8454?token={}", host, token))
    }
}

/// 并发配额
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxConcurrency {
    pub chapters: usize,
    pub pages: usize,
}

impl MaxConcurrency {
    /// 超出上限的请求被静默截断，最小为 1
    pub fn capped(chapters: usize, pages: usize) -> Self {
        Self {
            chapters: chapters.clamp(1, MAX_CHAPTER_CONCURRENCY),
            pages: pages.clamp(1, MAX_PAGE_CONCURRENCY),
        }
    }
}

impl Default for MaxConcurrency {
    fn default() -> Self {
        Self::capped(MAX_CHAPTER_CONCURRENCY, MAX_PAGE_CONCURRENCY)
    }
}

/// 单次运行的不可变设置，由配置与命令行合并而来
#[derive(Debug, Clone, Builder)]
pub struct Settings {
    #[builder(default)]
    pub bundle: bool,
    #[builder(default)]
    pub max_concurrency: MaxConcurrency,
    #[builder(into)]
    pub language: Option<String>,
    #[builder(into, default = default_filename_template())]
    pub filename_template: String,
    #[builder(into, default = default_output_dir())]
    pub output_dir: PathBuf,
    #[builder(default)]
    pub format: ArchiveFormat,
    /// 用户输入的原始区间表达式
    #[builder(into, default)]
    pub range: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Settings {
    /// 以配置文件中的下载参数为基线
    pub fn from_config(download: &DownloadConfig) -> Self {
        Self {
            bundle: download.bundle,
            max_concurrency: MaxConcurrency::capped(download.concurrency, download.concurrency_pages),
            language: download.language.clone(),
            filename_template: download.filename_template.clone(),
            output_dir: download.output_dir.clone(),
            format: download.format,
            range: String::new(),
        }
    }
}
