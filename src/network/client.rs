//! 面向站点的 HTTP 客户端封装

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::REFERER;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::core::config::HttpConfig;
use crate::core::error::{ComicError, Result};
use crate::interfaces::PageFetcher;

/// 进程内共享的 HTTP 客户端
#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let inner = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self { inner })
    }

    /// 执行 GET 请求，非 2xx 状态转换为错误
    pub async fn get(&self, url: &str, referer: Option<&str>) -> Result<Response> {
        let mut request = self.inner.get(url);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            debug!("请求失败 {} -> {}", url, status);
            return Err(ComicError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(resp)
    }

    /// 获取文本内容
    pub async fn get_text(&self, url: &str) -> Result<String> {
        Ok(self.get(url, None).await?.text().await?)
    }

    /// 获取并反序列化 JSON
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get(url, None).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// 获取二进制内容
    pub async fn get_bytes(&self, url: &str, referer: Option<&str>) -> Result<Bytes> {
        Ok(self.get(url, referer).await?.bytes().await?)
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(&self, url: &str, referer: &str) -> Result<Bytes> {
        let referer = Some(referer).filter(|r| !r.is_empty());
        self.get_bytes(url, referer).await
    }
}
