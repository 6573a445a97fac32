//! 页面下载接口

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::error::Result;

/// 单页下载器
///
/// 每次调用只发起一次网络请求，重试由调度器负责；非 2xx 状态视为错误。
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, referer: &str) -> Result<Bytes>;
}
