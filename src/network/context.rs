//! 服务上下文 (ServiceContext)
//!
//! 统一持有站点适配器所需的副作用组件：HTTP 客户端、远程浏览器与全局配置。

use std::sync::Arc;

use crate::core::config::AppConfig;
use crate::core::error::Result;
use crate::network::browser::RemoteBrowser;
use crate::network::client::HttpClient;

#[derive(Clone)]
pub struct ServiceContext {
    pub http: HttpClient,
    pub browser: Arc<RemoteBrowser>,
    pub config: Arc<AppConfig>,
}

impl ServiceContext {
    pub fn new(config: Arc<AppConfig>) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(&config.http)?,
            browser: Arc::new(RemoteBrowser::new(config.browser.clone())),
            config,
        })
    }
}
