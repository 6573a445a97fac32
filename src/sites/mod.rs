//! 站点注册表
//!
//! 按检测顺序排列的适配器工厂，第一个 `test()` 为真的适配器被选中。

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::core::config::Settings;
use crate::core::error::{ComicError, Result};
use crate::interfaces::SiteAdapter;
use crate::network::ServiceContext;

pub mod asura;
pub mod cypherscans;
pub mod inmanga;
pub mod mangadex;
pub mod plainhtml;
pub mod reaperscans;

pub use asura::Asura;
pub use cypherscans::Cypherscans;
pub use inmanga::Inmanga;
pub use mangadex::Mangadex;
pub use plainhtml::PlainHtml;
pub use reaperscans::Reaperscans;

type Factory = fn(&Url, Arc<Settings>, &ServiceContext) -> Box<dyn SiteAdapter>;

pub struct SiteRegistry {
    factories: Vec<Factory>,
}

fn new_mangadex(url: &Url, settings: Arc<Settings>, ctx: &ServiceContext) -> Box<dyn SiteAdapter> {
    Box::new(Mangadex::new(url, settings, ctx.http.clone()))
}

fn new_inmanga(url: &Url, settings: Arc<Settings>, ctx: &ServiceContext) -> Box<dyn SiteAdapter> {
    Box::new(Inmanga::new(url, settings, ctx.http.clone()))
}

fn new_reaperscans(url: &Url, settings: Arc<Settings>, ctx: &ServiceContext) -> Box<dyn SiteAdapter> {
    Box::new(Reaperscans::new(url, settings, ctx.http.clone()))
}

fn new_cypherscans(url: &Url, settings: Arc<Settings>, ctx: &ServiceContext) -> Box<dyn SiteAdapter> {
    Box::new(Cypherscans::new(url, settings, ctx.http.clone(), ctx.browser.clone()))
}

fn new_asura(url: &Url, settings: Arc<Settings>, ctx: &ServiceContext) -> Box<dyn SiteAdapter> {
    Box::new(Asura::new(url, settings, ctx.browser.clone()))
}

fn new_plainhtml(url: &Url, settings: Arc<Settings>, ctx: &ServiceContext) -> Box<dyn SiteAdapter> {
    Box::new(PlainHtml::new(url, settings, ctx.http.clone()))
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self {
            // 需要联网探测的 PlainHtml 放在最后
            factories: vec![
                new_mangadex as Factory,
                new_inmanga as Factory,
                new_reaperscans as Factory,
                new_asura as Factory,
                new_cypherscans as Factory,
                new_plainhtml as Factory,
            ],
        }
    }
}

impl SiteRegistry {
    /// 返回第一个认领该 URL 的适配器；探测错误被收集并记录
    pub async fn detect(
        &self,
        url: &str,
        settings: Arc<Settings>,
        ctx: &ServiceContext,
    ) -> Result<Box<dyn SiteAdapter>> {
        let parsed = Url::parse(url).map_err(|e| ComicError::UnsupportedSite(format!("{}: {}", url, e)))?;

        let mut errors = Vec::new();
        for factory in &self.factories {
            let site = factory(&parsed, settings.clone(), ctx);
            match site.test().await {
                Ok(true) => {
                    debug!("站点识别为 {}", site.id());
                    return Ok(site);
                }
                Ok(false) => {}
                Err(e) => errors.push((site.id().to_string(), e)),
            }
        }

        for (id, e) in errors {
            warn!("{} 探测失败: {}", id, e);
        }
        Err(ComicError::UnsupportedSite(url.to_string()))
    }
}
