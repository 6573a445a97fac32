pub mod fetcher;
pub mod site;

pub use fetcher::PageFetcher;
pub use site::{ProgressFetcher, SiteAdapter};
