pub mod browser;
pub mod client;
pub mod context;

pub use client::HttpClient;
pub use context::ServiceContext;
