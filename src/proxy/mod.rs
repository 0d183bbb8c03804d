//! Outbound proxies for third-party APIs used by the dashboard

pub mod shopify;

pub use shopify::{ProxyError, ShopifyConfig, ShopifyProxy};
