//! Shopify Admin API proxy
//! Forwards read-only requests from the dashboard's store management card so
//! the admin token never leaves the server.

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

pub const SHOPIFY_API_VERSION: &str = "2024-07";

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Shopify credentials are not configured on the server.")]
    NotConfigured,

    #[error("Endpoint is required in the request body.")]
    MissingEndpoint,

    #[error("Shopify API Error: {status} - {body}")]
    Upstream { status: u16, body: String },

    #[error("Failed to reach Shopify: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Shopify returned invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct ShopifyConfig {
    /// Store domain, e.g. `example.myshopify.com`
    pub store_url: String,
    pub access_token: String,
}

impl ShopifyConfig {
    pub fn from_parts(store_url: Option<String>, access_token: Option<String>) -> Option<Self> {
        let store_url = store_url?.trim().to_string();
        let access_token = access_token?.trim().to_string();
        if store_url.is_empty() || access_token.is_empty() {
            return None;
        }
        Some(Self {
            store_url,
            access_token,
        })
    }
}

impl std::fmt::Debug for ShopifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyConfig")
            .field("store_url", &self.store_url)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct ShopifyProxy {
    client: Client,
    config: Option<ShopifyConfig>,
    /// Scheme and host prefix; overridable so tests can point at a local server
    base: Option<String>,
}

impl ShopifyProxy {
    pub fn new(config: Option<ShopifyConfig>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build HTTP client, using default client: {}", e);
                Client::new()
            });
        Self {
            client,
            config,
            base: None,
        }
    }

    #[cfg(test)]
    fn with_base(mut self, base: String) -> Self {
        self.base = Some(base);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    pub fn endpoint_url(&self, config: &ShopifyConfig, endpoint: &str) -> String {
        let base = self
            .base
            .clone()
            .unwrap_or_else(|| format!("https://{}", config.store_url));
        format!(
            "{}/admin/api/{}/{}",
            base,
            SHOPIFY_API_VERSION,
            endpoint.trim_start_matches('/')
        )
    }

    /// GET `endpoint` from the Admin API and return its JSON body.
    /// An empty successful body becomes `{}`.
    pub async fn forward(&self, endpoint: &str) -> Result<Value, ProxyError> {
        let config = self.config.as_ref().ok_or_else(|| {
            tracing::error!("Shopify credentials missing on server");
            ProxyError::NotConfigured
        })?;
        if endpoint.trim().is_empty() {
            return Err(ProxyError::MissingEndpoint);
        }

        let url = self.endpoint_url(config, endpoint);
        let resp = self
            .client
            .get(&url)
            .header("X-Shopify-Access-Token", &config.access_token)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    async fn spawn_fake_shopify() -> String {
        let app = Router::new()
            .route(
                "/admin/api/2024-07/shop.json",
                get(|headers: HeaderMap| async move {
                    let token = headers
                        .get("x-shopify-access-token")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    if token == "shpat_test" {
                        (StatusCode::OK, Json(json!({ "shop": { "name": "Demo" } })))
                    } else {
                        (StatusCode::UNAUTHORIZED, Json(json!({ "errors": "bad token" })))
                    }
                }),
            )
            .route("/admin/api/2024-07/empty.json", get(|| async { "" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn proxy(token: &str, base: String) -> ShopifyProxy {
        let config = ShopifyConfig::from_parts(Some("demo.myshopify.com".into()), Some(token.into()));
        ShopifyProxy::new(config, Duration::from_secs(5)).with_base(base)
    }

    #[test]
    fn test_endpoint_url() {
        let proxy = ShopifyProxy::new(None, Duration::from_secs(1));
        let config = ShopifyConfig::from_parts(Some("demo.myshopify.com".into()), Some("t".into()))
            .unwrap();
        assert_eq!(
            proxy.endpoint_url(&config, "/products/count.json"),
            "https://demo.myshopify.com/admin/api/2024-07/products/count.json"
        );
    }

    #[tokio::test]
    async fn test_forward_returns_upstream_json() {
        let base = spawn_fake_shopify().await;
        let value = proxy("shpat_test", base).forward("shop.json").await.unwrap();
        assert_eq!(value["shop"]["name"], "Demo");
    }

    #[tokio::test]
    async fn test_empty_body_becomes_object() {
        let base = spawn_fake_shopify().await;
        let value = proxy("shpat_test", base).forward("empty.json").await.unwrap();
        assert_eq!(value, json!({}));
    }

    #[tokio::test]
    async fn test_upstream_error_carries_status_and_body() {
        let base = spawn_fake_shopify().await;
        let err = proxy("wrong", base).forward("shop.json").await.unwrap_err();
        assert!(matches!(err, ProxyError::Upstream { status: 401, .. }));
        assert!(err.to_string().starts_with("Shopify API Error: 401 - "));
    }

    #[tokio::test]
    async fn test_requires_credentials_and_endpoint() {
        let unconfigured = ShopifyProxy::new(None, Duration::from_secs(1));
        assert!(matches!(
            unconfigured.forward("shop.json").await,
            Err(ProxyError::NotConfigured)
        ));

        let configured = proxy("t", "http://127.0.0.1:9".to_string());
        assert!(matches!(
            configured.forward("  ").await,
            Err(ProxyError::MissingEndpoint)
        ));
    }
}
