//! Upstash Redis REST client
//! Sends each command as a JSON array to the database's REST endpoint:
//! `POST {url}` with body `["SET", "key", "value"]` and a bearer token.

use super::{KvError, KvStore, ScanPage};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Connection details for the Upstash endpoint
#[derive(Clone)]
pub struct UpstashConfig {
    pub url: String,
    pub token: String,
    pub timeout: Duration,
}

impl UpstashConfig {
    /// Build a config only when both URL and token are present and non-blank.
    /// Absent credentials are a valid "not configured" state, not an error.
    pub fn from_parts(url: Option<String>, token: Option<String>, timeout: Duration) -> Option<Self> {
        let url = url.map(|u| u.trim().trim_end_matches('/').to_string())?;
        let token = token.map(|t| t.trim().to_string())?;
        if url.is_empty() || token.is_empty() {
            return None;
        }
        Some(Self { url, token, timeout })
    }
}

impl std::fmt::Debug for UpstashConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstashConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct UpstashResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Remote store backed by an Upstash Redis database
pub struct UpstashStore {
    client: Client,
    config: UpstashConfig,
}

impl UpstashStore {
    pub fn new(config: UpstashConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build HTTP client, using default client: {}", e);
                Client::new()
            });

        Self { client, config }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn command(&self, args: Vec<Value>) -> Result<Value, KvError> {
        let name = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string();

        let resp = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.token)
            .json(&args)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_transport(e))?;
        let parsed: Option<UpstashResponse> = serde_json::from_str(&body).ok();

        if let Some(UpstashResponse { error: Some(message), .. }) = &parsed {
            tracing::warn!("Upstash rejected {}: {}", name, message);
            return Err(KvError::Remote(message.clone()));
        }
        if !status.is_success() {
            return Err(KvError::Http {
                status: status.as_u16(),
                body,
            });
        }

        parsed
            .map(|r| r.result)
            .ok_or_else(|| KvError::Malformed(format!("{} response is not a result object", name)))
    }

    fn map_transport(&self, err: reqwest::Error) -> KvError {
        if err.is_timeout() {
            KvError::Timeout(self.config.timeout)
        } else {
            KvError::from(err)
        }
    }
}

fn parse_optional_string(value: Value, context: &str) -> Result<Option<String>, KvError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(KvError::Malformed(format!(
            "{}: expected string or null, got {}",
            context, other
        ))),
    }
}

fn parse_scan(value: Value) -> Result<ScanPage, KvError> {
    let Value::Array(mut parts) = value else {
        return Err(KvError::Malformed("SCAN result is not an array".to_string()));
    };
    if parts.len() != 2 {
        return Err(KvError::Malformed(format!(
            "SCAN result has {} elements, expected 2",
            parts.len()
        )));
    }

    let keys = match parts.pop() {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|k| match k {
                Value::String(s) => Ok(s),
                other => Err(KvError::Malformed(format!("SCAN key is not a string: {}", other))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(KvError::Malformed("SCAN keys are not an array".to_string())),
    };

    // Upstash returns the cursor as a string, some proxies as a number
    let cursor = match parts.pop() {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(KvError::Malformed("SCAN cursor missing".to_string())),
    };

    Ok(ScanPage { cursor, keys })
}

#[async_trait]
impl KvStore for UpstashStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let result = self.command(vec![json!("GET"), json!(key)]).await?;
        parse_optional_string(result, "GET")
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.command(vec![json!("SET"), json!(key), json!(value)])
            .await?;
        Ok(())
    }

    async fn scan(&self, cursor: &str, pattern: &str, count: usize) -> Result<ScanPage, KvError> {
        let result = self
            .command(vec![
                json!("SCAN"),
                json!(cursor),
                json!("MATCH"),
                json!(pattern),
                json!("COUNT"),
                json!(count),
            ])
            .await?;
        parse_scan(result)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec![json!("MGET")];
        args.extend(keys.iter().map(|k| json!(k)));

        let result = self.command(args).await?;
        let Value::Array(items) = result else {
            return Err(KvError::Malformed("MGET result is not an array".to_string()));
        };
        if items.len() != keys.len() {
            return Err(KvError::Malformed(format!(
                "MGET returned {} values for {} keys",
                items.len(),
                keys.len()
            )));
        }
        items
            .into_iter()
            .map(|v| parse_optional_string(v, "MGET"))
            .collect()
    }

    async fn del(&self, keys: &[String]) -> Result<u64, KvError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut args = vec![json!("DEL")];
        args.extend(keys.iter().map(|k| json!(k)));

        let result = self.command(args).await?;
        result
            .as_u64()
            .ok_or_else(|| KvError::Malformed(format!("DEL result is not a count: {}", result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    const TOKEN: &str = "test-token";

    type Db = Arc<Mutex<BTreeMap<String, String>>>;

    /// Minimal stand-in for the Upstash REST endpoint
    async fn fake_upstash(
        State(db): State<Db>,
        headers: HeaderMap,
        Json(args): Json<Vec<Value>>,
    ) -> (StatusCode, Json<Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth != format!("Bearer {}", TOKEN) {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" })));
        }

        let words: Vec<String> = args
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect();
        let mut db = db.lock().unwrap();
        let result = match words[0].as_str() {
            "GET" => db.get(&words[1]).map(|v| json!(v)).unwrap_or(Value::Null),
            "SET" => {
                db.insert(words[1].clone(), words[2].clone());
                json!("OK")
            }
            "MGET" => Value::Array(
                words[1..]
                    .iter()
                    .map(|k| db.get(k).map(|v| json!(v)).unwrap_or(Value::Null))
                    .collect(),
            ),
            "DEL" => json!(words[1..].iter().filter(|k| db.remove(*k).is_some()).count()),
            "SCAN" => {
                let prefix = words[3].trim_end_matches('*');
                let keys: Vec<&String> = db.keys().filter(|k| k.starts_with(prefix)).collect();
                json!(["0", keys])
            }
            other => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("ERR unknown command '{}'", other) })),
                )
            }
        };
        (StatusCode::OK, Json(json!({ "result": result })))
    }

    async fn spawn_fake() -> String {
        let db: Db = Arc::new(Mutex::new(BTreeMap::new()));
        let app = Router::new().route("/", post(fake_upstash)).with_state(db);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn store(url: String, token: &str) -> UpstashStore {
        let config =
            UpstashConfig::from_parts(Some(url), Some(token.to_string()), Duration::from_secs(5))
                .unwrap();
        UpstashStore::new(config)
    }

    #[test]
    fn test_config_requires_both_parts() {
        let timeout = Duration::from_secs(1);
        assert!(UpstashConfig::from_parts(None, Some("t".into()), timeout).is_none());
        assert!(UpstashConfig::from_parts(Some("https://x".into()), None, timeout).is_none());
        assert!(UpstashConfig::from_parts(Some("  ".into()), Some("t".into()), timeout).is_none());

        let config =
            UpstashConfig::from_parts(Some("https://x.upstash.io/".into()), Some("t".into()), timeout)
                .unwrap();
        assert_eq!(config.url, "https://x.upstash.io");
        assert!(!format!("{:?}", config).contains("\"t\""));
    }

    #[test]
    fn test_parse_scan_accepts_numeric_cursor() {
        let page = parse_scan(json!([17, ["a", "b"]])).unwrap();
        assert_eq!(page.cursor, "17");
        assert_eq!(page.keys, vec!["a", "b"]);

        assert!(parse_scan(json!({"cursor": 0})).is_err());
        assert!(parse_scan(json!(["0", [1]])).is_err());
    }

    #[tokio::test]
    async fn test_commands_round_trip_against_rest_endpoint() {
        let url = spawn_fake().await;
        let kv = store(url, TOKEN);

        assert_eq!(kv.get("luminous:state").await.unwrap(), None);
        kv.set("luminous:state", "{\"a\":1}").await.unwrap();
        assert_eq!(
            kv.get("luminous:state").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        kv.set("luminous:memory:file:a.txt", "x").await.unwrap();
        let page = kv.scan("0", "luminous:memory:file:*", 100).await.unwrap();
        assert!(page.is_last());
        assert_eq!(page.keys, vec!["luminous:memory:file:a.txt"]);

        let values = kv
            .mget(&["luminous:memory:file:a.txt".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some("x".to_string()), None]);

        let removed = kv
            .del(&["luminous:memory:file:a.txt".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_rejected_token_surfaces_remote_error() {
        let url = spawn_fake().await;
        let kv = store(url, "wrong");

        match kv.get("luminous:state").await {
            Err(KvError::Remote(message)) => assert_eq!(message, "Unauthorized"),
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        // Port 9 (discard) is reliably closed on loopback
        let kv = store("http://127.0.0.1:9".to_string(), TOKEN);
        let err = kv.get("luminous:state").await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {:?}", err);
    }
}
