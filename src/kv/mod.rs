//! Remote key-value store abstraction
//!
//! The persistence core only ever talks to the remote store through the
//! [`KvStore`] trait: five commands (GET, SET, SCAN, MGET, DEL). The production
//! implementation is the Upstash REST client in [`upstash`].

pub mod upstash;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

pub use upstash::{UpstashConfig, UpstashStore};

/// Cursor value that both starts and terminates a SCAN iteration
pub const SCAN_START: &str = "0";

/// Page size hint passed to SCAN
pub const SCAN_PAGE_HINT: usize = 100;

/// Errors surfaced by a remote store
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("remote store rejected command: {0}")]
    Remote(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl KvError {
    /// Transient failures are retried implicitly by the next natural trigger
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KvError::Transport(_) | KvError::Timeout(_) | KvError::Http { status: 500..=599, .. }
        )
    }
}

impl From<reqwest::Error> for KvError {
    fn from(err: reqwest::Error) -> Self {
        KvError::Transport(err.to_string())
    }
}

/// One page of a cursor-based SCAN
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call; [`SCAN_START`] when iteration is complete
    pub cursor: String,
    pub keys: Vec<String>,
}

impl ScanPage {
    pub fn is_last(&self) -> bool {
        self.cursor == SCAN_START
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value; `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Overwrite a value
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Fetch one page of keys matching `pattern`
    async fn scan(&self, cursor: &str, pattern: &str, count: usize) -> Result<ScanPage, KvError>;

    /// Bulk read, aligned by index with `keys`
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError>;

    /// Bulk delete, returns how many keys existed
    async fn del(&self, keys: &[String]) -> Result<u64, KvError>;
}

/// Walk every SCAN page for `pattern` and return the complete key set.
///
/// Keys are returned in scan order. SCAN may report a key more than once
/// across pages; only the first occurrence is kept. A failure on any page
/// fails the whole call so callers never act on a partial set.
pub async fn scan_all(store: &dyn KvStore, pattern: &str) -> Result<Vec<String>, KvError> {
    let mut keys: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut cursor = SCAN_START.to_string();
    let mut pages = 0usize;

    loop {
        let page = store.scan(&cursor, pattern, SCAN_PAGE_HINT).await?;
        pages += 1;
        let last = page.is_last();
        for key in page.keys {
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
        if last {
            break;
        }
        cursor = page.cursor;
    }

    tracing::debug!("SCAN {} walked {} page(s), {} key(s)", pattern, pages, keys.len());
    Ok(keys)
}
