//! Content-addressed deduplication of the memory library
//!
//! A pass enumerates every memory-file key, fetches all contents in one MGET,
//! hashes each blob with SHA-256 and deletes every key whose digest was
//! already seen earlier in scan order. The first key per digest always
//! survives, so a second pass over the same keys deletes nothing.

use crate::kv::{scan_all, KvError, KvStore};
use crate::memory::{DEDUP_STATUS_KEY, MEMORY_FILE_PATTERN};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("persistent memory not configured")]
    NotConfigured,

    #[error("remote store error: {0}")]
    Store(#[from] KvError),

    #[error("malformed dedup data: {0}")]
    Malformed(String),
}

/// Record of the last completed autonomous pass, polled by the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRun {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Summary of one dedup pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    pub scanned: usize,
    pub removed: Vec<String>,
}

impl DedupReport {
    pub fn message(&self) -> String {
        format!(
            "Autonomous action: Organization complete. Scanned {} files and removed {} duplicate(s).",
            self.scanned,
            self.removed.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Store not configured; nothing was read or written
    Skipped,
    Completed { report: DedupReport, run: DedupRun },
}

/// SHA-256 of a stored value, hex encoded
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[derive(Clone)]
pub struct DedupService {
    store: Option<Arc<dyn KvStore>>,
}

impl DedupService {
    pub fn new(store: Option<Arc<dyn KvStore>>) -> Self {
        Self { store }
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    fn store(&self) -> Result<&dyn KvStore, DedupError> {
        self.store
            .as_deref()
            .ok_or(DedupError::NotConfigured)
    }

    /// Every memory-file key, in scan order, across all SCAN pages
    pub async fn list_keys(&self) -> Result<Vec<String>, DedupError> {
        Ok(scan_all(self.store()?, MEMORY_FILE_PATTERN).await?)
    }

    /// Remove byte-identical duplicates among `keys`, keeping the first key
    /// per digest in the order given.
    pub async fn run_pass(&self, keys: &[String]) -> Result<DedupReport, DedupError> {
        if keys.is_empty() {
            return Ok(DedupReport {
                scanned: 0,
                removed: Vec::new(),
            });
        }
        let store = self.store()?;

        let contents = store.mget(keys).await?;
        if contents.len() != keys.len() {
            return Err(DedupError::Malformed(format!(
                "bulk read returned {} values for {} keys",
                contents.len(),
                keys.len()
            )));
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut duplicates = Vec::new();
        for (key, content) in keys.iter().zip(contents) {
            // Deleted between SCAN and MGET
            let Some(content) = content else { continue };
            if !seen.insert(content_digest(content.as_bytes())) {
                tracing::debug!("Duplicate memory file: {}", key);
                duplicates.push(key.clone());
            }
        }

        if !duplicates.is_empty() {
            let removed = store.del(&duplicates).await?;
            tracing::info!(
                "Removed {} duplicate memory file(s) ({} requested)",
                removed,
                duplicates.len()
            );
        }

        Ok(DedupReport {
            scanned: keys.len(),
            removed: duplicates,
        })
    }

    /// Overwrite the single run record
    pub async fn publish_status(&self, message: &str) -> Result<DedupRun, DedupError> {
        let run = DedupRun {
            timestamp: Utc::now(),
            message: message.to_string(),
        };
        let body = serde_json::to_string(&run)
            .map_err(|e| DedupError::Malformed(format!("failed to encode run record: {}", e)))?;
        self.store()?.set(DEDUP_STATUS_KEY, &body).await?;
        Ok(run)
    }

    /// Last published run; `None` before the first pass or when unconfigured
    pub async fn status(&self) -> Result<Option<DedupRun>, DedupError> {
        let Some(store) = self.store.as_deref() else {
            return Ok(None);
        };
        match store.get(DEDUP_STATUS_KEY).await? {
            Some(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| DedupError::Malformed(format!("run record: {}", e))),
            None => Ok(None),
        }
    }

    /// One autonomous pass: list, dedup, publish. Any error aborts the pass
    /// and leaves the previous run record in place.
    pub async fn run_once(&self) -> Result<PassOutcome, DedupError> {
        if !self.is_configured() {
            tracing::info!("Autonomous memory organization skipped: persistent memory not configured");
            return Ok(PassOutcome::Skipped);
        }

        tracing::info!("Running autonomous memory organization");
        let keys = self.list_keys().await?;
        let report = self.run_pass(&keys).await?;
        let run = self.publish_status(&report.message()).await?;
        tracing::info!("{}", run.message);

        Ok(PassOutcome::Completed { report, run })
    }
}
