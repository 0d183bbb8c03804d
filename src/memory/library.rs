//! Memory library: the upload boundary for memory files
//!
//! Each uploaded file becomes one immutable blob under
//! `luminous:memory:file:<sanitized name>`. Text is stored verbatim; anything
//! else is stored as `base64:`-prefixed Base64 so the value stays a string.

use crate::kv::{scan_all, KvError, KvStore};
use crate::memory::{MEMORY_FILE_PATTERN, MEMORY_FILE_PREFIX};
use base64::Engine;
use regex::Regex;
use std::sync::Arc;

/// Marker prefix for blobs stored as Base64
pub const BINARY_PREFIX: &str = "base64:";

/// Media types that are already text (including extracted document text)
const TEXT_MEDIA_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/x-ndjson",
    "application/x-yaml",
];

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("persistent memory not configured")]
    NotConfigured,

    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    #[error("file {name:?} declared as {media_type} is not valid UTF-8")]
    InvalidText { name: String, media_type: String },

    #[error("remote store error: {0}")]
    Store(#[from] KvError),
}

lazy_static::lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^A-Za-z0-9._-]").unwrap();
}

/// Map a user-provided file name onto the safe key character set
pub fn sanitize_name(name: &str) -> Result<String, LibraryError> {
    let trimmed = name.trim();
    let sanitized = UNSAFE_CHARS.replace_all(trimmed, "_").into_owned();
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        return Err(LibraryError::InvalidName(name.to_string()));
    }
    Ok(sanitized)
}

/// Storage key for a file name
pub fn file_key(name: &str) -> Result<String, LibraryError> {
    Ok(format!("{}{}", MEMORY_FILE_PREFIX, sanitize_name(name)?))
}

/// Display name for a stored key
pub fn display_name(key: &str) -> &str {
    key.strip_prefix(MEMORY_FILE_PREFIX).unwrap_or(key)
}

pub fn is_text_media_type(media_type: &str) -> bool {
    let essence = media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("text/") || TEXT_MEDIA_TYPES.contains(&essence.as_str())
}

/// Encode file bytes into the stored string form
pub fn encode_blob(name: &str, media_type: &str, bytes: &[u8]) -> Result<String, LibraryError> {
    if is_text_media_type(media_type) {
        return String::from_utf8(bytes.to_vec()).map_err(|_| LibraryError::InvalidText {
            name: name.to_string(),
            media_type: media_type.to_string(),
        });
    }
    Ok(format!(
        "{}{}",
        BINARY_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

/// A stored memory file
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoredFile {
    pub key: String,
    pub name: String,
    pub media_type: String,
    pub size: usize,
}

#[derive(Clone)]
pub struct MemoryLibrary {
    store: Option<Arc<dyn KvStore>>,
}

impl MemoryLibrary {
    pub fn new(store: Option<Arc<dyn KvStore>>) -> Self {
        Self { store }
    }

    fn store(&self) -> Result<&dyn KvStore, LibraryError> {
        self.store.as_deref().ok_or(LibraryError::NotConfigured)
    }

    /// Store an uploaded file, overwriting any file with the same sanitized name
    pub async fn store_file(
        &self,
        name: &str,
        media_type: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, LibraryError> {
        let store = self.store()?;
        let key = file_key(name)?;
        let value = encode_blob(name, media_type, bytes)?;

        store.set(&key, &value).await?;
        tracing::info!("Stored memory file {} ({} bytes, {})", key, bytes.len(), media_type);

        Ok(StoredFile {
            name: display_name(&key).to_string(),
            key,
            media_type: media_type.to_string(),
            size: bytes.len(),
        })
    }

    /// Every stored memory-file key
    pub async fn list(&self) -> Result<Vec<String>, LibraryError> {
        Ok(scan_all(self.store()?, MEMORY_FILE_PATTERN).await?)
    }
}
