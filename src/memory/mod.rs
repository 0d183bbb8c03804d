//! Persistent memory backed by the remote key-value store
//!
//! ## Key layout
//! - `luminous:state` - the single application state snapshot
//! - `luminous:memory:file:<name>` - uploaded memory files
//! - `luminous:memory:autonomous_status` - last autonomous dedup run

pub mod dedup;
pub mod library;
pub mod snapshot;
pub mod sync;

pub use dedup::{DedupError, DedupReport, DedupRun, DedupService, PassOutcome};
pub use library::{LibraryError, MemoryLibrary, StoredFile};
pub use snapshot::StateSnapshot;
pub use sync::{ConnectionStatus, LoadOutcome, SnapshotSync, SyncError, SyncOptions, SyncStatus};

pub const STATE_KEY: &str = "luminous:state";
pub const MEMORY_FILE_PREFIX: &str = "luminous:memory:file:";
pub const MEMORY_FILE_PATTERN: &str = "luminous:memory:file:*";
pub const DEDUP_STATUS_KEY: &str = "luminous:memory:autonomous_status";
