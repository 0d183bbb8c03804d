//! Server State Management
//!
//! Shared state for the headless server:
//! - The authoritative in-memory state snapshot
//! - The snapshot sync coordinator that persists it
//! - Memory library, dedup service and heartbeat status
//! - The store proxy

use crate::config::ServerConfig;
use crate::kv::{KvStore, UpstashStore};
use crate::memory::{DedupService, MemoryLibrary, SnapshotSync, StateSnapshot, SyncOptions};
use crate::proxy::ShopifyProxy;
use crate::scheduler::heartbeat::{read_state, HeartbeatState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Server runtime state
pub struct ServerState {
    /// Latest snapshot accepted from the dashboard
    snapshot: RwLock<StateSnapshot>,
    /// Set once the dashboard has changed the snapshot since startup
    dirty: AtomicBool,
    pub sync: SnapshotSync,
    pub dedup: DedupService,
    pub library: MemoryLibrary,
    pub shopify: ShopifyProxy,
    heartbeat: Option<Arc<std::sync::RwLock<HeartbeatState>>>,
    /// Server start time
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl ServerState {
    /// Wire every component against one remote store.
    /// Must be called from within a Tokio runtime.
    pub fn new(store: Option<Arc<dyn KvStore>>, sync_options: SyncOptions, shopify: ShopifyProxy) -> Self {
        Self {
            snapshot: RwLock::new(sync_options.defaults.clone()),
            dirty: AtomicBool::new(false),
            sync: SnapshotSync::new(store.clone(), sync_options),
            dedup: DedupService::new(store.clone()),
            library: MemoryLibrary::new(store),
            shopify,
            heartbeat: None,
            start_time: chrono::Utc::now(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let store: Option<Arc<dyn KvStore>> = config.upstash().map(|upstash| {
            let store = UpstashStore::new(upstash);
            tracing::info!("Using Upstash persistent memory at {}", store.url());
            Arc::new(store) as Arc<dyn KvStore>
        });
        let sync_options = SyncOptions {
            debounce: config.debounce(),
            write_timeout: config.kv_timeout(),
            ..SyncOptions::default()
        };
        let shopify = ShopifyProxy::new(config.shopify(), config.kv_timeout() * 3);

        Self::new(store, sync_options, shopify)
    }

    pub fn with_heartbeat(mut self, state: Arc<std::sync::RwLock<HeartbeatState>>) -> Self {
        self.heartbeat = Some(state);
        self
    }

    pub fn heartbeat(&self) -> Option<HeartbeatState> {
        self.heartbeat.as_deref().map(read_state)
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> i64 {
        let now = chrono::Utc::now();
        now.signed_duration_since(self.start_time).num_seconds()
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Seed the in-memory snapshot from the startup load
    pub async fn install_loaded(&self, snapshot: StateSnapshot) {
        *self.snapshot.write().await = snapshot;
    }

    /// Replace the snapshot with a dashboard mutation and schedule a save.
    /// The guard is held across `request_save` so the debouncer sees
    /// mutations in the same order as readers of the in-memory copy.
    pub async fn replace_snapshot(&self, snapshot: StateSnapshot) {
        let mut current = self.snapshot.write().await;
        *current = snapshot.clone();
        self.dirty.store(true, Ordering::SeqCst);
        self.sync.request_save(snapshot);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }
}
