//! memory/sync.rs
//! Snapshot sync coordinator: keeps the remote state record converged on the
//! latest snapshot the dashboard produced.
//!
//! Write path state machine:
//!
//! ```text
//! Idle --submit--> Writing --done--> Idle
//!                     |                 \--(failed, nothing newer)--> Idle-with-Pending
//!                     \--(pending slot filled)--> Writing (drain)
//! ```
//!
//! At most one SET for the state key is outstanding at any time. Snapshots
//! submitted while a write is in flight overwrite a single pending slot; the
//! writer drains that slot when its current write finishes.

use crate::kv::{KvError, KvStore};
use crate::memory::snapshot::StateSnapshot;
use crate::memory::STATE_KEY;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Quiet period before a burst of mutations is saved
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Upper bound on a single remote write so a hung request cannot block the drain
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

const SAVE_FAILED_BANNER: &str = "Connection error: Could not save state. Caching locally.";
const LOAD_FAILED_BANNER: &str = "Failed to connect to persistent memory. Using local fallback.";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to reach persistent memory: {0}")]
    Connection(#[from] KvError),

    #[error("stored state is malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Writing,
}

/// Coarse status shown in the dashboard header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    LocalFallback,
    Error,
    NotConfigured,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub configured: bool,
    pub phase: SyncPhase,
    /// A snapshot is waiting in the pending slot
    pub pending: bool,
    pub last_saved_at: Option<DateTime<Utc>>,
    /// User-facing banner text for the most recent failure
    pub last_error: Option<String>,
    pub last_error_detail: Option<String>,
    pub load_failed: bool,
    pub writes_completed: u64,
    pub writes_failed: u64,
}

impl SyncStatus {
    fn new(configured: bool) -> Self {
        Self {
            configured,
            phase: SyncPhase::Idle,
            pending: false,
            last_saved_at: None,
            last_error: None,
            last_error_detail: None,
            load_failed: false,
            writes_completed: 0,
            writes_failed: 0,
        }
    }

    pub fn connection(&self) -> ConnectionStatus {
        if !self.configured {
            ConnectionStatus::NotConfigured
        } else if self.last_error.is_some() && self.load_failed {
            ConnectionStatus::LocalFallback
        } else if self.last_error.is_some() {
            ConnectionStatus::Error
        } else {
            ConnectionStatus::Connected
        }
    }
}

/// Result of the startup load. Every variant carries a usable snapshot.
#[derive(Debug)]
pub enum LoadOutcome {
    /// Stored record found and parsed
    Remote(StateSnapshot),
    /// No record existed; the default was returned and written
    Initialized(StateSnapshot),
    /// Store not configured; default returned, nothing will be saved
    NotConfigured(StateSnapshot),
    /// Store unreachable or record malformed; default returned
    Fallback {
        snapshot: StateSnapshot,
        error: SyncError,
    },
}

impl LoadOutcome {
    pub fn snapshot(&self) -> &StateSnapshot {
        match self {
            LoadOutcome::Remote(s) | LoadOutcome::Initialized(s) | LoadOutcome::NotConfigured(s) => s,
            LoadOutcome::Fallback { snapshot, .. } => snapshot,
        }
    }

    pub fn into_snapshot(self) -> StateSnapshot {
        match self {
            LoadOutcome::Remote(s) | LoadOutcome::Initialized(s) | LoadOutcome::NotConfigured(s) => s,
            LoadOutcome::Fallback { snapshot, .. } => snapshot,
        }
    }

    /// Recoverable error to surface as a banner
    pub fn error(&self) -> Option<&SyncError> {
        match self {
            LoadOutcome::Fallback { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub key: String,
    pub debounce: Duration,
    pub write_timeout: Duration,
    pub defaults: StateSnapshot,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            key: STATE_KEY.to_string(),
            debounce: DEFAULT_DEBOUNCE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            defaults: StateSnapshot::default(),
        }
    }
}

#[derive(Default)]
struct WriterState {
    in_flight: bool,
    pending: Option<StateSnapshot>,
}

struct SyncInner {
    store: Option<Arc<dyn KvStore>>,
    options: SyncOptions,
    writer: Mutex<WriterState>,
    status: RwLock<SyncStatus>,
    phase: watch::Sender<SyncPhase>,
}

/// Handle to the coordinator. Cheap to clone; all clones share one write chain.
#[derive(Clone)]
pub struct SnapshotSync {
    inner: Arc<SyncInner>,
    debounce_tx: mpsc::UnboundedSender<StateSnapshot>,
}

impl SnapshotSync {
    /// Create the coordinator and start its debounce task.
    /// Must be called from within a Tokio runtime.
    pub fn new(store: Option<Arc<dyn KvStore>>, options: SyncOptions) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        let inner = Arc::new(SyncInner {
            status: RwLock::new(SyncStatus::new(store.is_some())),
            store,
            options,
            writer: Mutex::new(WriterState::default()),
            phase,
        });

        let (debounce_tx, debounce_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_debouncer(Arc::clone(&inner), debounce_rx));

        Self { inner, debounce_tx }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.store.is_some()
    }

    /// Fetch the stored snapshot once at startup
    pub async fn load(&self) -> LoadOutcome {
        let defaults = self.inner.options.defaults.clone();
        let Some(store) = self.inner.store.as_ref() else {
            tracing::warn!("Upstash credentials not configured. Using default state.");
            return LoadOutcome::NotConfigured(defaults);
        };

        let fetched = match tokio::time::timeout(
            self.inner.options.write_timeout,
            store.get(&self.inner.options.key),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(KvError::Timeout(self.inner.options.write_timeout)),
        };

        match fetched {
            Ok(Some(text)) if !text.trim().is_empty() => match StateSnapshot::from_json(&text) {
                Ok(mut snapshot) => {
                    let added = snapshot.backfill(&defaults);
                    if !added.is_empty() {
                        tracing::info!("Backfilled missing state sections: {}", added.join(", "));
                    }
                    tracing::info!("State loaded from persistent memory");
                    LoadOutcome::Remote(snapshot)
                }
                Err(e) => {
                    tracing::error!("Stored state is malformed, using default state: {}", e);
                    let error = SyncError::Malformed(e.to_string());
                    self.inner.record_load_failure(&error);
                    LoadOutcome::Fallback {
                        snapshot: defaults,
                        error,
                    }
                }
            },
            Ok(_) => {
                tracing::info!("No state found in persistent memory. Initializing with default state.");
                self.save_now(defaults.clone());
                LoadOutcome::Initialized(defaults)
            }
            Err(e) => {
                tracing::error!("Could not load state from persistent memory: {}", e);
                let error = SyncError::Connection(e);
                self.inner.record_load_failure(&error);
                LoadOutcome::Fallback {
                    snapshot: defaults,
                    error,
                }
            }
        }
    }

    /// Sole mutation entry point. Debounced; the last snapshot of a burst is
    /// handed to the single-flight writer once the quiet period elapses.
    pub fn request_save(&self, snapshot: StateSnapshot) {
        if !self.is_configured() {
            tracing::debug!("Persistent memory not configured. State will not be saved.");
            return;
        }
        if self.debounce_tx.send(snapshot).is_err() {
            tracing::error!("Debounce task has stopped; state change dropped");
        }
    }

    /// Submit straight to the single-flight writer, skipping the debounce
    pub fn save_now(&self, snapshot: StateSnapshot) {
        self.inner.submit(snapshot);
    }

    /// Retry a snapshot parked by a failed write. Returns `true` when a write
    /// was started.
    pub fn flush(&self) -> bool {
        let Some(store) = self.inner.store.clone() else {
            return false;
        };
        let parked = {
            let mut writer = self.inner.lock_writer();
            if writer.in_flight {
                return false;
            }
            let Some(snapshot) = writer.pending.take() else {
                return false;
            };
            self.inner.begin_write(&mut writer);
            snapshot
        };

        tracing::info!("Retrying parked state write");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.write_chain(store, parked).await });
        true
    }

    /// Resolves once no write is in flight
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.phase.subscribe();
        let _ = rx.wait_for(|phase| *phase == SyncPhase::Idle).await;
    }

    pub fn status(&self) -> SyncStatus {
        self.inner
            .status
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

impl SyncInner {
    fn lock_writer(&self) -> MutexGuard<'_, WriterState> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_status(&self, f: impl FnOnce(&mut SyncStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }

    /// Idle -> Writing. Caller holds the writer lock.
    fn begin_write(&self, writer: &mut WriterState) {
        writer.in_flight = true;
        self.phase.send_replace(SyncPhase::Writing);
        self.update_status(|s| {
            s.phase = SyncPhase::Writing;
            s.pending = writer.pending.is_some();
        });
    }

    fn submit(self: &Arc<Self>, snapshot: StateSnapshot) {
        let Some(store) = self.store.clone() else {
            tracing::debug!("Persistent memory not configured. State will not be saved.");
            return;
        };

        {
            let mut writer = self.lock_writer();
            if writer.in_flight {
                tracing::debug!("Write in flight; stashing latest snapshot");
                writer.pending = Some(snapshot);
                self.update_status(|s| s.pending = true);
                return;
            }
            // A parked failure is superseded by the newer snapshot
            writer.pending = None;
            self.begin_write(&mut writer);
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.write_chain(store, snapshot).await });
    }

    async fn write_chain(self: Arc<Self>, store: Arc<dyn KvStore>, first: StateSnapshot) {
        let mut next = Some(first);

        while let Some(snapshot) = next.take() {
            let result = self.write_once(store.as_ref(), &snapshot).await;

            let mut writer = self.lock_writer();
            match result {
                Ok(()) => {
                    self.record_success();
                    next = writer.pending.take();
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::warn!("Could not reach persistent memory, state kept locally: {}", e);
                    } else {
                        tracing::error!("Failed to save state to persistent memory: {}", e);
                    }
                    self.record_write_failure(&e);
                    match writer.pending.take() {
                        Some(newer) => next = Some(newer),
                        None => writer.pending = Some(snapshot),
                    }
                }
            }

            if next.is_none() {
                writer.in_flight = false;
                self.phase.send_replace(SyncPhase::Idle);
            }
            let pending = writer.pending.is_some();
            self.update_status(|s| {
                s.pending = pending;
                if next.is_none() {
                    s.phase = SyncPhase::Idle;
                }
            });
        }
    }

    async fn write_once(&self, store: &dyn KvStore, snapshot: &StateSnapshot) -> Result<(), KvError> {
        let body = snapshot.to_json();
        let timeout = self.options.write_timeout;
        match tokio::time::timeout(timeout, store.set(&self.options.key, &body)).await {
            Ok(result) => result,
            Err(_) => Err(KvError::Timeout(timeout)),
        }
    }

    fn record_success(&self) {
        self.update_status(|s| {
            s.last_saved_at = Some(Utc::now());
            s.last_error = None;
            s.last_error_detail = None;
            s.load_failed = false;
            s.writes_completed += 1;
        });
    }

    fn record_write_failure(&self, err: &KvError) {
        self.update_status(|s| {
            s.last_error = Some(SAVE_FAILED_BANNER.to_string());
            s.last_error_detail = Some(err.to_string());
            s.load_failed = false;
            s.writes_failed += 1;
        });
    }

    fn record_load_failure(&self, err: &SyncError) {
        self.update_status(|s| {
            s.last_error = Some(LOAD_FAILED_BANNER.to_string());
            s.last_error_detail = Some(err.to_string());
            s.load_failed = true;
        });
    }
}

/// Trailing-edge debounce: every new snapshot rearms the timer; the last one
/// seen when the timer fires is submitted. A closed channel flushes the last
/// snapshot immediately.
async fn run_debouncer(inner: Arc<SyncInner>, mut rx: mpsc::UnboundedReceiver<StateSnapshot>) {
    let window = inner.options.debounce;

    while let Some(mut latest) = rx.recv().await {
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(snapshot) => latest = snapshot,
                    None => break,
                },
                _ = tokio::time::sleep(window) => break,
            }
        }
        inner.submit(latest);
    }

    tracing::debug!("Debounce task stopped");
}
