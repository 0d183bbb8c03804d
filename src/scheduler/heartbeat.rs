//! Memory heartbeat
//!
//! Drives the autonomous dedup pass: once eagerly at startup, then on a fixed
//! interval until cancelled. A failed pass is logged and counted; the next
//! tick starts again from scratch.

use crate::memory::{DedupService, PassOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default spacing between autonomous passes
pub const DEFAULT_PASS_INTERVAL: Duration = Duration::from_secs(30 * 60);

const MAX_RECENT_ERRORS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HeartbeatState {
    pub running: bool,
    pub passes_completed: u64,
    pub passes_skipped: u64,
    pub passes_failed: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

pub struct HeartbeatEngine {
    dedup: DedupService,
    interval: Duration,
    state: Arc<RwLock<HeartbeatState>>,
}

impl HeartbeatEngine {
    pub fn new(dedup: DedupService, interval: Duration) -> Self {
        Self {
            dedup,
            interval,
            state: Arc::new(RwLock::new(HeartbeatState::default())),
        }
    }

    /// Shared view of the engine state, readable after the engine is spawned
    pub fn state_handle(&self) -> Arc<RwLock<HeartbeatState>> {
        Arc::clone(&self.state)
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Memory heartbeat started with {} minute interval",
            self.interval.as_secs() / 60
        );
        self.update(|s| s.running = true);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                // The first tick completes immediately
                _ = ticker.tick() => self.tick().await,
            }
        }

        self.update(|s| s.running = false);
        tracing::info!("Memory heartbeat stopped");
    }

    async fn tick(&self) {
        let result = self.dedup.run_once().await;
        let now = Utc::now();

        match result {
            Ok(PassOutcome::Completed { .. }) => self.update(|s| {
                s.passes_completed += 1;
                s.last_run_at = Some(now);
            }),
            Ok(PassOutcome::Skipped) => self.update(|s| s.passes_skipped += 1),
            Err(e) => {
                tracing::error!("Autonomous memory organization failed: {}", e);
                self.update(|s| {
                    s.passes_failed += 1;
                    s.errors.push(format!("{}: {}", now.to_rfc3339(), e));
                    if s.errors.len() > MAX_RECENT_ERRORS {
                        s.errors.remove(0);
                    }
                });
            }
        }
    }

    fn update(&self, f: impl FnOnce(&mut HeartbeatState)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }
}

pub fn read_state(state: &RwLock<HeartbeatState>) -> HeartbeatState {
    state
        .read()
        .map(|s| s.clone())
        .unwrap_or_else(|e| e.into_inner().clone())
}
