//! In-process `KvStore` fake for unit tests
//!
//! Supports paged SCAN, failure injection and a gate that holds SET calls
//! open so tests can observe in-flight behaviour.

use super::{KvError, KvStore, ScanPage, SCAN_START};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub(crate) struct ScriptedStore {
    data: Mutex<BTreeMap<String, String>>,
    page_size: usize,
    scripted_pages: Option<Vec<Vec<String>>>,
    write_gate: Option<Arc<Semaphore>>,
    write_delay: Option<Duration>,
    unreachable: AtomicBool,
    failing_sets: AtomicUsize,
    scan_failure_after: Mutex<Option<usize>>,
    writes: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<String>>,
    scan_calls: AtomicUsize,
    mget_calls: AtomicUsize,
    del_calls: AtomicUsize,
    sets_in_flight: AtomicUsize,
    max_sets_in_flight: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
            page_size: 10,
            scripted_pages: None,
            write_gate: None,
            write_delay: None,
            unreachable: AtomicBool::new(false),
            failing_sets: AtomicUsize::new(0),
            scan_failure_after: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            scan_calls: AtomicUsize::new(0),
            mget_calls: AtomicUsize::new(0),
            del_calls: AtomicUsize::new(0),
            sets_in_flight: AtomicUsize::new(0),
            max_sets_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Serve SCAN from fixed pages instead of the stored keys
    pub fn with_scripted_pages(mut self, pages: Vec<Vec<String>>) -> Self {
        self.scripted_pages = Some(pages);
        self
    }

    /// Hold every SET until [`release_writes`](Self::release_writes) is called
    pub fn with_write_gate(mut self) -> Self {
        self.write_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Keep every SET outstanding for `delay` before it lands
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn release_writes(&self, count: usize) {
        if let Some(gate) = &self.write_gate {
            gate.add_permits(count);
        }
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.data.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.lock().unwrap().keys().cloned().collect()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail the next `count` SET calls
    pub fn fail_next_sets(&self, count: usize) {
        self.failing_sets.store(count, Ordering::SeqCst);
    }

    /// Let `pages` SCAN calls succeed, fail every one after
    pub fn fail_scan_after(&self, pages: usize) {
        *self.scan_failure_after.lock().unwrap() = Some(pages);
    }

    /// Successful SET calls, in completion order
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    pub fn mget_calls(&self) -> usize {
        self.mget_calls.load(Ordering::SeqCst)
    }

    pub fn del_calls(&self) -> usize {
        self.del_calls.load(Ordering::SeqCst)
    }

    pub fn max_sets_in_flight(&self) -> usize {
        self.max_sets_in_flight.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<(), KvError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(KvError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    fn matches(pattern: &str, key: &str) -> bool {
        match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        }
    }
}

#[async_trait]
impl KvStore for ScriptedStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.check_reachable()?;
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let now = self.sets_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_sets_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.write_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        let result = if let Err(e) = self.check_reachable() {
            Err(e)
        } else if self
            .failing_sets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Err(KvError::Http {
                status: 503,
                body: "service unavailable".to_string(),
            })
        } else {
            self.insert(key, value);
            self.writes
                .lock()
                .unwrap()
                .push((key.to_string(), value.to_string()));
            Ok(())
        };

        self.sets_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn scan(&self, cursor: &str, pattern: &str, _count: usize) -> Result<ScanPage, KvError> {
        self.check_reachable()?;
        let call = self.scan_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.scan_failure_after.lock().unwrap() {
            if call >= limit {
                return Err(KvError::Transport("connection reset".to_string()));
            }
        }

        let offset: usize = cursor
            .parse()
            .map_err(|_| KvError::Malformed(format!("bad cursor {}", cursor)))?;

        if let Some(pages) = &self.scripted_pages {
            let keys = pages.get(offset).cloned().unwrap_or_default();
            let next = offset + 1;
            let cursor = if next >= pages.len() {
                SCAN_START.to_string()
            } else {
                next.to_string()
            };
            return Ok(ScanPage { cursor, keys });
        }

        let matching: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|k| Self::matches(pattern, k))
            .collect();
        let keys: Vec<String> = matching
            .iter()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect();
        let next = offset + self.page_size;
        let cursor = if next >= matching.len() {
            SCAN_START.to_string()
        } else {
            next.to_string()
        };
        Ok(ScanPage { cursor, keys })
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError> {
        self.check_reachable()?;
        self.mget_calls.fetch_add(1, Ordering::SeqCst);
        Ok(keys.iter().map(|k| self.value(k)).collect())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, KvError> {
        self.check_reachable()?;
        self.del_calls.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock().unwrap();
        let mut removed = 0;
        for key in keys {
            if data.remove(key).is_some() {
                removed += 1;
                self.deleted.lock().unwrap().push(key.clone());
            }
        }
        Ok(removed)
    }
}
