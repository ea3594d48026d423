//! Cache store boundary.

use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Tag-aware key/value store used by the HTTP cache and invalidation.
pub trait CacheStore: Send + Sync {
    fn lookup(&self, key: &str) -> Option<CachedResponse>;
    fn write(&self, key: &str, response: CachedResponse, tags: &[String], ttl: Duration);
    /// Drops every entry carrying any of `tags`; returns how many were dropped.
    fn invalidate(&self, tags: &[String]) -> usize;
    /// Takes the advisory lock without blocking; `false` when already held.
    fn try_lock(&self, name: &str) -> bool;
    fn unlock(&self, name: &str);
}

struct StoredEntry {
    response: CachedResponse,
    tags: Vec<String>,
    expires_at: Instant,
}

#[derive(Default)]
struct StoreState {
    entries: BTreeMap<String, StoredEntry>,
    tag_index: BTreeMap<String, BTreeSet<String>>,
    locks: BTreeSet<String>,
}

impl StoreState {
    fn remove(&mut self, key: &str) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        for tag in entry.tags {
            if let Some(keys) = self.tag_index.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(&tag);
                }
            }
        }
        true
    }
}

/// Process-local store for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryCacheStore {
    state: Mutex<StoreState>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.state.lock().locks.contains(name)
    }

    pub fn tags_of(&self, key: &str) -> Vec<String> {
        self.state
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.tags.clone())
            .unwrap_or_default()
    }
}

impl CacheStore for InMemoryCacheStore {
    fn lookup(&self, key: &str) -> Option<CachedResponse> {
        let mut state = self.state.lock();
        let expired = state.entries.get(key)?.expires_at <= Instant::now();
        if expired {
            state.remove(key);
            return None;
        }
        state.entries.get(key).map(|entry| entry.response.clone())
    }

    fn write(&self, key: &str, response: CachedResponse, tags: &[String], ttl: Duration) {
        let mut state = self.state.lock();
        state.remove(key);
        for tag in tags {
            state
                .tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        state.entries.insert(
            key.to_string(),
            StoredEntry {
                response,
                tags: tags.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn invalidate(&self, tags: &[String]) -> usize {
        let mut state = self.state.lock();
        let keys: BTreeSet<String> = tags
            .iter()
            .filter_map(|tag| state.tag_index.get(tag))
            .flatten()
            .cloned()
            .collect();
        let removed = keys.iter().filter(|key| state.remove(key)).count();
        debug!(
            "event=cache_invalidate module=cache status=ok tags={} removed={}",
            tags.len(),
            removed
        );
        removed
    }

    fn try_lock(&self, name: &str) -> bool {
        self.state.lock().locks.insert(name.to_string())
    }

    fn unlock(&self, name: &str) {
        self.state.lock().locks.remove(name);
    }
}
