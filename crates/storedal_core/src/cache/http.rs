//! Lookup / lock / produce / store flow for cacheable responses.

use super::key::{generate_cache_key, CacheRequest};
use super::store::{CacheStore, CachedResponse};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

/// Freshly produced response with the tags of the data it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub tags: Vec<String>,
    /// Overrides the cache default when set.
    pub ttl: Option<Duration>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
            tags: Vec::new(),
            ttl: None,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    fn cacheable(&self) -> bool {
        self.status == 200
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit(CachedResponse),
    /// Produced and written under the returned key.
    Stored { key: String, response: CachedResponse },
    /// Produced without caching: unsafe method, non-200 status, or another
    /// caller holds the regeneration lock.
    Bypassed(CachedResponse),
}

impl CacheOutcome {
    pub fn response(&self) -> &CachedResponse {
        match self {
            Self::Hit(response) | Self::Bypassed(response) => response,
            Self::Stored { response, .. } => response,
        }
    }
}

pub struct HttpCache {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
}

impl HttpCache {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    pub fn lock_name(key: &str) -> String {
        format!("http_lock_{key}")
    }

    pub fn handle<F>(&self, request: &CacheRequest, produce: F) -> CacheOutcome
    where
        F: FnOnce() -> HttpResponse,
    {
        if !request.is_cacheable() {
            return CacheOutcome::Bypassed(into_cached(produce()));
        }

        let key = generate_cache_key(request);
        if let Some(hit) = self.store.lookup(&key) {
            debug!("event=cache_lookup module=cache status=ok hit=true");
            return CacheOutcome::Hit(hit);
        }

        let lock = Self::lock_name(&key);
        if !self.store.try_lock(&lock) {
            info!("event=cache_lock module=cache status=skip reason=locked");
            return CacheOutcome::Bypassed(into_cached(produce()));
        }

        let produced = produce();
        let outcome = if produced.cacheable() {
            let ttl = produced.ttl.unwrap_or(self.default_ttl);
            let tags = produced.tags.clone();
            let response = into_cached(produced);
            self.store.write(&key, response.clone(), &tags, ttl);
            debug!(
                "event=cache_write module=cache status=ok tags={} ttl_secs={}",
                tags.len(),
                ttl.as_secs()
            );
            CacheOutcome::Stored { key, response }
        } else {
            CacheOutcome::Bypassed(into_cached(produced))
        };
        self.store.unlock(&lock);
        outcome
    }
}

fn into_cached(response: HttpResponse) -> CachedResponse {
    CachedResponse {
        status: response.status,
        headers: response.headers,
        body: response.body,
    }
}
