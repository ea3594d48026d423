//! Cache tagging and the HTTP cache flow built on it.
//!
//! # Responsibility
//! - Derive entity-granular cache tags from read results and write events.
//! - Derive context-aware HTTP cache keys.
//! - Define the cache store boundary and an in-memory implementation.
//!
//! # Invariants
//! - A tag is `<entity>-<id>`; the same tag is produced on read and on write
//!   for the same row.
//! - Cache keys ignore cookies other than the context hash and currency.
//!
//! # See also
//! - `event::EntityWrittenSubscriber` for how invalidation is triggered.

pub mod http;
pub mod invalidator;
pub mod key;
pub mod store;
pub mod tags;

pub use http::{CacheOutcome, HttpCache, HttpResponse};
pub use invalidator::CacheInvalidationSubscriber;
pub use key::{generate_cache_key, CacheRequest, CONTEXT_CACHE_COOKIE, CURRENCY_COOKIE};
pub use store::{CacheStore, CachedResponse, InMemoryCacheStore};
pub use tags::{context_tags, entity_tag, tags_for_entities, tags_for_written};
