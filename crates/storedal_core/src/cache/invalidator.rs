//! Write-event driven cache invalidation.

use super::store::CacheStore;
use super::tags::tags_for_written;
use crate::definition::DefinitionRegistry;
use crate::event::{EntityWrittenEvent, EntityWrittenSubscriber, SubscriberError};
use log::info;
use rusqlite::Connection;
use std::sync::Arc;

pub struct CacheInvalidationSubscriber {
    registry: DefinitionRegistry,
    store: Arc<dyn CacheStore>,
}

impl CacheInvalidationSubscriber {
    pub fn new(registry: DefinitionRegistry, store: Arc<dyn CacheStore>) -> Self {
        Self { registry, store }
    }
}

impl EntityWrittenSubscriber for CacheInvalidationSubscriber {
    fn name(&self) -> &str {
        "cache_invalidation"
    }

    fn on_entity_written(
        &self,
        _conn: &Connection,
        events: &[EntityWrittenEvent],
    ) -> Result<(), SubscriberError> {
        let tags = tags_for_written(&self.registry, events);
        if tags.is_empty() {
            return Ok(());
        }
        let removed = self.store.invalidate(&tags);
        info!(
            "event=cache_invalidate module=cache status=ok source=write tags={} removed={}",
            tags.len(),
            removed
        );
        Ok(())
    }
}
