//! Maps write events to the product streams that need recomputation.
//!
//! Writes to streams and their filters name the stream directly; a filter
//! moved to another stream also names the stream it left. Writes to
//! any other entity are matched against the field paths stored in filter
//! rows: `<entity>.<property>`, the bare property for products, and one
//! association hop (`product.manufacturer.name`). This is a best-effort
//! match on stored text, not a foreign key.

use super::IndexerResult;
use crate::definition::{DefinitionRegistry, EntityDefinition};
use crate::event::EntityWrittenEvent;
use crate::query::{placeholders, quote};
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use std::collections::BTreeSet;

const STREAM: &str = "product_stream";
const STREAM_TRANSLATION: &str = "product_stream_translation";
const STREAM_FILTER: &str = "product_stream_filter";
const PRODUCT: &str = "product";

pub struct ProductStreamIdExtractor<'a> {
    registry: &'a DefinitionRegistry,
}

impl<'a> ProductStreamIdExtractor<'a> {
    pub fn new(registry: &'a DefinitionRegistry) -> Self {
        Self { registry }
    }

    pub fn product_stream_ids(
        &self,
        conn: &Connection,
        events: &[EntityWrittenEvent],
    ) -> IndexerResult<BTreeSet<String>> {
        let mut ids = BTreeSet::new();
        let mut filter_ids = Vec::new();
        let mut field_paths = BTreeSet::new();

        for event in events {
            match event.entity_name.as_str() {
                STREAM | STREAM_TRANSLATION => ids.extend(event.ids.iter().cloned()),
                STREAM_FILTER => {
                    let from_payloads: Vec<&str> = event
                        .payloads
                        .iter()
                        .filter_map(|payload| payload.get("productStreamId").and_then(Value::as_str))
                        .collect();
                    ids.extend(from_payloads.iter().map(|id| id.to_string()));
                    ids.extend(
                        event
                            .replaced_references
                            .iter()
                            .filter_map(|stored| stored.get("productStreamId").and_then(Value::as_str))
                            .map(str::to_string),
                    );
                    if from_payloads.len() < event.ids.len() {
                        filter_ids.extend(event.ids.iter().cloned());
                    }
                }
                entity => self.collect_field_paths(entity, event, &mut field_paths),
            }
        }

        if !filter_ids.is_empty() {
            ids.extend(select_stream_ids(conn, "id", &filter_ids)?);
        }
        if !field_paths.is_empty() {
            let field_paths: Vec<String> = field_paths.into_iter().collect();
            ids.extend(select_stream_ids(conn, "field", &field_paths)?);
        }
        Ok(ids)
    }

    fn collect_field_paths(
        &self,
        entity: &str,
        event: &EntityWrittenEvent,
        paths: &mut BTreeSet<String>,
    ) {
        let Some(definition) = self.owning_definition(entity) else {
            return;
        };
        let properties: BTreeSet<&str> = event
            .payloads
            .iter()
            .flat_map(|payload| payload.keys().map(String::as_str))
            .collect();

        for property in &properties {
            paths.insert(format!("{}.{property}", definition.name));
            if definition.name == PRODUCT {
                paths.insert(property.to_string());
            }
        }

        for owner in self.registry.definitions() {
            for field in owner.associations() {
                if field.association_target() != Some(definition.name.as_str()) {
                    continue;
                }
                for property in &properties {
                    paths.insert(format!("{}.{}.{property}", owner.name, field.property));
                    if owner.name == PRODUCT {
                        paths.insert(format!("{}.{property}", field.property));
                    }
                }
            }
        }
    }

    /// Translation tables report their owner's field paths.
    fn owning_definition(&self, entity: &str) -> Option<&EntityDefinition> {
        self.registry
            .definitions()
            .find(|definition| {
                definition.name == entity
                    || definition
                        .translation()
                        .is_some_and(|translation| translation.table == entity)
            })
            .map(|definition| definition.as_ref())
    }
}

fn select_stream_ids(
    conn: &Connection,
    column: &str,
    values: &[String],
) -> IndexerResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT product_stream_id FROM {} WHERE {} IN ({})",
        quote(STREAM_FILTER),
        quote(column),
        placeholders(values.len())
    ))?;
    let ids = stmt
        .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::ProductStreamIdExtractor;
    use crate::context::Context;
    use crate::db::open_db_in_memory;
    use crate::definition::catalog;
    use crate::event::{EntityWrittenEvent, WriteKind};
    use serde_json::json;

    #[test]
    fn stream_events_name_streams_directly() {
        let conn = open_db_in_memory().unwrap();
        let registry = catalog::registry();
        let mut event = EntityWrittenEvent::new("product_stream", WriteKind::Written, Context::default());
        event.push("a".repeat(32), Default::default());

        let ids = ProductStreamIdExtractor::new(&registry)
            .product_stream_ids(&conn, &[event])
            .unwrap();
        assert!(ids.contains(&"a".repeat(32)));
    }

    #[test]
    fn filter_payloads_carry_their_stream() {
        let conn = open_db_in_memory().unwrap();
        let registry = catalog::registry();
        let mut event =
            EntityWrittenEvent::new("product_stream_filter", WriteKind::Deleted, Context::default());
        let payload = json!({"id": "f".repeat(32), "productStreamId": "b".repeat(32)});
        event.push("f".repeat(32), payload.as_object().cloned().unwrap_or_default());

        let ids = ProductStreamIdExtractor::new(&registry)
            .product_stream_ids(&conn, &[event])
            .unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["b".repeat(32)]);
    }
}
