//! Cache tag derivation.
//!
//! Reads tag every row they hydrate, including translation overlays and
//! many-to-many links. Writes produce the same tags from the event ids, so
//! invalidating the write tags purges every cached read that saw the row.

use crate::context::Context;
use crate::definition::{DefinitionRegistry, EntityDefinition, FieldKind};
use crate::event::EntityWrittenEvent;
use crate::query::Entity;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

pub fn entity_tag(entity: &str, id: &str) -> String {
    format!("{entity}-{id}")
}

/// Tags for the context dimensions a response was rendered in.
pub fn context_tags(context: &Context) -> Vec<String> {
    let mut tags: Vec<String> = context
        .language_chain
        .iter()
        .map(|language| entity_tag("language", language))
        .collect();
    tags.push(entity_tag("currency", &context.currency_id));
    if let Some(sales_channel) = &context.sales_channel_id {
        tags.push(entity_tag("sales_channel", sales_channel));
    }
    tags
}

/// Minimal tag set that must invalidate a response built from `entities`.
pub fn tags_for_entities(
    registry: &DefinitionRegistry,
    entities: &[Entity],
    context: &Context,
) -> Vec<String> {
    let mut tags = BTreeSet::new();
    for entity in entities {
        collect_entity_tags(registry, &entity.definition, &entity.values, &mut tags);
    }
    tags.extend(context_tags(context));
    tags.into_iter().collect()
}

fn collect_entity_tags(
    registry: &DefinitionRegistry,
    definition: &EntityDefinition,
    values: &Map<String, Value>,
    tags: &mut BTreeSet<String>,
) {
    let Some(id) = values.get("id").and_then(Value::as_str) else {
        return;
    };
    tags.insert(entity_tag(&definition.name, id));
    if let Some(translation) = definition.translation() {
        tags.insert(entity_tag(&translation.table, id));
    }

    for field in definition.associations() {
        let Some(target) = field
            .association_target()
            .and_then(|target| registry.get(target).ok())
        else {
            continue;
        };
        match values.get(&field.property) {
            Some(Value::Object(nested)) => collect_entity_tags(registry, &target, nested, tags),
            Some(Value::Array(items)) => {
                if let FieldKind::ManyToMany { mapping_table, .. } = &field.kind {
                    tags.insert(entity_tag(mapping_table, id));
                }
                for nested in items.iter().filter_map(Value::as_object) {
                    collect_entity_tags(registry, &target, nested, tags);
                }
            }
            _ => {}
        }
    }
}

/// Tags touched by committed write events.
///
/// Mapping rows are tagged with both linked ids, so a link written from
/// either side purges reads from both sides.
pub fn tags_for_written(registry: &DefinitionRegistry, events: &[EntityWrittenEvent]) -> Vec<String> {
    let mapping_tables: BTreeSet<&str> = registry
        .definitions()
        .flat_map(|definition| definition.associations())
        .filter_map(|field| match &field.kind {
            FieldKind::ManyToMany { mapping_table, .. } => Some(mapping_table.as_str()),
            _ => None,
        })
        .collect();

    let mut tags = BTreeSet::new();
    for event in events {
        for id in &event.ids {
            tags.insert(entity_tag(&event.entity_name, id));
        }
        if !mapping_tables.contains(event.entity_name.as_str()) {
            continue;
        }
        for payload in &event.payloads {
            for (property, value) in payload {
                let linked_id = property.ends_with("Id") && !property.ends_with("VersionId");
                if let (true, Some(id)) = (linked_id, value.as_str()) {
                    tags.insert(entity_tag(&event.entity_name, id));
                }
            }
        }
    }
    tags.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::{context_tags, entity_tag, tags_for_written};
    use crate::context::Context;
    use crate::definition::catalog;
    use crate::event::{EntityWrittenEvent, WriteKind};
    use serde_json::json;

    #[test]
    fn context_tags_cover_language_chain_and_currency() {
        let context = Context::default().with_sales_channel("s1");
        let tags = context_tags(&context);
        assert!(tags.contains(&entity_tag("language", &context.language_chain[0])));
        assert!(tags.contains(&entity_tag("currency", &context.currency_id)));
        assert!(tags.contains(&"sales_channel-s1".to_string()));
    }

    #[test]
    fn mapping_events_tag_both_sides() {
        let mut event = EntityWrittenEvent::new("product_category", WriteKind::Written, Context::default());
        let payload = json!({"productId": "p1", "productVersionId": "v", "categoryId": "c1"});
        event.push("p1".to_string(), payload.as_object().cloned().unwrap_or_default());

        let tags = tags_for_written(&catalog::registry(), &[event]);
        assert_eq!(tags, vec!["product_category-c1", "product_category-p1"]);
    }
}
