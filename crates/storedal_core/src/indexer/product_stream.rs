//! Product stream filter indexer.
//!
//! # Responsibility
//! - Rebuild each stream's canonical `api_filter` from its stored filter rows.
//! - Mark streams whose stored tree has a broken node as invalid.
//!
//! # Invariants
//! - A stream is either `invalid = 0` with a canonical filter list, or
//!   `invalid = 1` with `api_filter = NULL`.
//! - State is re-derived from current rows on every run.

use super::id_extractor::ProductStreamIdExtractor;
use super::{DerivedState, IndexOutcome, IndexedRecord, IndexerResult, IndexingReport};
use crate::cache::{entity_tag, CacheStore};
use crate::criteria::{Filter, FilterError};
use crate::definition::DefinitionRegistry;
use crate::event::{EntityWrittenEvent, EntityWrittenSubscriber, SubscriberError};
use log::{debug, error, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

const ENTITY: &str = "product_stream";

struct FilterRow {
    id: String,
    parent_id: Option<String>,
    kind: String,
    field: Option<String>,
    operator: Option<String>,
    value: Option<String>,
    parameters: Option<String>,
}

pub struct ProductStreamIndexer {
    registry: DefinitionRegistry,
    cache: Option<Arc<dyn CacheStore>>,
}

impl ProductStreamIndexer {
    pub fn new(registry: DefinitionRegistry) -> Self {
        Self {
            registry,
            cache: None,
        }
    }

    /// Purges `product_stream-<id>` tags after each recompute.
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Recomputes the streams affected by committed write events.
    pub fn refresh(&self, conn: &Connection, events: &[EntityWrittenEvent]) -> IndexerResult<IndexingReport> {
        let ids = ProductStreamIdExtractor::new(&self.registry).product_stream_ids(conn, events)?;
        let ids: Vec<String> = ids.into_iter().collect();
        Ok(self.update(conn, &ids))
    }

    /// Recomputes the given streams, each independently.
    pub fn update(&self, conn: &Connection, ids: &[String]) -> IndexingReport {
        let mut report = IndexingReport::default();
        for id in ids {
            let outcome = self.index_one(conn, id);
            report.records.push(IndexedRecord {
                id: id.clone(),
                outcome,
            });
        }
        self.invalidate_cache(&report);
        report
    }

    /// Recomputes every stream, `batch_size` ids at a time in id order.
    pub fn index_all(&self, conn: &Connection, batch_size: usize) -> IndexerResult<IndexingReport> {
        let batch_size = batch_size.max(1);
        let mut report = IndexingReport::default();
        let mut last_id = String::new();
        let mut batch_no = 0usize;

        loop {
            let started_at = Instant::now();
            let ids = next_batch(conn, &last_id, batch_size)?;
            let Some(last) = ids.last() else {
                break;
            };
            last_id = last.clone();
            batch_no += 1;

            let batch = self.update(conn, &ids);
            info!(
                "event=stream_index_batch module=indexer status=ok batch={} size={} valid={} invalid={} failed={} duration_ms={}",
                batch_no,
                batch.len(),
                batch.valid_count(),
                batch.invalid_count(),
                batch.failed_count(),
                started_at.elapsed().as_millis()
            );
            report.extend(batch);

            if ids.len() < batch_size {
                break;
            }
        }
        Ok(report)
    }

    fn index_one(&self, conn: &Connection, id: &str) -> IndexOutcome {
        let started_at = Instant::now();
        match recompute(conn, id) {
            Ok((previous, outcome)) => {
                match (&outcome, outcome.state()) {
                    (IndexOutcome::Invalid { reason }, Some(state)) => info!(
                        "event=stream_index module=indexer status=ok id={} from={} to={} reason=\"{}\" duration_ms={}",
                        id,
                        previous.map_or("none", DerivedState::as_str),
                        state.as_str(),
                        reason,
                        started_at.elapsed().as_millis()
                    ),
                    (_, Some(state)) => debug!(
                        "event=stream_index module=indexer status=ok id={} from={} to={} duration_ms={}",
                        id,
                        previous.map_or("none", DerivedState::as_str),
                        state.as_str(),
                        started_at.elapsed().as_millis()
                    ),
                    _ => debug!(
                        "event=stream_index module=indexer status=skip id={} reason=missing",
                        id
                    ),
                }
                outcome
            }
            Err(err) => {
                error!(
                    "event=stream_index module=indexer status=error id={} duration_ms={} error={}",
                    id,
                    started_at.elapsed().as_millis(),
                    err
                );
                IndexOutcome::Failed {
                    message: err.to_string(),
                }
            }
        }
    }

    fn invalidate_cache(&self, report: &IndexingReport) {
        let Some(cache) = &self.cache else {
            return;
        };
        let tags: Vec<String> = report
            .records
            .iter()
            .filter(|record| record.outcome.state().is_some())
            .map(|record| entity_tag(ENTITY, &record.id))
            .collect();
        if !tags.is_empty() {
            let removed = cache.invalidate(&tags);
            info!(
                "event=cache_invalidate module=indexer status=ok tags={} removed={}",
                tags.len(),
                removed
            );
        }
    }
}

impl EntityWrittenSubscriber for ProductStreamIndexer {
    fn name(&self) -> &str {
        "product_stream_indexer"
    }

    fn on_entity_written(
        &self,
        conn: &Connection,
        events: &[EntityWrittenEvent],
    ) -> Result<(), SubscriberError> {
        self.refresh(conn, events)
            .map(|_| ())
            .map_err(|err| SubscriberError::new(self.name(), err.to_string()))
    }
}

/// Returns the previous state and the outcome that was persisted.
fn recompute(conn: &Connection, id: &str) -> rusqlite::Result<(Option<DerivedState>, IndexOutcome)> {
    let previous: Option<bool> = conn
        .query_row(
            "SELECT invalid FROM product_stream WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(previous) = previous.map(DerivedState::from_invalid_flag) else {
        return Ok((None, IndexOutcome::Missing));
    };
    debug!(
        "event=stream_index module=indexer status=start id={} from={} to={}",
        id,
        previous.as_str(),
        DerivedState::Computing.as_str()
    );

    let rows = load_filter_rows(conn, id)?;
    let filters = Filter::list_from_api(&Value::Array(build_nodes(&rows)));

    let outcome = match Filter::list_to_api(&filters) {
        Ok(api_filter) => {
            conn.execute(
                "UPDATE product_stream SET api_filter = ?1, invalid = 0 WHERE id = ?2",
                params![api_filter.to_string(), id],
            )?;
            IndexOutcome::Valid
        }
        Err(FilterError::InvalidNode { reason }) => {
            conn.execute(
                "UPDATE product_stream SET api_filter = NULL, invalid = 1 WHERE id = ?1",
                params![id],
            )?;
            IndexOutcome::Invalid { reason }
        }
    };
    Ok((Some(previous), outcome))
}

fn load_filter_rows(conn: &Connection, stream_id: &str) -> rusqlite::Result<Vec<FilterRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, parent_id, type, field, operator, value, parameters
         FROM product_stream_filter
         WHERE product_stream_id = ?1
         ORDER BY position ASC, id ASC",
    )?;
    let rows = stmt
        .query_map(params![stream_id], |row| {
            Ok(FilterRow {
                id: row.get(0)?,
                parent_id: row.get(1)?,
                kind: row.get(2)?,
                field: row.get(3)?,
                operator: row.get(4)?,
                value: row.get(5)?,
                parameters: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Rebuilds persisted nodes from flat rows; rows whose parent is not part
/// of the stream are unreachable and ignored.
fn build_nodes(rows: &[FilterRow]) -> Vec<Value> {
    let mut children: BTreeMap<Option<&str>, Vec<&FilterRow>> = BTreeMap::new();
    for row in rows {
        children.entry(row.parent_id.as_deref()).or_default().push(row);
    }
    children
        .get(&None)
        .map(|roots| roots.iter().map(|row| node(row, &children)).collect())
        .unwrap_or_default()
}

fn node(row: &FilterRow, children: &BTreeMap<Option<&str>, Vec<&FilterRow>>) -> Value {
    let mut object = Map::new();
    object.insert("type".to_string(), Value::String(row.kind.clone()));
    let optional = [
        ("field", &row.field),
        ("operator", &row.operator),
        ("value", &row.value),
        ("parameters", &row.parameters),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            object.insert(key.to_string(), Value::String(value.clone()));
        }
    }
    if let Some(nested) = children.get(&Some(row.id.as_str())) {
        object.insert(
            "queries".to_string(),
            Value::Array(nested.iter().map(|child| node(child, children)).collect()),
        );
    }
    Value::Object(object)
}

fn next_batch(conn: &Connection, after: &str, batch_size: usize) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM product_stream WHERE id > ?1 ORDER BY id ASC LIMIT ?2")?;
    let ids = stmt
        .query_map(
            params![after, i64::try_from(batch_size).unwrap_or(i64::MAX)],
            |row| row.get(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::{build_nodes, FilterRow};
    use serde_json::json;

    fn row(id: &str, parent: Option<&str>, kind: &str) -> FilterRow {
        FilterRow {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            kind: kind.to_string(),
            field: None,
            operator: None,
            value: None,
            parameters: None,
        }
    }

    #[test]
    fn nodes_nest_under_their_parent() {
        let mut leaf = row("b", Some("a"), "equals");
        leaf.field = Some("product.id".to_string());
        leaf.value = Some("x".to_string());
        let nodes = build_nodes(&[row("a", None, "multi"), leaf]);

        assert_eq!(
            nodes,
            vec![json!({
                "type": "multi",
                "queries": [{"type": "equals", "field": "product.id", "value": "x"}]
            })]
        );
    }

    #[test]
    fn rows_with_foreign_parents_are_ignored() {
        let nodes = build_nodes(&[row("a", None, "multi"), row("c", Some("zz"), "equals")]);
        assert_eq!(nodes, vec![json!({"type": "multi"})]);
    }
}
