//! Search execution.
//!
//! # Responsibility
//! - Execute planned queries and hydrate entities.
//! - Load requested to-many associations with one follow-up search per
//!   association level.
//!
//! # Invariants
//! - The count query runs first; zero matches short-circuit to an empty
//!   result.
//! - Nested limit/offset apply per owner, not to the follow-up search.

use super::entity::{Entity, SearchResult};
use super::hydrator::hydrate_row;
use super::planner::{placeholders, quote, QueryPlanner, ToManyLoad};
use super::{QueryError, QueryResult};
use crate::context::Context;
use crate::criteria::{Criteria, Filter};
use crate::definition::{DefinitionRegistry, EntityDefinition, JoinSpec};
use log::{debug, info};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Read API over one connection.
pub struct EntityReader<'a> {
    conn: &'a Connection,
    registry: &'a DefinitionRegistry,
    context: &'a Context,
}

impl<'a> EntityReader<'a> {
    pub fn new(conn: &'a Connection, registry: &'a DefinitionRegistry, context: &'a Context) -> Self {
        Self {
            conn,
            registry,
            context,
        }
    }

    pub fn search(&self, entity: &str, criteria: &Criteria) -> QueryResult<SearchResult> {
        let started_at = Instant::now();
        let definition = self.registry.get(entity)?;
        let plan = QueryPlanner::new(self.registry, self.context).plan(&definition, criteria)?;

        let total: i64 = self.conn.query_row(
            &plan.count_sql,
            params_from_iter(plan.count_params.iter()),
            |row| row.get(0),
        )?;
        if total == 0 {
            debug!(
                "event=entity_search module=query status=ok entity={} total=0 duration_ms={}",
                definition.name,
                started_at.elapsed().as_millis()
            );
            return Ok(SearchResult::default());
        }

        let mut stmt = self.conn.prepare(&plan.sql)?;
        let mut rows = stmt.query(params_from_iter(plan.params.iter()))?;
        let mut objects = Vec::new();
        while let Some(row) = rows.next()? {
            objects.push(hydrate_row(row, &plan.columns)?);
        }

        for load in &plan.to_many {
            self.load_to_many(&mut objects, load)?;
        }

        let entities: Vec<Entity> = objects
            .into_iter()
            .map(|values| Entity::new(definition.clone(), values))
            .collect();

        info!(
            "event=entity_search module=query status=ok entity={} total={} returned={} associations={} duration_ms={}",
            definition.name,
            total,
            entities.len(),
            plan.to_many.len(),
            started_at.elapsed().as_millis()
        );

        Ok(SearchResult {
            total: u64::try_from(total).unwrap_or_default(),
            entities,
        })
    }

    /// Ids of matching entities only, without hydration of associations.
    pub fn search_ids(&self, entity: &str, criteria: &Criteria) -> QueryResult<Vec<String>> {
        let mut criteria = criteria.clone();
        criteria.associations.clear();
        Ok(self
            .search(entity, &criteria)?
            .entities
            .iter()
            .filter_map(|entity| entity.id().map(str::to_string))
            .collect())
    }

    fn load_to_many(&self, objects: &mut [Map<String, Value>], load: &ToManyLoad) -> QueryResult<()> {
        let mut owners: Vec<&mut Map<String, Value>> = objects
            .iter_mut()
            .filter_map(|object| owner_at(object, &load.owner_path))
            .collect();
        let owner_ids: BTreeSet<String> = owners
            .iter()
            .filter_map(|owner| owner.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();
        if owner_ids.is_empty() {
            return Ok(());
        }

        let mut nested = load.criteria.clone();
        let limit = nested.limit.take();
        let offset = std::mem::take(&mut nested.offset);
        let target = &load.association.target;

        let grouped: BTreeMap<String, Vec<Value>> = match &load.association.join {
            JoinSpec::ToMany {
                reference_column,
                version_column,
            } => {
                let reference_property = property_of(target, reference_column)?;
                nested.add_filter(Filter::equals_any(
                    reference_property.clone(),
                    owner_ids.iter().cloned(),
                ));
                if let Some(column) = version_column {
                    nested.add_filter(Filter::equals(
                        property_of(target, column)?,
                        self.context.version_id.clone(),
                    ));
                }

                let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
                for entity in self.search(&target.name, &nested)?.entities {
                    if let Some(owner_id) = entity.get_str(&reference_property).map(str::to_string) {
                        grouped
                            .entry(owner_id)
                            .or_default()
                            .push(Value::Object(entity.values));
                    }
                }
                grouped
            }
            JoinSpec::Mapping {
                mapping_table,
                local_column,
                local_version_column,
                reference_column,
                ..
            } => {
                let links = self.mapping_links(
                    mapping_table,
                    local_column,
                    local_version_column.as_deref(),
                    reference_column,
                    &owner_ids,
                )?;
                let target_ids: BTreeSet<&str> =
                    links.iter().map(|(_, target_id)| target_id.as_str()).collect();
                if target_ids.is_empty() {
                    BTreeMap::new()
                } else {
                    nested.add_filter(Filter::equals_any("id", target_ids.iter().copied()));
                    let result = self.search(&target.name, &nested)?;
                    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
                    for entity in &result.entities {
                        let Some(target_id) = entity.id() else {
                            continue;
                        };
                        for (owner_id, linked) in &links {
                            if linked == target_id {
                                grouped
                                    .entry(owner_id.clone())
                                    .or_default()
                                    .push(Value::Object(entity.values.clone()));
                            }
                        }
                    }
                    grouped
                }
            }
            JoinSpec::ToOne { .. } => {
                return Err(QueryError::InvalidData(format!(
                    "`{}` is not a to-many association",
                    load.association.property()
                )))
            }
        };

        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = limit.map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
        for owner in owners.iter_mut() {
            let items = owner
                .get("id")
                .and_then(Value::as_str)
                .and_then(|id| grouped.get(id))
                .map(|items| items.iter().skip(skip).take(take).cloned().collect())
                .unwrap_or_default();
            owner.insert(
                load.association.property().to_string(),
                Value::Array(items),
            );
        }

        Ok(())
    }

    fn mapping_links(
        &self,
        mapping_table: &str,
        local_column: &str,
        local_version_column: Option<&str>,
        reference_column: &str,
        owner_ids: &BTreeSet<String>,
    ) -> QueryResult<Vec<(String, String)>> {
        let mut sql = format!(
            "SELECT {local}, {reference} FROM {table} WHERE {local} IN ({})",
            placeholders(owner_ids.len()),
            local = quote(local_column),
            reference = quote(reference_column),
            table = quote(mapping_table),
        );
        let mut bind_values: Vec<SqlValue> = owner_ids
            .iter()
            .map(|id| SqlValue::Text(id.clone()))
            .collect();
        if let Some(column) = local_version_column {
            sql.push_str(&format!(" AND {} = ?", quote(column)));
            bind_values.push(SqlValue::Text(self.context.version_id.clone()));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let links = stmt
            .query_map(params_from_iter(bind_values), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }
}

fn owner_at<'o>(
    object: &'o mut Map<String, Value>,
    path: &[String],
) -> Option<&'o mut Map<String, Value>> {
    let mut current = object;
    for segment in path {
        current = current.get_mut(segment)?.as_object_mut()?;
    }
    Some(current)
}

fn property_of(definition: &EntityDefinition, storage: &str) -> QueryResult<String> {
    definition
        .field_by_storage(storage)
        .map(|field| field.property.clone())
        .ok_or_else(|| {
            QueryError::InvalidData(format!(
                "`{}` has no column `{storage}`",
                definition.name
            ))
        })
}
