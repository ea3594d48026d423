//! Delete resolution against cascade and restrict flags.
//!
//! # Responsibility
//! - Reject deletes blocked by restrict-delete associations, anywhere in
//!   the cascade tree, before any row is touched.
//! - Forecast every row the storage engine will remove by cascade, so the
//!   writer can verify the outcome and report snapshots in delete events.
//! - Check that declared flags agree with the storage engine's foreign keys.
//!
//! # Invariants
//! - Only root rows get a DELETE command; cascaded rows are left to the
//!   declared `ON DELETE CASCADE` actions.
//! - The forecast visits every row at most once, so cyclic trees terminate.

use super::command::{ConflictMode, PrimaryKey, WriteCommand, WriteOperation};
use super::{WriteError, WriteResult};
use crate::context::Context;
use crate::definition::field::to_camel_case;
use crate::definition::{DefinitionRegistry, EntityDefinition, FieldKind, JoinSpec};
use crate::query::quote;
use crate::value::{normalize_id, sql_to_json};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

type RawRow = BTreeMap<String, SqlValue>;

/// A row expected to disappear through a storage-level cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadedRow {
    pub entity: String,
    pub table: String,
    pub primary_key: PrimaryKey,
    pub event_id: String,
    pub snapshot: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct DeletePlan {
    /// One DELETE per existing root row.
    pub commands: Vec<WriteCommand>,
    /// Requested keys with no matching row.
    pub not_found: Vec<String>,
    pub cascaded: Vec<CascadedRow>,
}

pub struct DeleteResolver<'a> {
    conn: &'a Connection,
    registry: &'a DefinitionRegistry,
    context: &'a Context,
}

impl<'a> DeleteResolver<'a> {
    pub fn new(conn: &'a Connection, registry: &'a DefinitionRegistry, context: &'a Context) -> Self {
        Self {
            conn,
            registry,
            context,
        }
    }

    /// Accepts plain ids or `{id, versionId?}` objects.
    pub fn resolve(&self, definition: &EntityDefinition, keys: &[Value]) -> WriteResult<DeletePlan> {
        let definition = self.registry.get(&definition.name)?;
        let mut plan = DeletePlan::default();
        let mut visited = BTreeSet::new();

        for (index, raw) in keys.iter().enumerate() {
            let primary_key = self.primary_key(&definition, raw, index)?;
            let Some(row) = self.load_rows(&definition.name, &primary_key)?.into_iter().next() else {
                plan.not_found.push(primary_key.key());
                continue;
            };
            if !visited.insert((definition.name.clone(), primary_key.key())) {
                continue;
            }

            let id = primary_key.get("id").unwrap_or_default().to_string();
            self.check_restrict(&definition, &primary_key)?;
            self.forecast(&definition, &primary_key, &mut plan.cascaded, &mut visited)?;

            plan.commands.push(WriteCommand {
                entity: definition.name.clone(),
                table: definition.name.clone(),
                operation: WriteOperation::Delete,
                primary_key,
                data: Vec::new(),
                conflict: ConflictMode::Abort,
                event_id: id,
                payload: snapshot(Some(&definition), &row),
                depth: 0,
            });
        }

        Ok(plan)
    }

    fn primary_key(
        &self,
        definition: &EntityDefinition,
        raw: &Value,
        index: usize,
    ) -> WriteResult<PrimaryKey> {
        let invalid = |message: &str| WriteError::InvalidPayload {
            path: index.to_string(),
            message: message.to_string(),
        };
        let (id, version) = match raw {
            Value::String(id) => (id.as_str(), None),
            Value::Object(object) => (
                object
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid("delete key needs an `id`"))?,
                object.get("versionId").and_then(Value::as_str),
            ),
            _ => return Err(invalid("delete key must be an id or an object")),
        };

        let id = normalize_id(id).ok_or_else(|| invalid("expected hex id"))?;
        let mut key = PrimaryKey::new().with("id", id);
        if definition.is_versioned() {
            let version = match version {
                Some(version) => normalize_id(version).ok_or_else(|| invalid("expected hex version id"))?,
                None => self.context.version_id.clone(),
            };
            key = key.with("version_id", version);
        }
        Ok(key)
    }

    /// Fails when this row, or any row it cascades to, is restricted.
    fn check_restrict(&self, definition: &Arc<EntityDefinition>, primary_key: &PrimaryKey) -> WriteResult<()> {
        let mut pending = vec![(definition.clone(), primary_key.clone())];
        let mut seen = BTreeSet::new();

        while let Some((definition, primary_key)) = pending.pop() {
            if !seen.insert((definition.name.clone(), primary_key.key())) {
                continue;
            }
            for field in definition.associations() {
                if !(field.flags.restrict_delete || field.flags.cascade_delete) {
                    continue;
                }
                let association = self.registry.get_association(&definition.name, &field.property)?;
                let JoinSpec::ToMany {
                    reference_column,
                    version_column,
                } = &association.join
                else {
                    continue;
                };
                let filter = child_filter(reference_column, version_column.as_deref(), &primary_key);

                if field.flags.restrict_delete {
                    let child_count = self.count_rows(&association.target.name, &filter)?;
                    if child_count > 0 {
                        return Err(WriteError::RestrictedDelete {
                            entity: definition.name.clone(),
                            primary_key: primary_key.key(),
                            association: field.property.clone(),
                            child_entity: association.target.name.clone(),
                            child_count,
                        });
                    }
                    continue;
                }

                for child in self.load_rows(&association.target.name, &filter)? {
                    pending.push((association.target.clone(), row_key(&association.target, &child)));
                }
            }
        }
        Ok(())
    }

    fn forecast(
        &self,
        definition: &Arc<EntityDefinition>,
        primary_key: &PrimaryKey,
        out: &mut Vec<CascadedRow>,
        visited: &mut BTreeSet<(String, String)>,
    ) -> WriteResult<()> {
        let id = primary_key.get("id").unwrap_or_default().to_string();

        if let Some(translation) = definition.translation() {
            let filter = child_filter(
                &translation.parent_column,
                translation.parent_version_column.as_deref(),
                primary_key,
            );
            for row in self.load_rows(&translation.table, &filter)? {
                let mut key = filter.clone();
                if let Some(language) = row.get(&translation.language_column) {
                    key.0.push((translation.language_column.clone(), language.clone()));
                }
                out.push(CascadedRow {
                    entity: translation.table.clone(),
                    table: translation.table.clone(),
                    primary_key: key,
                    event_id: id.clone(),
                    snapshot: snapshot(None, &row),
                });
            }
        }

        for field in definition.associations() {
            if !field.flags.cascade_delete {
                continue;
            }
            let association = self.registry.get_association(&definition.name, &field.property)?;
            match &association.join {
                JoinSpec::ToMany {
                    reference_column,
                    version_column,
                } => {
                    let filter = child_filter(reference_column, version_column.as_deref(), primary_key);
                    for row in self.load_rows(&association.target.name, &filter)? {
                        let child_key = row_key(&association.target, &row);
                        if !visited.insert((association.target.name.clone(), child_key.key())) {
                            continue;
                        }
                        out.push(CascadedRow {
                            entity: association.target.name.clone(),
                            table: association.target.name.clone(),
                            primary_key: child_key.clone(),
                            event_id: child_key.get("id").unwrap_or_default().to_string(),
                            snapshot: snapshot(Some(&association.target), &row),
                        });
                        self.forecast(&association.target, &child_key, out, visited)?;
                    }
                }
                JoinSpec::Mapping {
                    mapping_table,
                    local_column,
                    local_version_column,
                    ..
                } => {
                    let filter =
                        child_filter(local_column, local_version_column.as_deref(), primary_key);
                    for row in self.load_rows(mapping_table, &filter)? {
                        let key = PrimaryKey(row.clone().into_iter().collect());
                        if !visited.insert((mapping_table.clone(), key.key())) {
                            continue;
                        }
                        out.push(CascadedRow {
                            entity: mapping_table.clone(),
                            table: mapping_table.clone(),
                            primary_key: key,
                            event_id: id.clone(),
                            snapshot: snapshot(None, &row),
                        });
                    }
                }
                JoinSpec::ToOne { .. } => {}
            }
        }
        Ok(())
    }

    fn load_rows(&self, table: &str, filter: &PrimaryKey) -> WriteResult<Vec<RawRow>> {
        load_rows(self.conn, table, filter)
    }

    fn count_rows(&self, table: &str, filter: &PrimaryKey) -> WriteResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                quote(table),
                filter.where_sql()
            ),
            params_from_iter(filter.values()),
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

/// Counts forecast rows that still exist, per entity.
pub(crate) fn surviving_rows(conn: &Connection, rows: &[CascadedRow]) -> WriteResult<BTreeMap<String, usize>> {
    let mut surviving = BTreeMap::new();
    for row in rows {
        let exists: i64 = conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE {})",
                quote(&row.table),
                row.primary_key.where_sql()
            ),
            params_from_iter(row.primary_key.values()),
            |result| result.get(0),
        )?;
        if exists == 1 {
            *surviving.entry(row.entity.clone()).or_insert(0) += 1;
        }
    }
    Ok(surviving)
}

fn load_rows(conn: &Connection, table: &str, filter: &PrimaryKey) -> WriteResult<Vec<RawRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM {} WHERE {}",
        quote(table),
        filter.where_sql()
    ))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|name| name.to_string()).collect();
    let mut rows = stmt.query(params_from_iter(filter.values()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut raw = RawRow::new();
        for (index, column) in columns.iter().enumerate() {
            raw.insert(column.clone(), row.get::<_, SqlValue>(index)?);
        }
        out.push(raw);
    }
    Ok(out)
}

fn child_filter(column: &str, version_column: Option<&str>, parent: &PrimaryKey) -> PrimaryKey {
    let mut filter = PrimaryKey::new().with(column, parent.get("id").unwrap_or_default());
    if let (Some(version_column), Some(version)) = (version_column, parent.get("version_id")) {
        filter = filter.with(version_column, version);
    }
    filter
}

fn row_key(definition: &EntityDefinition, row: &RawRow) -> PrimaryKey {
    PrimaryKey(
        definition
            .primary_key_columns()
            .into_iter()
            .map(|column| {
                (
                    column.to_string(),
                    row.get(column).cloned().unwrap_or(SqlValue::Null),
                )
            })
            .collect(),
    )
}

fn snapshot(definition: Option<&EntityDefinition>, row: &RawRow) -> Map<String, Value> {
    row.iter()
        .map(|(column, value)| {
            let field = definition.and_then(|definition| definition.field_by_storage(column));
            let property = field.map_or_else(|| to_camel_case(column), |field| field.property.clone());
            let value = sql_to_json(field.and_then(|field| field.scalar_kind()), ValueRef::from(value))
                .unwrap_or(Value::Null);
            (property, value)
        })
        .collect()
}

/// A declared delete flag that the storage schema does not enforce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractMismatch {
    pub entity: String,
    pub association: String,
    pub table: String,
    pub column: String,
    pub expected: &'static str,
    /// `ON DELETE` action found, `None` when no foreign key exists.
    pub actual: Option<String>,
}

/// Compares cascade/restrict flags and translation overlays with the
/// `ON DELETE` actions declared in the storage schema.
pub fn verify_storage_contract(
    conn: &Connection,
    registry: &DefinitionRegistry,
) -> WriteResult<Vec<ContractMismatch>> {
    let mut mismatches = Vec::new();

    for definition in registry.definitions() {
        let mut expectations = Vec::new();
        if let Some(translation) = definition.translation() {
            expectations.push((
                "translations".to_string(),
                translation.table.clone(),
                translation.parent_column.clone(),
                "CASCADE",
            ));
        }
        for field in definition.associations() {
            let expected = if field.flags.cascade_delete {
                "CASCADE"
            } else if field.flags.restrict_delete {
                "RESTRICT"
            } else {
                continue;
            };
            match &field.kind {
                FieldKind::OneToMany {
                    target,
                    reference_column,
                } => expectations.push((
                    field.property.clone(),
                    target.clone(),
                    reference_column.clone(),
                    expected,
                )),
                FieldKind::ManyToMany {
                    mapping_table,
                    local_column,
                    ..
                } => expectations.push((
                    field.property.clone(),
                    mapping_table.clone(),
                    local_column.clone(),
                    expected,
                )),
                _ => {}
            }
        }

        for (association, table, column, expected) in expectations {
            let actual = on_delete_action(conn, &table, &column, &definition.name)?;
            if actual.as_deref() != Some(expected) {
                mismatches.push(ContractMismatch {
                    entity: definition.name.clone(),
                    association,
                    table,
                    column,
                    expected,
                    actual,
                });
            }
        }
    }

    Ok(mismatches)
}

fn on_delete_action(
    conn: &Connection,
    table: &str,
    column: &str,
    parent: &str,
) -> WriteResult<Option<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quote(table)))?;
    let keys = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(keys
        .into_iter()
        .find(|(referenced, from, _)| referenced == parent && from == column)
        .map(|(_, _, on_delete)| on_delete.to_ascii_uppercase()))
}
