//! Nested payload expansion into ordered row commands.
//!
//! # Responsibility
//! - Turn nested payloads into row commands: many-to-one parents first,
//!   then the row, its translation overlays, one-to-many children and
//!   many-to-many links.
//!
//! # Invariants
//! - A command never precedes the commands of rows it references.
//! - Root rows honour the caller's write mode; nested rows are upserted.
//! - Child rows of a versioned parent reference the parent's version id.
//! - A row planned twice in one call is inserted once and updated after.

use super::command::{ConflictMode, PrimaryKey, WriteCommand, WriteMode, WriteOperation};
use super::{WriteError, WriteResult};
use crate::context::{now_epoch_ms, random_id, Context};
use crate::definition::field::{to_camel_case, version_column_for, CREATED_AT, UPDATED_AT};
use crate::definition::{
    DefinitionError, DefinitionRegistry, EntityDefinition, FieldKind, JoinSpec, ScalarKind,
};
use crate::query::quote;
use crate::value::{json_to_sql, sql_to_json};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Payload key holding explicit per-language translated values.
pub const TRANSLATIONS_KEY: &str = "translations";

struct PlannedRow {
    id: String,
    version: Option<String>,
    data: BTreeMap<String, SqlValue>,
}

pub struct WriteCommandPlanner<'a> {
    conn: &'a Connection,
    registry: &'a DefinitionRegistry,
    context: &'a Context,
    commands: Vec<WriteCommand>,
    planned: BTreeSet<(String, String)>,
    now: i64,
}

impl<'a> WriteCommandPlanner<'a> {
    pub fn new(conn: &'a Connection, registry: &'a DefinitionRegistry, context: &'a Context) -> Self {
        Self {
            conn,
            registry,
            context,
            commands: Vec::new(),
            planned: BTreeSet::new(),
            now: now_epoch_ms(),
        }
    }

    /// Plans every payload of one write call into a single ordered list.
    pub fn plan(
        mut self,
        definition: &EntityDefinition,
        payloads: &[Value],
        mode: WriteMode,
    ) -> WriteResult<Vec<WriteCommand>> {
        let definition = self.registry.get(&definition.name)?;
        for (index, payload) in payloads.iter().enumerate() {
            let path = index.to_string();
            let object = payload.as_object().ok_or_else(|| WriteError::InvalidPayload {
                path: path.clone(),
                message: "expected an object".to_string(),
            })?;
            self.plan_row(&definition, object, mode, &[], &path, 0)?;
        }
        Ok(self.commands)
    }

    fn plan_row(
        &mut self,
        definition: &Arc<EntityDefinition>,
        payload: &Map<String, Value>,
        mode: WriteMode,
        inherited: &[(String, SqlValue)],
        path: &str,
        depth: usize,
    ) -> WriteResult<PlannedRow> {
        for key in payload.keys() {
            let known = definition.field(key).is_some()
                || (key == TRANSLATIONS_KEY && definition.translation().is_some());
            if !known {
                return Err(DefinitionError::UnknownField {
                    entity: definition.name.clone(),
                    field: key.clone(),
                }
                .into());
            }
        }

        let id = match payload.get("id") {
            Some(value) if !value.is_null() => id_value(value, &format!("{path}.id"))?,
            _ => random_id(),
        };
        let version = if definition.is_versioned() {
            Some(match payload.get("versionId") {
                Some(value) if !value.is_null() => id_value(value, &format!("{path}.versionId"))?,
                _ => self.context.version_id.clone(),
            })
        } else {
            None
        };

        let mut primary_key = PrimaryKey::new().with("id", id.clone());
        if let Some(version) = &version {
            primary_key = primary_key.with("version_id", version.clone());
        }

        let planned_key = (definition.name.clone(), primary_key.key());
        let exists =
            self.planned.contains(&planned_key) || self.row_exists(&definition.name, &primary_key)?;
        let operation = match (mode, exists) {
            (WriteMode::Insert, _) => WriteOperation::Insert,
            (WriteMode::Update, false) => {
                return Err(WriteError::NotFound {
                    entity: definition.name.clone(),
                    primary_key: primary_key.key(),
                })
            }
            (WriteMode::Update | WriteMode::Upsert, true) => WriteOperation::Update,
            (WriteMode::Upsert, false) => WriteOperation::Insert,
        };
        self.planned.insert(planned_key);

        let mut data = BTreeMap::new();
        self.plan_parents(definition, payload, &mut data, path, depth)?;

        for field in definition.stored_fields() {
            if field.flags.primary_key {
                continue;
            }
            let Some(value) = payload.get(&field.property) else {
                continue;
            };
            let kind = field.scalar_kind().unwrap_or(ScalarKind::String);
            let stored = json_to_sql(kind, value).map_err(|message| WriteError::InvalidPayload {
                path: format!("{path}.{}", field.property),
                message,
            })?;
            data.insert(field.storage.clone(), stored);

            if let FieldKind::Fk { target } = &field.kind {
                let version_column = version_column_for(&field.storage);
                if self.registry.get(target)?.is_versioned()
                    && definition.field_by_storage(&version_column).is_some()
                    && !value.is_null()
                {
                    data.entry(version_column)
                        .or_insert_with(|| SqlValue::Text(self.context.version_id.clone()));
                }
            }
        }

        for (column, value) in inherited {
            data.insert(column.clone(), value.clone());
        }

        match operation {
            WriteOperation::Insert if definition.field_by_storage(CREATED_AT).is_some() => {
                data.entry(CREATED_AT.to_string())
                    .or_insert(SqlValue::Integer(self.now));
            }
            WriteOperation::Update if definition.field_by_storage(UPDATED_AT).is_some() => {
                data.insert(UPDATED_AT.to_string(), SqlValue::Integer(self.now));
            }
            _ => {}
        }

        let translations = collect_translations(definition, payload, self.context, path)?;
        check_required(definition, operation, &data, &translations, path)?;

        self.commands.push(WriteCommand {
            entity: definition.name.clone(),
            table: definition.name.clone(),
            operation,
            primary_key: primary_key.clone(),
            data: data.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            conflict: ConflictMode::Abort,
            event_id: id.clone(),
            payload: row_payload(definition, &primary_key, &data),
            depth,
        });

        if let Some(translation) = definition.translation() {
            for (language_id, columns) in translations {
                let mut key = PrimaryKey::new().with(translation.parent_column.clone(), id.clone());
                if let (Some(column), Some(version)) = (&translation.parent_version_column, &version) {
                    key = key.with(column.clone(), version.clone());
                }
                key = key.with(translation.language_column.clone(), language_id.clone());

                let mut event_payload = Map::new();
                event_payload.insert("languageId".to_string(), Value::String(language_id));
                for (column, value) in &columns {
                    let kind = definition
                        .translated_fields()
                        .find(|field| &field.storage == column)
                        .and_then(|field| field.scalar_kind());
                    event_payload.insert(
                        to_camel_case(column),
                        sql_to_json(kind, ValueRef::from(value)).unwrap_or(Value::Null),
                    );
                }

                self.commands.push(WriteCommand {
                    entity: translation.table.clone(),
                    table: translation.table.clone(),
                    operation: WriteOperation::Upsert,
                    primary_key: key,
                    data: columns.into_iter().collect(),
                    conflict: ConflictMode::Abort,
                    event_id: id.clone(),
                    payload: event_payload,
                    depth,
                });
            }
        }

        let row = PlannedRow { id, version, data };
        self.plan_children(definition, payload, &row, path, depth)?;
        Ok(row)
    }

    /// Plans inline many-to-one parents and points the fk columns at them.
    fn plan_parents(
        &mut self,
        definition: &Arc<EntityDefinition>,
        payload: &Map<String, Value>,
        data: &mut BTreeMap<String, SqlValue>,
        path: &str,
        depth: usize,
    ) -> WriteResult<()> {
        for field in definition.associations() {
            if !matches!(field.kind, FieldKind::ManyToOne { .. }) {
                continue;
            }
            let Some(value) = payload.get(&field.property) else {
                continue;
            };
            let association = self.registry.get_association(&definition.name, &field.property)?;
            let JoinSpec::ToOne {
                local_column,
                version_column,
            } = &association.join
            else {
                continue;
            };

            match value {
                Value::Null => {
                    data.insert(local_column.clone(), SqlValue::Null);
                    if let Some(column) = version_column {
                        data.insert(column.clone(), SqlValue::Null);
                    }
                }
                Value::Object(parent) => {
                    let parent_row = self.plan_row(
                        &association.target,
                        parent,
                        WriteMode::Upsert,
                        &[],
                        &format!("{path}.{}", field.property),
                        depth + 1,
                    )?;
                    data.insert(local_column.clone(), SqlValue::Text(parent_row.id));
                    if let (Some(column), Some(version)) = (version_column, parent_row.version) {
                        data.insert(column.clone(), SqlValue::Text(version));
                    }
                }
                _ => {
                    return Err(WriteError::InvalidPayload {
                        path: format!("{path}.{}", field.property),
                        message: "expected an object or null".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    fn plan_children(
        &mut self,
        definition: &Arc<EntityDefinition>,
        payload: &Map<String, Value>,
        row: &PlannedRow,
        path: &str,
        depth: usize,
    ) -> WriteResult<()> {
        for field in definition.associations() {
            if !field.is_to_many() {
                continue;
            }
            let Some(value) = payload.get(&field.property) else {
                continue;
            };
            let items = value.as_array().ok_or_else(|| WriteError::InvalidPayload {
                path: format!("{path}.{}", field.property),
                message: "expected a list".to_string(),
            })?;
            let association = self.registry.get_association(&definition.name, &field.property)?;

            for (index, item) in items.iter().enumerate() {
                let item_path = format!("{path}.{}.{index}", field.property);
                let child = item.as_object().ok_or_else(|| WriteError::InvalidPayload {
                    path: item_path.clone(),
                    message: "expected an object".to_string(),
                })?;

                match &association.join {
                    JoinSpec::ToMany {
                        reference_column,
                        version_column,
                    } => {
                        let mut inherited =
                            vec![(reference_column.clone(), SqlValue::Text(row.id.clone()))];
                        if let (Some(column), Some(version)) = (version_column, &row.version) {
                            inherited.push((column.clone(), SqlValue::Text(version.clone())));
                        }
                        if association.target.name == definition.name {
                            inherit_sibling_keys(definition, reference_column, child, row, &mut inherited);
                        }
                        self.plan_row(
                            &association.target,
                            child,
                            WriteMode::Upsert,
                            &inherited,
                            &item_path,
                            depth + 1,
                        )?;
                    }
                    JoinSpec::Mapping {
                        mapping_table,
                        local_column,
                        local_version_column,
                        reference_column,
                        reference_version_column,
                    } => {
                        let target_row = self.plan_row(
                            &association.target,
                            child,
                            WriteMode::Upsert,
                            &[],
                            &item_path,
                            depth + 1,
                        )?;

                        let mut key = PrimaryKey::new().with(local_column.clone(), row.id.clone());
                        if let (Some(column), Some(version)) = (local_version_column, &row.version) {
                            key = key.with(column.clone(), version.clone());
                        }
                        key = key.with(reference_column.clone(), target_row.id.clone());
                        if let (Some(column), Some(version)) =
                            (reference_version_column, &target_row.version)
                        {
                            key = key.with(column.clone(), version.clone());
                        }

                        let mut event_payload = Map::new();
                        event_payload.insert(to_camel_case(local_column), Value::String(row.id.clone()));
                        event_payload.insert(
                            to_camel_case(reference_column),
                            Value::String(target_row.id.clone()),
                        );

                        self.commands.push(WriteCommand {
                            entity: mapping_table.clone(),
                            table: mapping_table.clone(),
                            operation: WriteOperation::Insert,
                            primary_key: key,
                            data: Vec::new(),
                            conflict: ConflictMode::Ignore,
                            event_id: row.id.clone(),
                            payload: event_payload,
                            depth: depth + 1,
                        });
                    }
                    JoinSpec::ToOne { .. } => {}
                }
            }
        }
        Ok(())
    }

    fn row_exists(&self, table: &str, primary_key: &PrimaryKey) -> WriteResult<bool> {
        let exists: i64 = self.conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE {})",
                quote(table),
                primary_key.where_sql()
            ),
            params_from_iter(primary_key.values()),
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }
}

/// Tree children of a self-referencing association share the parent's
/// other foreign keys unless they name their own.
fn inherit_sibling_keys(
    definition: &EntityDefinition,
    reference_column: &str,
    child: &Map<String, Value>,
    row: &PlannedRow,
    inherited: &mut Vec<(String, SqlValue)>,
) {
    for field in definition.stored_fields() {
        if !matches!(field.kind, FieldKind::Fk { .. }) || field.storage == reference_column {
            continue;
        }
        if child.contains_key(&field.property) {
            continue;
        }
        if let Some(value) = row.data.get(&field.storage) {
            if *value != SqlValue::Null {
                inherited.push((field.storage.clone(), value.clone()));
            }
        }
    }
}

fn id_value(value: &Value, path: &str) -> WriteResult<String> {
    match json_to_sql(ScalarKind::Id, value) {
        Ok(SqlValue::Text(id)) => Ok(id),
        Ok(_) => Err(WriteError::InvalidPayload {
            path: path.to_string(),
            message: "expected hex id".to_string(),
        }),
        Err(message) => Err(WriteError::InvalidPayload {
            path: path.to_string(),
            message,
        }),
    }
}

type Translations = BTreeMap<String, BTreeMap<String, SqlValue>>;

fn collect_translations(
    definition: &EntityDefinition,
    payload: &Map<String, Value>,
    context: &Context,
    path: &str,
) -> WriteResult<Translations> {
    let mut out = Translations::new();
    let Some(translation) = definition.translation() else {
        return Ok(out);
    };

    for field in definition.translated_fields() {
        if let Some(value) = payload.get(&field.property) {
            let kind = field.scalar_kind().unwrap_or(ScalarKind::String);
            let stored = json_to_sql(kind, value).map_err(|message| WriteError::InvalidPayload {
                path: format!("{path}.{}", field.property),
                message,
            })?;
            out.entry(context.language_id().to_string())
                .or_default()
                .insert(field.storage.clone(), stored);
        }
    }

    let Some(raw) = payload.get(TRANSLATIONS_KEY) else {
        return Ok(out);
    };
    let languages = raw.as_object().ok_or_else(|| WriteError::InvalidPayload {
        path: format!("{path}.{TRANSLATIONS_KEY}"),
        message: "expected an object keyed by language id".to_string(),
    })?;
    for (language, values) in languages {
        let language_path = format!("{path}.{TRANSLATIONS_KEY}.{language}");
        let language_id = id_value(&Value::String(language.clone()), &language_path)?;
        let values = values.as_object().ok_or_else(|| WriteError::InvalidPayload {
            path: language_path.clone(),
            message: "expected an object".to_string(),
        })?;
        for (property, value) in values {
            let field = definition
                .field(property)
                .filter(|field| field.is_translated())
                .ok_or_else(|| DefinitionError::UnknownField {
                    entity: translation.table.clone(),
                    field: property.clone(),
                })?;
            let kind = field.scalar_kind().unwrap_or(ScalarKind::String);
            let stored = json_to_sql(kind, value).map_err(|message| WriteError::InvalidPayload {
                path: format!("{language_path}.{property}"),
                message,
            })?;
            out.entry(language_id.clone())
                .or_default()
                .insert(field.storage.clone(), stored);
        }
    }

    Ok(out)
}

fn check_required(
    definition: &EntityDefinition,
    operation: WriteOperation,
    data: &BTreeMap<String, SqlValue>,
    translations: &Translations,
    path: &str,
) -> WriteResult<()> {
    for field in definition.fields.iter().filter(|field| field.flags.required) {
        if field.flags.primary_key {
            continue;
        }
        let missing = if field.is_translated() {
            let explicitly_null = translations
                .values()
                .any(|columns| columns.get(&field.storage) == Some(&SqlValue::Null));
            let present = translations.values().any(|columns| {
                columns
                    .get(&field.storage)
                    .map_or(false, |value| *value != SqlValue::Null)
            });
            explicitly_null || (operation == WriteOperation::Insert && !present)
        } else if field.is_stored() {
            match data.get(&field.storage) {
                Some(SqlValue::Null) => true,
                Some(_) => false,
                None => operation == WriteOperation::Insert,
            }
        } else {
            false
        };

        if missing {
            return Err(WriteError::MissingRequiredField {
                entity: definition.name.clone(),
                path: format!("{path}.{}", field.property),
            });
        }
    }
    Ok(())
}

fn row_payload(
    definition: &EntityDefinition,
    primary_key: &PrimaryKey,
    data: &BTreeMap<String, SqlValue>,
) -> Map<String, Value> {
    let mut payload = Map::new();
    let entries = primary_key
        .0
        .iter()
        .map(|(column, value)| (column.as_str(), value))
        .chain(data.iter().map(|(column, value)| (column.as_str(), value)));
    for (column, value) in entries {
        let field = definition.field_by_storage(column);
        let property = field.map_or_else(|| to_camel_case(column), |field| field.property.clone());
        let value = sql_to_json(field.and_then(|field| field.scalar_kind()), ValueRef::from(value))
            .unwrap_or(Value::Null);
        payload.insert(property, value);
    }
    payload
}
