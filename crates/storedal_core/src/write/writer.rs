//! Transactional write executor.

use super::cascade::{surviving_rows, DeleteResolver};
use super::command::{WriteCommand, WriteMode, WriteOperation};
use super::planner::WriteCommandPlanner;
use super::{ConstraintViolation, WriteError, WriteResult};
use crate::context::Context;
use crate::definition::{DefinitionRegistry, FieldKind};
use crate::event::{find_event, EntityWrittenEvent, EventDispatcher, WriteKind};
use crate::query::quote;
use log::{error, info, warn};
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::{Map, Value};
use std::time::Instant;

/// Outcome of one committed write call.
#[derive(Debug, Clone, Default)]
pub struct WriteSummary {
    /// One event per touched entity, in first-touched order.
    pub events: Vec<EntityWrittenEvent>,
    /// Delete keys that matched no row.
    pub not_found: Vec<String>,
}

impl WriteSummary {
    pub fn event(&self, entity_name: &str) -> Option<&EntityWrittenEvent> {
        find_event(&self.events, entity_name)
    }
}

/// Write API over one connection.
///
/// Every call runs in its own immediate transaction. Subscribers are
/// notified after commit.
pub struct EntityWriter<'a> {
    conn: &'a Connection,
    registry: &'a DefinitionRegistry,
    context: &'a Context,
    dispatcher: Option<&'a EventDispatcher>,
}

impl<'a> EntityWriter<'a> {
    pub fn new(conn: &'a Connection, registry: &'a DefinitionRegistry, context: &'a Context) -> Self {
        Self {
            conn,
            registry,
            context,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: &'a EventDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn insert(&self, entity: &str, payloads: &[Value]) -> WriteResult<WriteSummary> {
        self.write(entity, payloads, WriteMode::Insert)
    }

    pub fn update(&self, entity: &str, payloads: &[Value]) -> WriteResult<WriteSummary> {
        self.write(entity, payloads, WriteMode::Update)
    }

    pub fn upsert(&self, entity: &str, payloads: &[Value]) -> WriteResult<WriteSummary> {
        self.write(entity, payloads, WriteMode::Upsert)
    }

    /// Deletes rows by id or `{id, versionId}` key.
    ///
    /// Missing rows are reported in [`WriteSummary::not_found`].
    pub fn delete(&self, entity: &str, keys: &[Value]) -> WriteResult<WriteSummary> {
        let started_at = Instant::now();
        let result = self.delete_in_transaction(entity, keys);
        match &result {
            Ok(summary) => info!(
                "event=entity_delete module=write status=ok entity={} requested={} deleted={} not_found={} events={} duration_ms={}",
                entity,
                keys.len(),
                keys.len().saturating_sub(summary.not_found.len()),
                summary.not_found.len(),
                summary.events.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=entity_delete module=write status=error entity={} requested={} duration_ms={} error={}",
                entity,
                keys.len(),
                started_at.elapsed().as_millis(),
                err
            ),
        }
        let summary = result?;
        self.dispatch(&summary.events);
        Ok(summary)
    }

    fn write(&self, entity: &str, payloads: &[Value], mode: WriteMode) -> WriteResult<WriteSummary> {
        let started_at = Instant::now();
        let result = self.write_in_transaction(entity, payloads, mode);
        match &result {
            Ok(summary) => info!(
                "event=entity_write module=write status=ok entity={} mode={} rows={} events={} duration_ms={}",
                entity,
                mode.as_str(),
                payloads.len(),
                summary.events.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=entity_write module=write status=error entity={} mode={} rows={} duration_ms={} error={}",
                entity,
                mode.as_str(),
                payloads.len(),
                started_at.elapsed().as_millis(),
                err
            ),
        }
        let summary = result?;
        self.dispatch(&summary.events);
        Ok(summary)
    }

    fn write_in_transaction(
        &self,
        entity: &str,
        payloads: &[Value],
        mode: WriteMode,
    ) -> WriteResult<WriteSummary> {
        let definition = self.registry.get(entity)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let commands =
            WriteCommandPlanner::new(&tx, self.registry, self.context).plan(&definition, payloads, mode)?;
        let replaced = commands
            .iter()
            .map(|command| replaced_references(&tx, self.registry, command))
            .collect::<WriteResult<Vec<_>>>()?;
        execute_all(&tx, &commands)?;
        tx.commit()?;

        let mut events = Vec::new();
        for (command, replaced) in commands.iter().zip(replaced) {
            let event = event_for(&mut events, self.context, WriteKind::Written, &command.entity);
            event.push(command.event_id.clone(), command.payload.clone());
            if let Some(stored) = replaced {
                event.replaced_references.push(stored);
            }
        }
        Ok(WriteSummary {
            events,
            not_found: Vec::new(),
        })
    }

    fn delete_in_transaction(&self, entity: &str, keys: &[Value]) -> WriteResult<WriteSummary> {
        let definition = self.registry.get(entity)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let plan = DeleteResolver::new(&tx, self.registry, self.context).resolve(&definition, keys)?;
        execute_all(&tx, &plan.commands)?;

        if let Some((entity, count)) = surviving_rows(&tx, &plan.cascaded)?.into_iter().next() {
            error!(
                "event=entity_delete module=write status=error entity={} orphaned_entity={} orphaned={}",
                definition.name, entity, count
            );
            return Err(WriteError::OrphanedRows { entity, count });
        }
        tx.commit()?;

        let mut events = Vec::new();
        for command in &plan.commands {
            record(&mut events, self.context, WriteKind::Deleted, &command.entity, command);
        }
        for row in plan.cascaded {
            event_for(&mut events, self.context, WriteKind::Deleted, &row.entity)
                .push(row.event_id, row.snapshot);
        }
        Ok(WriteSummary {
            events,
            not_found: plan.not_found,
        })
    }

    fn dispatch(&self, events: &[EntityWrittenEvent]) {
        if let Some(dispatcher) = self.dispatcher {
            dispatcher.dispatch(self.conn, events);
        }
    }
}

/// Runs every command, collecting constraint failures instead of stopping
/// at the first one. Any failure leaves the transaction uncommitted.
fn execute_all(conn: &Connection, commands: &[WriteCommand]) -> WriteResult<()> {
    let mut violations = Vec::new();
    for command in commands {
        match command.execute(conn) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(failure, message))
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                violations.push(ConstraintViolation {
                    entity: command.entity.clone(),
                    primary_key: command.primary_key.key(),
                    constraint: message.unwrap_or_else(|| failure.to_string()),
                });
            }
            Err(err) => return Err(err.into()),
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(WriteError::ConstraintViolations(violations))
    }
}

/// Reads the foreign keys an update command is about to overwrite.
fn replaced_references(
    conn: &Connection,
    registry: &DefinitionRegistry,
    command: &WriteCommand,
) -> WriteResult<Option<Map<String, Value>>> {
    if !matches!(command.operation, WriteOperation::Update | WriteOperation::Upsert) {
        return Ok(None);
    }
    let Ok(definition) = registry.get(&command.entity) else {
        return Ok(None);
    };
    let references: Vec<(&str, &str)> = command
        .data
        .iter()
        .filter_map(|(column, _)| definition.field_by_storage(column))
        .filter(|field| matches!(field.kind, FieldKind::Fk { .. }))
        .map(|field| (field.storage.as_str(), field.property.as_str()))
        .collect();
    if references.is_empty() {
        return Ok(None);
    }

    let columns = references
        .iter()
        .map(|(column, _)| quote(column))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {columns} FROM {} WHERE {}",
        quote(&command.table),
        command.primary_key.where_sql()
    );
    let stored = conn
        .query_row(&sql, params_from_iter(command.primary_key.values()), |row| {
            let mut stored = Map::new();
            for (index, (_, property)) in references.iter().enumerate() {
                let value: Option<String> = row.get(index)?;
                stored.insert(property.to_string(), value.map_or(Value::Null, Value::String));
            }
            Ok(stored)
        })
        .optional()?;
    Ok(stored)
}

fn record(
    events: &mut Vec<EntityWrittenEvent>,
    context: &Context,
    kind: WriteKind,
    entity: &str,
    command: &WriteCommand,
) {
    event_for(events, context, kind, entity).push(command.event_id.clone(), command.payload.clone());
}

fn event_for<'e>(
    events: &'e mut Vec<EntityWrittenEvent>,
    context: &Context,
    kind: WriteKind,
    entity: &str,
) -> &'e mut EntityWrittenEvent {
    let position = events
        .iter()
        .position(|event| event.entity_name == entity && event.kind == kind);
    match position {
        Some(position) => &mut events[position],
        None => {
            events.push(EntityWrittenEvent::new(entity, kind, context.clone()));
            let last = events.len() - 1;
            &mut events[last]
        }
    }
}
