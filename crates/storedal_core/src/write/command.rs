//! Row-level write commands.

use crate::query::{placeholders, quote};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

/// Caller-facing write mode of a write call's root rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Insert,
    Update,
    Upsert,
}

impl WriteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Upsert => "upsert",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    Insert,
    Update,
    /// `INSERT .. ON CONFLICT DO UPDATE`; used for overlay rows.
    Upsert,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictMode {
    #[default]
    Abort,
    /// `INSERT OR IGNORE`; used for mapping rows.
    Ignore,
}

/// Ordered `(column, value)` pairs identifying one row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrimaryKey(pub Vec<(String, SqlValue)>);

impl PrimaryKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((column.into(), SqlValue::Text(value.into())));
        self
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.iter().find_map(|(name, value)| match value {
            SqlValue::Text(text) if name == column => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(column, _)| column.as_str())
    }

    pub(crate) fn where_sql(&self) -> String {
        self.0
            .iter()
            .map(|(column, _)| format!("{} = ?", quote(column)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.0.iter().map(|(_, value)| value)
    }

    /// Stable string form used as identity in plans and error reports.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl Display for PrimaryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, (column, value)) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            match value {
                SqlValue::Text(text) => write!(f, "{column}={text}")?,
                SqlValue::Integer(number) => write!(f, "{column}={number}")?,
                other => write!(f, "{column}={other:?}")?,
            }
        }
        Ok(())
    }
}

/// One row operation with the event data it contributes.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCommand {
    /// Entity name reported in the write event (`product`,
    /// `product_translation`, `product_category`).
    pub entity: String,
    pub table: String,
    pub operation: WriteOperation,
    pub primary_key: PrimaryKey,
    /// Non-key columns to write.
    pub data: Vec<(String, SqlValue)>,
    pub conflict: ConflictMode,
    /// Id reported in the write event.
    pub event_id: String,
    pub payload: Map<String, Value>,
    /// Nesting depth inside the originating payload.
    pub depth: usize,
}

impl WriteCommand {
    pub fn sql(&self) -> (String, Vec<SqlValue>) {
        let table = quote(&self.table);
        match self.operation {
            WriteOperation::Insert | WriteOperation::Upsert => {
                let columns: Vec<String> = self
                    .primary_key
                    .columns()
                    .chain(self.data.iter().map(|(column, _)| column.as_str()))
                    .map(quote)
                    .collect();
                let mut bind_values: Vec<SqlValue> = self.primary_key.values().cloned().collect();
                bind_values.extend(self.data.iter().map(|(_, value)| value.clone()));

                let verb = match self.conflict {
                    ConflictMode::Abort => "INSERT",
                    ConflictMode::Ignore => "INSERT OR IGNORE",
                };
                let mut sql = format!(
                    "{verb} INTO {table} ({}) VALUES ({})",
                    columns.join(", "),
                    placeholders(columns.len())
                );
                if self.operation == WriteOperation::Upsert {
                    let conflict_target = self
                        .primary_key
                        .columns()
                        .map(quote)
                        .collect::<Vec<_>>()
                        .join(", ");
                    if self.data.is_empty() {
                        sql.push_str(&format!(" ON CONFLICT ({conflict_target}) DO NOTHING"));
                    } else {
                        let updates = self
                            .data
                            .iter()
                            .map(|(column, _)| {
                                let column = quote(column);
                                format!("{column} = excluded.{column}")
                            })
                            .collect::<Vec<_>>()
                            .join(", ");
                        sql.push_str(&format!(
                            " ON CONFLICT ({conflict_target}) DO UPDATE SET {updates}"
                        ));
                    }
                }
                (sql, bind_values)
            }
            WriteOperation::Update => {
                let assignments = self
                    .data
                    .iter()
                    .map(|(column, _)| format!("{} = ?", quote(column)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut bind_values: Vec<SqlValue> =
                    self.data.iter().map(|(_, value)| value.clone()).collect();
                bind_values.extend(self.primary_key.values().cloned());
                (
                    format!(
                        "UPDATE {table} SET {assignments} WHERE {}",
                        self.primary_key.where_sql()
                    ),
                    bind_values,
                )
            }
            WriteOperation::Delete => (
                format!("DELETE FROM {table} WHERE {}", self.primary_key.where_sql()),
                self.primary_key.values().cloned().collect(),
            ),
        }
    }

    pub fn execute(&self, conn: &Connection) -> rusqlite::Result<usize> {
        if self.operation == WriteOperation::Update && self.data.is_empty() {
            return Ok(0);
        }
        let (sql, bind_values) = self.sql();
        conn.execute(&sql, params_from_iter(bind_values))
    }
}
