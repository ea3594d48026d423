//! Write side of the entity layer.
//!
//! # Responsibility
//! - Expand nested payloads into dependency-ordered row commands.
//! - Resolve deletes against cascade and restrict flags.
//! - Execute a whole write call in one transaction and emit write events.
//!
//! # Invariants
//! - Parent rows are written before rows referencing them.
//! - Deletes issue one statement per requested root row; dependents are
//!   removed by the storage engine's declared `ON DELETE CASCADE`.
//! - Versioned writes thread the context version id into every nested row.
//!
//! # See also
//! - `write::cascade::verify_storage_contract` for the flag/FK agreement check.

pub mod cascade;
mod command;
mod planner;
mod writer;

pub use cascade::{
    verify_storage_contract, CascadedRow, ContractMismatch, DeletePlan, DeleteResolver,
};
pub use command::{ConflictMode, PrimaryKey, WriteCommand, WriteMode, WriteOperation};
pub use planner::WriteCommandPlanner;
pub use writer::{EntityWriter, WriteSummary};

use crate::db::DbError;
use crate::definition::DefinitionError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type WriteResult<T> = Result<T, WriteError>;

/// One row rejected by a storage constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub entity: String,
    pub primary_key: String,
    /// Constraint message reported by the storage engine.
    pub constraint: String,
}

impl Display for ConstraintViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}]: {}",
            self.entity, self.primary_key, self.constraint
        )
    }
}

#[derive(Debug)]
pub enum WriteError {
    Definition(DefinitionError),
    /// Payload value does not fit its field.
    InvalidPayload { path: String, message: String },
    MissingRequiredField { entity: String, path: String },
    /// Update of a row that does not exist.
    NotFound { entity: String, primary_key: String },
    /// Delete blocked by a restrict-delete association that still has rows.
    RestrictedDelete {
        entity: String,
        primary_key: String,
        association: String,
        child_entity: String,
        child_count: u64,
    },
    ConstraintViolations(Vec<ConstraintViolation>),
    /// Rows forecast to be cascaded still exist after the delete.
    OrphanedRows { entity: String, count: usize },
    Db(DbError),
}

impl Display for WriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Definition(err) => write!(f, "{err}"),
            Self::InvalidPayload { path, message } => {
                write!(f, "invalid value at `{path}`: {message}")
            }
            Self::MissingRequiredField { entity, path } => {
                write!(f, "missing required field `{path}` for `{entity}`")
            }
            Self::NotFound {
                entity,
                primary_key,
            } => write!(f, "{entity} not found: {primary_key}"),
            Self::RestrictedDelete {
                entity,
                primary_key,
                association,
                child_entity,
                child_count,
            } => write!(
                f,
                "cannot delete {entity} [{primary_key}]: {child_count} {child_entity} row(s) still referenced via `{association}`"
            ),
            Self::ConstraintViolations(violations) => {
                write!(f, "{} constraint violation(s)", violations.len())?;
                for violation in violations {
                    write!(f, "; {violation}")?;
                }
                Ok(())
            }
            Self::OrphanedRows { entity, count } => {
                write!(f, "{count} {entity} row(s) survived a cascading delete")
            }
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for WriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Definition(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DefinitionError> for WriteError {
    fn from(value: DefinitionError) -> Self {
        Self::Definition(value)
    }
}

impl From<DbError> for WriteError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for WriteError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
