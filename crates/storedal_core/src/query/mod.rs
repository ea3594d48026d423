//! Read side of the entity layer.
//!
//! # Responsibility
//! - Plan criteria into SQL, execute it and hydrate nested entities.
//!
//! # Invariants
//! - Reads are side-effect free.
//! - A search with no matching rows returns `total = 0` and no entities.
//!
//! # See also
//! - `criteria` for the query description.
//! - `definition` for field path resolution.

mod entity;
mod hydrator;
pub mod natural;
mod planner;
mod reader;

pub use entity::{Entity, SearchResult};
pub use planner::{QueryPlan, QueryPlanner, SelectedColumn, ToManyLoad};
pub use reader::EntityReader;

pub(crate) use planner::{placeholders, quote};

use crate::criteria::FilterError;
use crate::db::DbError;
use crate::definition::DefinitionError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug)]
pub enum QueryError {
    /// Unknown entity, unknown field or invalid association path.
    Definition(DefinitionError),
    InvalidFilter(FilterError),
    Db(DbError),
    /// Stored data cannot be converted to the field type.
    InvalidData(String),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Definition(err) => write!(f, "{err}"),
            Self::InvalidFilter(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid stored entity data: {message}"),
        }
    }
}

impl Error for QueryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Definition(err) => Some(err),
            Self::InvalidFilter(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DefinitionError> for QueryError {
    fn from(value: DefinitionError) -> Self {
        Self::Definition(value)
    }
}

impl From<FilterError> for QueryError {
    fn from(value: FilterError) -> Self {
        Self::InvalidFilter(value)
    }
}

impl From<DbError> for QueryError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
