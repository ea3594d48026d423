//! Derived data recomputation driven by write events.
//!
//! # Responsibility
//! - Map write events to the derived records they affect.
//! - Recompute derived records from current storage state.
//!
//! # Invariants
//! - Records are recomputed independently; one failure never blocks others.
//! - Recomputing an unchanged record yields the same persisted state.
//! - A record that cannot be derived is persisted as invalid, not reported
//!   as an error.

pub mod id_extractor;
pub mod product_stream;

pub use id_extractor::ProductStreamIdExtractor;
pub use product_stream::ProductStreamIndexer;

use crate::db::DbError;
use crate::definition::DefinitionError;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type IndexerResult<T> = Result<T, IndexerError>;

#[derive(Debug)]
pub enum IndexerError {
    Definition(DefinitionError),
    Db(DbError),
}

impl Display for IndexerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Definition(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IndexerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Definition(err) => Some(err),
            Self::Db(err) => Some(err),
        }
    }
}

impl From<DefinitionError> for IndexerError {
    fn from(value: DefinitionError) -> Self {
        Self::Definition(value)
    }
}

impl From<DbError> for IndexerError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for IndexerError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Lifecycle of one derived record.
///
/// New records are stored invalid until their first computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DerivedState {
    Invalid,
    Computing,
    Valid,
}

impl DerivedState {
    pub fn from_invalid_flag(invalid: bool) -> Self {
        if invalid {
            Self::Invalid
        } else {
            Self::Valid
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Computing => "computing",
            Self::Valid => "valid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IndexOutcome {
    Valid,
    /// Persisted with `invalid = 1`; `reason` names the first broken node.
    Invalid { reason: String },
    /// No record with this id.
    Missing,
    /// Storage error; the persisted state is unchanged.
    Failed { message: String },
}

impl IndexOutcome {
    /// State after recompute, `None` when nothing was persisted.
    pub fn state(&self) -> Option<DerivedState> {
        match self {
            Self::Valid => Some(DerivedState::Valid),
            Self::Invalid { .. } => Some(DerivedState::Invalid),
            Self::Missing | Self::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedRecord {
    pub id: String,
    pub outcome: IndexOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexingReport {
    pub records: Vec<IndexedRecord>,
}

impl IndexingReport {
    pub fn outcome(&self, id: &str) -> Option<&IndexOutcome> {
        self.records
            .iter()
            .find(|record| record.id == id)
            .map(|record| &record.outcome)
    }

    pub fn valid_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, IndexOutcome::Valid))
    }

    pub fn invalid_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, IndexOutcome::Invalid { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, IndexOutcome::Failed { .. }))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn extend(&mut self, other: IndexingReport) {
        self.records.extend(other.records);
    }

    fn count(&self, predicate: impl Fn(&IndexOutcome) -> bool) -> usize {
        self.records
            .iter()
            .filter(|record| predicate(&record.outcome))
            .count()
    }
}
