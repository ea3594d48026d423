//! Entity repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Bind the read and write APIs to one entity definition.
//! - Return a single repository error type to callers.
//!
//! # Invariants
//! - A repository only exists for a registered definition.
//! - Writes go through `EntityWriter`, so events are dispatched after commit.

use crate::context::Context;
use crate::criteria::Criteria;
use crate::definition::{DefinitionError, DefinitionRegistry, EntityDefinition};
use crate::event::EventDispatcher;
use crate::query::{EntityReader, QueryError, SearchResult};
use crate::write::{EntityWriter, WriteError, WriteSummary};
use rusqlite::Connection;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    Definition(DefinitionError),
    Query(QueryError),
    Write(WriteError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Definition(err) => write!(f, "{err}"),
            Self::Query(err) => write!(f, "{err}"),
            Self::Write(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Definition(err) => Some(err),
            Self::Query(err) => Some(err),
            Self::Write(err) => Some(err),
        }
    }
}

impl From<DefinitionError> for RepoError {
    fn from(value: DefinitionError) -> Self {
        Self::Definition(value)
    }
}

impl From<QueryError> for RepoError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}

impl From<WriteError> for RepoError {
    fn from(value: WriteError) -> Self {
        Self::Write(value)
    }
}

/// Repository interface for one entity.
pub trait EntityRepository {
    fn definition(&self) -> &EntityDefinition;
    fn search(&self, criteria: &Criteria, context: &Context) -> RepoResult<SearchResult>;
    fn search_ids(&self, criteria: &Criteria, context: &Context) -> RepoResult<Vec<String>>;
    /// Inserts new rows; existing primary keys are constraint violations.
    fn create(&self, payloads: &[Value], context: &Context) -> RepoResult<WriteSummary>;
    /// Updates existing rows; a missing root row fails the whole call.
    fn update(&self, payloads: &[Value], context: &Context) -> RepoResult<WriteSummary>;
    fn upsert(&self, payloads: &[Value], context: &Context) -> RepoResult<WriteSummary>;
    /// Deletes by id or `{id, versionId}`.
    fn delete(&self, keys: &[Value], context: &Context) -> RepoResult<WriteSummary>;
}

/// SQLite-backed entity repository.
pub struct SqliteEntityRepository<'conn> {
    conn: &'conn Connection,
    registry: DefinitionRegistry,
    definition: Arc<EntityDefinition>,
    dispatcher: Option<&'conn EventDispatcher>,
}

impl<'conn> SqliteEntityRepository<'conn> {
    /// Fails with `DefinitionNotFound` for unregistered entities.
    pub fn try_new(
        conn: &'conn Connection,
        registry: &DefinitionRegistry,
        entity: &str,
    ) -> RepoResult<Self> {
        let definition = registry.get(entity)?;
        Ok(Self {
            conn,
            registry: registry.clone(),
            definition,
            dispatcher: None,
        })
    }

    pub fn with_dispatcher(mut self, dispatcher: &'conn EventDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    fn writer<'a>(&'a self, context: &'a Context) -> EntityWriter<'a> {
        let writer = EntityWriter::new(self.conn, &self.registry, context);
        match self.dispatcher {
            Some(dispatcher) => writer.with_dispatcher(dispatcher),
            None => writer,
        }
    }
}

impl EntityRepository for SqliteEntityRepository<'_> {
    fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    fn search(&self, criteria: &Criteria, context: &Context) -> RepoResult<SearchResult> {
        Ok(EntityReader::new(self.conn, &self.registry, context).search(&self.definition.name, criteria)?)
    }

    fn search_ids(&self, criteria: &Criteria, context: &Context) -> RepoResult<Vec<String>> {
        Ok(EntityReader::new(self.conn, &self.registry, context)
            .search_ids(&self.definition.name, criteria)?)
    }

    fn create(&self, payloads: &[Value], context: &Context) -> RepoResult<WriteSummary> {
        Ok(self.writer(context).insert(&self.definition.name, payloads)?)
    }

    fn update(&self, payloads: &[Value], context: &Context) -> RepoResult<WriteSummary> {
        Ok(self.writer(context).update(&self.definition.name, payloads)?)
    }

    fn upsert(&self, payloads: &[Value], context: &Context) -> RepoResult<WriteSummary> {
        Ok(self.writer(context).upsert(&self.definition.name, payloads)?)
    }

    fn delete(&self, keys: &[Value], context: &Context) -> RepoResult<WriteSummary> {
        Ok(self.writer(context).delete(&self.definition.name, keys)?)
    }
}
