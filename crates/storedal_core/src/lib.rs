//! Entity data abstraction layer over SQLite.
//! Definitions drive querying, nested writes, cascading deletes, derived
//! data indexing and cache tagging.

pub mod cache;
pub mod config;
pub mod context;
pub mod criteria;
pub mod db;
pub mod definition;
pub mod event;
pub mod indexer;
pub mod logging;
pub mod query;
pub mod repo;
pub mod value;
pub mod write;

pub use config::{ConfigError, DalConfig};
pub use context::Context;
pub use criteria::{
    Criteria, FieldSorting, Filter, FilterError, MultiOperator, NullOrdering, RangeParameters,
};
pub use db::{open_db, open_db_in_memory, DbError};
pub use definition::{DefinitionError, DefinitionRegistry, EntityDefinition, Field};
pub use event::{EntityWrittenEvent, EntityWrittenSubscriber, EventDispatcher, WriteKind};
pub use indexer::{IndexOutcome, IndexerError, IndexingReport, ProductStreamIndexer};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use query::{Entity, EntityReader, QueryError, SearchResult};
pub use repo::entity_repo::{EntityRepository, RepoError, RepoResult, SqliteEntityRepository};
pub use write::{EntityWriter, WriteError, WriteSummary};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
