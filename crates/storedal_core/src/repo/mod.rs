//! Repository layer over the generic entity reader and writer.
//!
//! # Responsibility
//! - Offer one entity-scoped data access contract per definition.
//! - Keep SQL and transaction details inside the query and write modules.
//!
//! # Invariants
//! - A repository is bound to a definition that exists in its registry.
//! - Every call takes the caller's [`crate::Context`]; repositories hold no
//!   per-request state.

pub mod entity_repo;
