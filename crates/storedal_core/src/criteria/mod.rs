//! Storage-independent query description.
//!
//! # Responsibility
//! - Describe filters, sorting, pagination and eager-loaded associations.
//! - Keep the filter tree serializable to its persisted form.
//!
//! # Invariants
//! - A `Criteria` is built per call and never shared between calls.
//! - Nested association criteria apply per owning entity.
//!
//! # See also
//! - `query::planner` for translation into SQL.

mod api;
mod filter;

pub use api::{ApiFilterNode, FilterError, FilterResult};
pub use filter::{Filter, MultiOperator, RangeParameters};

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOrdering {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSorting {
    pub field: String,
    pub direction: SortDirection,
    /// Compare digit runs numerically and letters case-insensitively.
    pub natural: bool,
    /// Defaults to nulls first for ascending and last for descending.
    pub nulls: Option<NullOrdering>,
}

impl FieldSorting {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
            natural: false,
            nulls: None,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            direction: SortDirection::Desc,
            ..Self::asc(field)
        }
    }

    pub fn natural(mut self) -> Self {
        self.natural = true;
        self
    }

    pub fn nulls(mut self, nulls: NullOrdering) -> Self {
        self.nulls = Some(nulls);
        self
    }

    pub fn effective_nulls(&self) -> NullOrdering {
        self.nulls.unwrap_or(match self.direction {
            SortDirection::Asc => NullOrdering::First,
            SortDirection::Desc => NullOrdering::Last,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Criteria {
    /// Primary id shortcut; empty means "no id restriction".
    pub ids: Vec<String>,
    /// Top-level filters, combined with AND.
    pub filters: Vec<Filter>,
    pub sortings: Vec<FieldSorting>,
    pub limit: Option<u32>,
    pub offset: u32,
    /// Associations to eager-load, keyed by association property.
    pub associations: BTreeMap<String, Criteria>,
    /// Skip the context version restriction on versioned roots.
    pub all_versions: bool,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn add_filter(&mut self, filter: Filter) -> &mut Self {
        self.filters.push(filter);
        self
    }

    pub fn add_sorting(&mut self, sorting: FieldSorting) -> &mut Self {
        self.sortings.push(sorting);
        self
    }

    pub fn set_limit(&mut self, limit: u32) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn set_offset(&mut self, offset: u32) -> &mut Self {
        self.offset = offset;
        self
    }

    pub fn set_all_versions(&mut self, all_versions: bool) -> &mut Self {
        self.all_versions = all_versions;
        self
    }

    /// Requests an association (dotted paths create nested criteria) and
    /// returns the criteria of the last segment for further refinement.
    pub fn add_association(&mut self, path: &str) -> &mut Criteria {
        let mut current = self;
        for segment in path.split('.') {
            current = current
                .associations
                .entry(segment.to_string())
                .or_default();
        }
        current
    }
}
