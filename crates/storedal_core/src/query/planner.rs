//! Criteria-to-SQL planning.
//!
//! # Responsibility
//! - Translate a [`Criteria`] over one definition into a SELECT and a
//!   matching COUNT query with positional parameters.
//! - Join associations and translation overlays only when a filter, a
//!   sorting or a requested association touches them.
//!
//! # Invariants
//! - Every identifier in generated SQL is quoted; every value is bound.
//! - Parameters are collected per clause so placeholder order matches the
//!   textual order: joins, where, limit/offset.
//! - Versioned roots are restricted to the context version unless the
//!   criteria asks for all versions.
//! - Results are totally ordered: the root primary key is the last sort key.
//! - Filters never join to-many associations; only sortings do, and those
//!   group by the root key.

use super::{QueryError, QueryResult};
use crate::context::Context;
use crate::criteria::{
    Criteria, FieldSorting, Filter, FilterError, MultiOperator, NullOrdering, SortDirection,
};
use crate::db::NATURAL_COLLATION;
use crate::definition::{
    AssociationRef, DefinitionError, DefinitionRegistry, EntityDefinition, Field, JoinSpec,
    ResolvedField, ScalarKind,
};
use crate::value::{filter_value_to_sql, normalize_id};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use std::collections::BTreeSet;
use std::sync::Arc;

static JSON_PATH_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid json path segment regex"));

/// One selected column and where its value lands in the hydrated entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedColumn {
    /// To-one association path from the root; empty for root fields.
    pub path: Vec<String>,
    pub property: String,
    pub kind: Option<ScalarKind>,
}

/// A to-many association loaded by a follow-up search after the main query.
#[derive(Debug, Clone)]
pub struct ToManyLoad {
    /// To-one path from the root to the owning object.
    pub owner_path: Vec<String>,
    pub association: AssociationRef,
    pub criteria: Criteria,
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub count_sql: String,
    pub count_params: Vec<SqlValue>,
    pub columns: Vec<SelectedColumn>,
    pub to_many: Vec<ToManyLoad>,
}

pub struct QueryPlanner<'a> {
    registry: &'a DefinitionRegistry,
    context: &'a Context,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(registry: &'a DefinitionRegistry, context: &'a Context) -> Self {
        Self { registry, context }
    }

    pub fn plan(&self, definition: &EntityDefinition, criteria: &Criteria) -> QueryResult<QueryPlan> {
        let root = self.registry.get(&definition.name)?;
        let mut builder = PlanBuilder {
            registry: self.registry,
            context: self.context,
            root: root.clone(),
            joins: Vec::new(),
            join_params: Vec::new(),
            joined: BTreeSet::new(),
            grouped: false,
        };

        let mut select = Vec::new();
        let mut columns = Vec::new();
        let mut to_many = Vec::new();
        builder.select_entity(&root, &root.name, &[], criteria, &mut select, &mut columns, &mut to_many)?;

        let mut conditions = Vec::new();
        let mut where_params = Vec::new();
        let root_alias = quote(&root.name);

        if root.is_versioned() && !criteria.all_versions {
            conditions.push(format!("{root_alias}.\"version_id\" = ?"));
            where_params.push(SqlValue::Text(self.context.version_id.clone()));
        }

        if !criteria.ids.is_empty() {
            conditions.push(format!(
                "{root_alias}.\"id\" IN ({})",
                placeholders(criteria.ids.len())
            ));
            where_params.extend(criteria.ids.iter().map(|id| {
                SqlValue::Text(normalize_id(id).unwrap_or_else(|| id.clone()))
            }));
        }

        for filter in &criteria.filters {
            conditions.push(builder.filter_sql(filter, &mut where_params)?);
        }

        let mut order_by = Vec::new();
        for sorting in &criteria.sortings {
            order_by.push(builder.sorting_sql(sorting)?);
        }
        for column in root.primary_key_columns() {
            order_by.push(format!("{root_alias}.{} ASC", quote(column)));
        }

        let pk_select = root
            .primary_key_columns()
            .iter()
            .map(|column| format!("{root_alias}.{}", quote(column)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut from = format!("FROM {} AS {root_alias}", quote(&root.name));
        for join in &builder.joins {
            from.push(' ');
            from.push_str(join);
        }
        if !conditions.is_empty() {
            from.push_str(" WHERE ");
            from.push_str(&conditions.join(" AND "));
        }
        if builder.grouped {
            from.push_str(" GROUP BY ");
            from.push_str(&pk_select);
        }

        let mut sql = format!("SELECT {} {from} ORDER BY {}", select.join(", "), order_by.join(", "));
        let mut params = builder.join_params.clone();
        params.extend(where_params.iter().cloned());

        if let Some(limit) = criteria.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(i64::from(limit)));
            if criteria.offset > 0 {
                sql.push_str(" OFFSET ?");
                params.push(SqlValue::Integer(i64::from(criteria.offset)));
            }
        } else if criteria.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(SqlValue::Integer(i64::from(criteria.offset)));
        }

        let count_sql = format!("SELECT COUNT(*) FROM (SELECT {pk_select} {from})");
        let mut count_params = builder.join_params;
        count_params.extend(where_params);

        Ok(QueryPlan {
            sql,
            params,
            count_sql,
            count_params,
            columns,
            to_many,
        })
    }
}

struct PlanBuilder<'a> {
    registry: &'a DefinitionRegistry,
    context: &'a Context,
    root: Arc<EntityDefinition>,
    joins: Vec<String>,
    join_params: Vec<SqlValue>,
    joined: BTreeSet<String>,
    grouped: bool,
}

struct CorrelatedSource {
    from: String,
    /// Alias of the association target inside the subquery.
    alias: String,
    conditions: Vec<String>,
    params: Vec<SqlValue>,
}

impl PlanBuilder<'_> {
    #[allow(clippy::too_many_arguments)]
    fn select_entity(
        &mut self,
        definition: &Arc<EntityDefinition>,
        alias: &str,
        path: &[String],
        criteria: &Criteria,
        select: &mut Vec<String>,
        columns: &mut Vec<SelectedColumn>,
        to_many: &mut Vec<ToManyLoad>,
    ) -> QueryResult<()> {
        for field in definition.stored_fields() {
            select.push(format!(
                "{}.{} AS {}",
                quote(alias),
                quote(&field.storage),
                quote(&format!("c{}", columns.len()))
            ));
            columns.push(SelectedColumn {
                path: path.to_vec(),
                property: field.property.clone(),
                kind: field.scalar_kind(),
            });
        }

        for field in definition.translated_fields() {
            let expression = self.translated_expr(definition, alias, field);
            select.push(format!(
                "{expression} AS {}",
                quote(&format!("c{}", columns.len()))
            ));
            columns.push(SelectedColumn {
                path: path.to_vec(),
                property: field.property.clone(),
                kind: field.scalar_kind(),
            });
        }

        for (property, nested) in &criteria.associations {
            let association = self.registry.get_association(&definition.name, property)?;
            if association.field.is_to_many() {
                to_many.push(ToManyLoad {
                    owner_path: path.to_vec(),
                    association,
                    criteria: nested.clone(),
                });
                continue;
            }

            let nested_alias = self.join_association(alias, &association);
            let mut nested_path = path.to_vec();
            nested_path.push(property.clone());
            let target = association.target.clone();
            self.select_entity(&target, &nested_alias, &nested_path, nested, select, columns, to_many)?;
        }

        Ok(())
    }

    fn join_association(&mut self, owner_alias: &str, hop: &AssociationRef) -> String {
        let alias = format!("{owner_alias}.{}", hop.property());
        if !self.joined.insert(alias.clone()) {
            return alias;
        }

        let owner = quote(owner_alias);
        let target_alias = quote(&alias);
        let target_table = quote(&hop.target.name);
        match &hop.join {
            JoinSpec::ToOne {
                local_column,
                version_column,
            } => {
                let mut join = format!(
                    "LEFT JOIN {target_table} AS {target_alias} ON {target_alias}.\"id\" = {owner}.{}",
                    quote(local_column)
                );
                if hop.target.is_versioned() {
                    match version_column {
                        Some(column) => join.push_str(&format!(
                            " AND {target_alias}.\"version_id\" = {owner}.{}",
                            quote(column)
                        )),
                        None => {
                            join.push_str(&format!(" AND {target_alias}.\"version_id\" = ?"));
                            self.join_params
                                .push(SqlValue::Text(self.context.version_id.clone()));
                        }
                    }
                }
                self.joins.push(join);
            }
            JoinSpec::ToMany {
                reference_column,
                version_column,
            } => {
                let mut join = format!(
                    "LEFT JOIN {target_table} AS {target_alias} ON {target_alias}.{} = {owner}.\"id\"",
                    quote(reference_column)
                );
                if let Some(column) = version_column {
                    join.push_str(&format!(
                        " AND {target_alias}.{} = {owner}.\"version_id\"",
                        quote(column)
                    ));
                }
                if hop.target.is_versioned() {
                    join.push_str(&format!(" AND {target_alias}.\"version_id\" = ?"));
                    self.join_params
                        .push(SqlValue::Text(self.context.version_id.clone()));
                }
                self.joins.push(join);
            }
            JoinSpec::Mapping {
                mapping_table,
                local_column,
                local_version_column,
                reference_column,
                reference_version_column,
            } => {
                let mapping_alias = quote(&format!("{alias}.mapping"));
                let mut join = format!(
                    "LEFT JOIN {} AS {mapping_alias} ON {mapping_alias}.{} = {owner}.\"id\"",
                    quote(mapping_table),
                    quote(local_column)
                );
                if let Some(column) = local_version_column {
                    join.push_str(&format!(
                        " AND {mapping_alias}.{} = {owner}.\"version_id\"",
                        quote(column)
                    ));
                }
                join.push_str(&format!(
                    " LEFT JOIN {target_table} AS {target_alias} ON {target_alias}.\"id\" = {mapping_alias}.{}",
                    quote(reference_column)
                ));
                if let Some(column) = reference_version_column {
                    join.push_str(&format!(
                        " AND {target_alias}.\"version_id\" = {mapping_alias}.{}",
                        quote(column)
                    ));
                }
                self.joins.push(join);
            }
        }

        if hop.field.is_to_many() {
            self.grouped = true;
        }
        alias
    }

    /// One overlay join per language in the fallback chain.
    fn translated_expr(&mut self, definition: &EntityDefinition, alias: &str, field: &Field) -> String {
        let Some(translation) = definition.translation() else {
            return "NULL".to_string();
        };

        let mut candidates = Vec::new();
        for (index, language_id) in self.context.language_chain.iter().enumerate() {
            let overlay = format!("{alias}.translation.{index}");
            if self.joined.insert(overlay.clone()) {
                let overlay_alias = quote(&overlay);
                let mut join = format!(
                    "LEFT JOIN {} AS {overlay_alias} ON {overlay_alias}.{} = {}.\"id\"",
                    quote(&translation.table),
                    quote(&translation.parent_column),
                    quote(alias)
                );
                if let Some(column) = &translation.parent_version_column {
                    join.push_str(&format!(
                        " AND {overlay_alias}.{} = {}.\"version_id\"",
                        quote(column),
                        quote(alias)
                    ));
                }
                join.push_str(&format!(
                    " AND {overlay_alias}.{} = ?",
                    quote(&translation.language_column)
                ));
                self.joins.push(join);
                self.join_params.push(SqlValue::Text(language_id.clone()));
            }
            candidates.push(format!("{}.{}", quote(&overlay), quote(&field.storage)));
        }

        match candidates.len() {
            0 => "NULL".to_string(),
            1 => candidates.remove(0),
            _ => format!("COALESCE({})", candidates.join(", ")),
        }
    }

    fn resolve(&self, path: &str) -> QueryResult<ResolvedField> {
        Ok(self.registry.resolve_field_path(&self.root.name, path)?)
    }

    fn join_path(&mut self, start_alias: &str, hops: &[AssociationRef]) -> String {
        let mut alias = start_alias.to_string();
        for hop in hops {
            alias = self.join_association(&alias, hop);
        }
        alias
    }

    /// Source of a correlated subquery over one association hop.
    fn correlated_source(&self, owner_alias: &str, hop: &AssociationRef) -> CorrelatedSource {
        let alias = format!("{owner_alias}.{}", hop.property());
        let owner = quote(owner_alias);
        let target_alias = quote(&alias);
        let target_table = quote(&hop.target.name);
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        let from = match &hop.join {
            JoinSpec::ToOne {
                local_column,
                version_column,
            } => {
                conditions.push(format!(
                    "{target_alias}.\"id\" = {owner}.{}",
                    quote(local_column)
                ));
                if hop.target.is_versioned() {
                    match version_column {
                        Some(column) => conditions.push(format!(
                            "{target_alias}.\"version_id\" = {owner}.{}",
                            quote(column)
                        )),
                        None => {
                            conditions.push(format!("{target_alias}.\"version_id\" = ?"));
                            params.push(SqlValue::Text(self.context.version_id.clone()));
                        }
                    }
                }
                format!("{target_table} AS {target_alias}")
            }
            JoinSpec::ToMany {
                reference_column,
                version_column,
            } => {
                conditions.push(format!(
                    "{target_alias}.{} = {owner}.\"id\"",
                    quote(reference_column)
                ));
                if let Some(column) = version_column {
                    conditions.push(format!(
                        "{target_alias}.{} = {owner}.\"version_id\"",
                        quote(column)
                    ));
                }
                if hop.target.is_versioned() {
                    conditions.push(format!("{target_alias}.\"version_id\" = ?"));
                    params.push(SqlValue::Text(self.context.version_id.clone()));
                }
                format!("{target_table} AS {target_alias}")
            }
            JoinSpec::Mapping {
                mapping_table,
                local_column,
                local_version_column,
                reference_column,
                reference_version_column,
            } => {
                let mapping_alias = quote(&format!("{alias}.mapping"));
                conditions.push(format!(
                    "{mapping_alias}.{} = {owner}.\"id\"",
                    quote(local_column)
                ));
                if let Some(column) = local_version_column {
                    conditions.push(format!(
                        "{mapping_alias}.{} = {owner}.\"version_id\"",
                        quote(column)
                    ));
                }
                let mut from = format!(
                    "{} AS {mapping_alias} JOIN {target_table} AS {target_alias} ON {target_alias}.\"id\" = {mapping_alias}.{}",
                    quote(mapping_table),
                    quote(reference_column)
                );
                if let Some(column) = reference_version_column {
                    from.push_str(&format!(
                        " AND {target_alias}.\"version_id\" = {mapping_alias}.{}",
                        quote(column)
                    ));
                }
                from
            }
        };

        CorrelatedSource {
            from,
            alias,
            conditions,
            params,
        }
    }

    /// Compiles one leaf predicate.
    ///
    /// A path through a to-many association becomes a correlated `EXISTS`,
    /// so the predicate is decided once per root row and `not` negates the
    /// whole association instead of a single joined child.
    fn leaf_sql<F>(
        &mut self,
        resolved: &ResolvedField,
        params: &mut Vec<SqlValue>,
        predicate: F,
    ) -> QueryResult<String>
    where
        F: FnOnce(&str, &mut Vec<SqlValue>) -> QueryResult<String>,
    {
        let root_alias = self.root.name.clone();
        let Some(split) = resolved.hops.iter().position(|hop| hop.field.is_to_many()) else {
            let alias = self.join_path(&root_alias, &resolved.hops);
            let expression = self.column_expr(&alias, resolved)?;
            return predicate(expression.as_str(), params);
        };

        let owner_alias = self.join_path(&root_alias, &resolved.hops[..split]);
        let source = self.correlated_source(&owner_alias, &resolved.hops[split]);
        let mut sub = PlanBuilder {
            registry: self.registry,
            context: self.context,
            root: self.root.clone(),
            joins: Vec::new(),
            join_params: Vec::new(),
            joined: BTreeSet::from([source.alias.clone()]),
            grouped: false,
        };
        let alias = sub.join_path(&source.alias, &resolved.hops[split + 1..]);
        let expression = sub.column_expr(&alias, resolved)?;
        let mut predicate_params = Vec::new();
        let condition = predicate(expression.as_str(), &mut predicate_params)?;

        let mut sql = format!("EXISTS (SELECT 1 FROM {}", source.from);
        for join in &sub.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        let mut conditions = source.conditions;
        conditions.push(condition);
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
        sql.push(')');

        params.extend(sub.join_params);
        params.extend(source.params);
        params.extend(predicate_params);
        Ok(sql)
    }

    fn field_expr(&mut self, resolved: &ResolvedField) -> QueryResult<String> {
        let root_alias = self.root.name.clone();
        let alias = self.join_path(&root_alias, &resolved.hops);
        self.column_expr(&alias, resolved)
    }

    fn column_expr(&mut self, alias: &str, resolved: &ResolvedField) -> QueryResult<String> {
        let column = if resolved.field.is_translated() {
            self.translated_expr(&resolved.definition, alias, &resolved.field)
        } else if resolved.field.is_stored() {
            format!("{}.{}", quote(alias), quote(&resolved.field.storage))
        } else {
            return Err(QueryError::InvalidFilter(FilterError::InvalidNode {
                reason: format!("`{}` cannot be compared", resolved.field.property),
            }));
        };

        if resolved.json_path.is_empty() {
            return Ok(column);
        }
        for segment in &resolved.json_path {
            if !JSON_PATH_SEGMENT_RE.is_match(segment) {
                return Err(QueryError::Definition(
                    DefinitionError::UnknownField {
                        entity: resolved.definition.name.clone(),
                        field: format!("{}.{}", resolved.field.property, resolved.json_path.join(".")),
                    },
                ));
            }
        }
        Ok(format!("json_extract({column}, '$.{}')", resolved.json_path.join(".")))
    }

    fn filter_sql(&mut self, filter: &Filter, params: &mut Vec<SqlValue>) -> QueryResult<String> {
        match filter {
            Filter::Equals { field, value } => {
                let resolved = self.resolve(field)?;
                let kind = value_kind(&resolved);
                self.leaf_sql(&resolved, params, |expression, params| {
                    if value.is_null() {
                        return Ok(format!("{expression} IS NULL"));
                    }
                    params.push(filter_value_to_sql(kind, value));
                    Ok(format!("{expression} = ?"))
                })
            }
            Filter::EqualsAny { field, values } => {
                let resolved = self.resolve(field)?;
                let kind = value_kind(&resolved);
                self.leaf_sql(&resolved, params, |expression, params| {
                    let non_null: Vec<_> = values.iter().filter(|value| !value.is_null()).collect();
                    let has_null = non_null.len() != values.len();
                    let mut parts = Vec::new();
                    if !non_null.is_empty() {
                        parts.push(format!("{expression} IN ({})", placeholders(non_null.len())));
                        params.extend(non_null.into_iter().map(|value| filter_value_to_sql(kind, value)));
                    }
                    if has_null {
                        parts.push(format!("{expression} IS NULL"));
                    }
                    Ok(match parts.len() {
                        0 => "0 = 1".to_string(),
                        1 => parts.remove(0),
                        _ => format!("({})", parts.join(" OR ")),
                    })
                })
            }
            Filter::Contains { field, value } => {
                let resolved = self.resolve(field)?;
                self.leaf_sql(&resolved, params, |expression, params| {
                    params.push(SqlValue::Text(format!("%{}%", escape_like(value))));
                    Ok(format!("{expression} LIKE ? ESCAPE '\\'"))
                })
            }
            Filter::Range { field, parameters } => {
                let resolved = self.resolve(field)?;
                let kind = value_kind(&resolved);
                self.leaf_sql(&resolved, params, |expression, params| {
                    let parts: Vec<String> = parameters
                        .bounds()
                        .into_iter()
                        .map(|(operator, bound)| {
                            params.push(filter_value_to_sql(kind, bound));
                            format!("{expression} {operator} ?")
                        })
                        .collect();
                    if parts.is_empty() {
                        return Err(QueryError::InvalidFilter(FilterError::InvalidNode {
                            reason: "range needs at least one bound".to_string(),
                        }));
                    }
                    Ok(format!("({})", parts.join(" AND ")))
                })
            }
            Filter::Multi { operator, queries } => self.group_sql(*operator, queries, params),
            Filter::Not { operator, queries } => {
                if queries.is_empty() {
                    return Ok("1 = 1".to_string());
                }
                Ok(format!("NOT {}", self.group_sql(*operator, queries, params)?))
            }
            Filter::Invalid { reason, .. } => Err(QueryError::InvalidFilter(
                FilterError::InvalidNode {
                    reason: reason.clone(),
                },
            )),
        }
    }

    fn group_sql(
        &mut self,
        operator: MultiOperator,
        queries: &[Filter],
        params: &mut Vec<SqlValue>,
    ) -> QueryResult<String> {
        if queries.is_empty() {
            return Ok("1 = 1".to_string());
        }
        let parts = queries
            .iter()
            .map(|query| self.filter_sql(query, params))
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(format!(
            "({})",
            parts.join(&format!(" {} ", operator.as_str()))
        ))
    }

    fn sorting_sql(&mut self, sorting: &FieldSorting) -> QueryResult<String> {
        let resolved = self.resolve(&sorting.field)?;
        let mut expression = self.field_expr(&resolved)?;
        if resolved.crosses_to_many() {
            expression = match sorting.direction {
                SortDirection::Asc => format!("MIN({expression})"),
                SortDirection::Desc => format!("MAX({expression})"),
            };
        }
        if sorting.natural {
            expression = format!("{expression} COLLATE {NATURAL_COLLATION}");
        }
        let direction = match sorting.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let nulls = match sorting.effective_nulls() {
            NullOrdering::First => "NULLS FIRST",
            NullOrdering::Last => "NULLS LAST",
        };
        Ok(format!("{expression} {direction} {nulls}"))
    }
}

fn value_kind(resolved: &ResolvedField) -> Option<ScalarKind> {
    if resolved.json_path.is_empty() {
        resolved.field.scalar_kind()
    } else {
        None
    }
}

pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
