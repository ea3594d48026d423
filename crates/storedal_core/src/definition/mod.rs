//! Entity definition registry.
//!
//! # Responsibility
//! - Hold compiled, immutable entity definitions keyed by entity name.
//! - Resolve association paths and dotted field paths into join specs.
//!
//! # Invariants
//! - Definitions are validated once by [`DefinitionRegistryBuilder::build`]
//!   and never mutated afterwards.
//! - Every definition has an `id` primary key; versioned definitions add
//!   `versionId` to the key.
//! - Association targets and their join columns exist in the registry.
//!
//! # See also
//! - `definition::catalog` for the built-in commerce catalog.

pub mod catalog;
pub mod field;

pub use field::{Field, FieldFlags, FieldKind, ScalarKind};

use field::version_column_for;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid identifier regex"));

pub type DefinitionResult<T> = Result<T, DefinitionError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// No definition is registered under this entity name.
    DefinitionNotFound(String),
    /// A path segment does not name an association of `entity`.
    InvalidAssociationPath {
        entity: String,
        path: String,
        segment: String,
    },
    /// The final path segment is not a declared field of `entity`.
    UnknownField { entity: String, field: String },
    /// Definition failed validation at registry build time.
    InvalidDefinition { entity: String, message: String },
}

impl Display for DefinitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DefinitionNotFound(name) => write!(f, "definition not found: `{name}`"),
            Self::InvalidAssociationPath {
                entity,
                path,
                segment,
            } => write!(
                f,
                "invalid association path `{path}`: `{segment}` is not an association of `{entity}`"
            ),
            Self::UnknownField { entity, field } => {
                write!(f, "unknown field `{field}` on entity `{entity}`")
            }
            Self::InvalidDefinition { entity, message } => {
                write!(f, "invalid definition `{entity}`: {message}")
            }
        }
    }
}

impl Error for DefinitionError {}

/// Per-language overlay table of a definition with translated fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationSpec {
    pub table: String,
    pub parent_column: String,
    pub parent_version_column: Option<String>,
    pub language_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDefinition {
    /// Entity name; doubles as the storage table name.
    pub name: String,
    pub fields: Vec<Field>,
    translation: Option<TranslationSpec>,
}

impl EntityDefinition {
    pub fn new(name: &str, fields: Vec<Field>) -> Self {
        let translation = fields
            .iter()
            .any(Field::is_translated)
            .then(|| TranslationSpec {
                table: format!("{name}_translation"),
                parent_column: format!("{name}_id"),
                parent_version_column: fields
                    .iter()
                    .any(|field| field.kind == FieldKind::Version)
                    .then(|| format!("{name}_version_id")),
                language_column: "language_id".to_string(),
            });

        Self {
            name: name.to_string(),
            fields,
            translation,
        }
    }

    pub fn field(&self, property: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.property == property)
    }

    pub fn field_by_storage(&self, storage: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.is_stored() && field.storage == storage)
    }

    pub fn is_versioned(&self) -> bool {
        self.fields.iter().any(|field| field.kind == FieldKind::Version)
    }

    pub fn translation(&self) -> Option<&TranslationSpec> {
        self.translation.as_ref()
    }

    /// Primary key columns in declaration order (`id`, then `version_id`).
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|field| field.flags.primary_key && field.is_stored())
            .map(|field| field.storage.as_str())
            .collect()
    }

    pub fn stored_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|field| field.is_stored())
    }

    pub fn translated_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|field| field.is_translated())
    }

    pub fn associations(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|field| field.is_association())
    }
}

/// How an association is joined from its owner to its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinSpec {
    /// `owner.local_column = target.id`, plus the version pair when the
    /// target is versioned. `version_column` is `None` when the owner does
    /// not store the referenced version; the context version applies then.
    ToOne {
        local_column: String,
        version_column: Option<String>,
    },
    /// `target.reference_column = owner.id`, plus
    /// `target.version_column = owner.version_id` for versioned owners.
    ToMany {
        reference_column: String,
        version_column: Option<String>,
    },
    /// Join through a mapping table.
    Mapping {
        mapping_table: String,
        local_column: String,
        local_version_column: Option<String>,
        reference_column: String,
        reference_version_column: Option<String>,
    },
}

/// Resolved association hop.
#[derive(Debug, Clone)]
pub struct AssociationRef {
    pub owner: Arc<EntityDefinition>,
    pub target: Arc<EntityDefinition>,
    pub field: Field,
    pub join: JoinSpec,
}

impl AssociationRef {
    pub fn property(&self) -> &str {
        &self.field.property
    }
}

/// A dotted field path resolved against the registry.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub hops: Vec<AssociationRef>,
    /// Definition owning `field` (the root when `hops` is empty).
    pub definition: Arc<EntityDefinition>,
    pub field: Field,
    /// Segments descending into a JSON field value.
    pub json_path: Vec<String>,
}

impl ResolvedField {
    pub fn association_path(&self) -> String {
        self.hops
            .iter()
            .map(AssociationRef::property)
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn crosses_to_many(&self) -> bool {
        self.hops.iter().any(|hop| hop.field.is_to_many())
    }
}

/// Read-only registry of compiled definitions. Cloning shares the storage.
#[derive(Debug, Clone)]
pub struct DefinitionRegistry {
    definitions: Arc<BTreeMap<String, Arc<EntityDefinition>>>,
}

impl DefinitionRegistry {
    pub fn builder() -> DefinitionRegistryBuilder {
        DefinitionRegistryBuilder::default()
    }

    pub fn get(&self, entity: &str) -> DefinitionResult<Arc<EntityDefinition>> {
        self.definitions
            .get(entity)
            .cloned()
            .ok_or_else(|| DefinitionError::DefinitionNotFound(entity.to_string()))
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.definitions.contains_key(entity)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<EntityDefinition>> {
        self.definitions.values()
    }

    /// Ordered field list of `entity`.
    pub fn get_fields(&self, entity: &str) -> DefinitionResult<Vec<Field>> {
        Ok(self.get(entity)?.fields.clone())
    }

    /// Resolves an association path (`manufacturer` or `filters.queries`)
    /// and returns the final hop.
    pub fn get_association(&self, entity: &str, path: &str) -> DefinitionResult<AssociationRef> {
        let mut current = self.get(entity)?;
        let mut last = None;
        for segment in path.split('.') {
            let field = current
                .field(segment)
                .filter(|field| field.is_association())
                .cloned()
                .ok_or_else(|| DefinitionError::InvalidAssociationPath {
                    entity: current.name.clone(),
                    path: path.to_string(),
                    segment: segment.to_string(),
                })?;
            let hop = self.association_ref(&current, field)?;
            current = hop.target.clone();
            last = Some(hop);
        }
        last.ok_or_else(|| DefinitionError::InvalidAssociationPath {
            entity: entity.to_string(),
            path: path.to_string(),
            segment: String::new(),
        })
    }

    /// Resolves a dotted field path such as `manufacturer.name`,
    /// `product.categories.id` or `price.gross`.
    ///
    /// A leading segment equal to the entity name is ignored. A path ending
    /// on an association resolves to the target's `id`.
    pub fn resolve_field_path(&self, entity: &str, path: &str) -> DefinitionResult<ResolvedField> {
        let root = self.get(entity)?;
        let mut segments: Vec<&str> = path.split('.').collect();
        if segments.len() > 1 && segments[0] == root.name && root.field(segments[0]).is_none() {
            segments.remove(0);
        }

        let mut hops = Vec::new();
        let mut current = root;
        let mut index = 0;
        while index < segments.len() {
            let segment = segments[index];
            let is_last = index + 1 == segments.len();
            let Some(field) = current.field(segment).cloned() else {
                return Err(if is_last {
                    DefinitionError::UnknownField {
                        entity: current.name.clone(),
                        field: segment.to_string(),
                    }
                } else {
                    DefinitionError::InvalidAssociationPath {
                        entity: current.name.clone(),
                        path: path.to_string(),
                        segment: segment.to_string(),
                    }
                });
            };

            if field.is_association() {
                let hop = self.association_ref(&current, field)?;
                current = hop.target.clone();
                hops.push(hop);
                if is_last {
                    let id = current.field("id").cloned().ok_or_else(|| {
                        DefinitionError::UnknownField {
                            entity: current.name.clone(),
                            field: "id".to_string(),
                        }
                    })?;
                    return Ok(ResolvedField {
                        hops,
                        definition: current,
                        field: id,
                        json_path: Vec::new(),
                    });
                }
                index += 1;
                continue;
            }

            if !is_last && field.scalar_kind() != Some(ScalarKind::Json) {
                return Err(DefinitionError::InvalidAssociationPath {
                    entity: current.name.clone(),
                    path: path.to_string(),
                    segment: segment.to_string(),
                });
            }

            let json_path = segments[index + 1..]
                .iter()
                .map(|segment| segment.to_string())
                .collect();
            return Ok(ResolvedField {
                hops,
                definition: current,
                field,
                json_path,
            });
        }

        Err(DefinitionError::UnknownField {
            entity: entity.to_string(),
            field: path.to_string(),
        })
    }

    fn association_ref(
        &self,
        owner: &Arc<EntityDefinition>,
        field: Field,
    ) -> DefinitionResult<AssociationRef> {
        let target_name = field.association_target().unwrap_or_default().to_string();
        let target = self.get(&target_name)?;
        let join = join_spec(owner, &target, &field);
        Ok(AssociationRef {
            owner: owner.clone(),
            target,
            field,
            join,
        })
    }
}

fn join_spec(owner: &EntityDefinition, target: &EntityDefinition, field: &Field) -> JoinSpec {
    match &field.kind {
        FieldKind::ManyToOne { local_column, .. } => {
            let version_column = version_column_for(local_column);
            JoinSpec::ToOne {
                local_column: local_column.clone(),
                version_column: (target.is_versioned()
                    && owner.field_by_storage(&version_column).is_some())
                .then_some(version_column),
            }
        }
        FieldKind::OneToMany {
            reference_column, ..
        } => JoinSpec::ToMany {
            reference_column: reference_column.clone(),
            version_column: owner
                .is_versioned()
                .then(|| version_column_for(reference_column)),
        },
        FieldKind::ManyToMany {
            mapping_table,
            local_column,
            reference_column,
            ..
        } => JoinSpec::Mapping {
            mapping_table: mapping_table.clone(),
            local_column: local_column.clone(),
            local_version_column: owner
                .is_versioned()
                .then(|| version_column_for(local_column)),
            reference_column: reference_column.clone(),
            reference_version_column: target
                .is_versioned()
                .then(|| version_column_for(reference_column)),
        },
        _ => JoinSpec::ToOne {
            local_column: field.storage.clone(),
            version_column: None,
        },
    }
}

/// Collects definitions and validates them into a [`DefinitionRegistry`].
#[derive(Debug, Default)]
pub struct DefinitionRegistryBuilder {
    definitions: Vec<EntityDefinition>,
}

impl DefinitionRegistryBuilder {
    pub fn register(mut self, definition: EntityDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn build(self) -> DefinitionResult<DefinitionRegistry> {
        let mut definitions = BTreeMap::new();
        for definition in self.definitions {
            validate_shape(&definition)?;
            let name = definition.name.clone();
            if definitions.insert(name.clone(), Arc::new(definition)).is_some() {
                return Err(invalid(&name, "registered twice"));
            }
        }

        for definition in definitions.values() {
            validate_references(definition, &definitions)?;
        }

        Ok(DefinitionRegistry {
            definitions: Arc::new(definitions),
        })
    }
}

fn invalid(entity: &str, message: impl Into<String>) -> DefinitionError {
    DefinitionError::InvalidDefinition {
        entity: entity.to_string(),
        message: message.into(),
    }
}

fn validate_shape(definition: &EntityDefinition) -> DefinitionResult<()> {
    let name = definition.name.as_str();
    if !IDENTIFIER_RE.is_match(name) {
        return Err(invalid(name, "entity name must be a snake_case identifier"));
    }

    let id = definition
        .field("id")
        .ok_or_else(|| invalid(name, "missing `id` field"))?;
    if id.kind != FieldKind::Id || !id.flags.primary_key {
        return Err(invalid(name, "`id` must be the primary key id field"));
    }

    let mut properties = BTreeSet::new();
    let mut columns = BTreeSet::new();
    for field in &definition.fields {
        if !properties.insert(field.property.as_str()) {
            return Err(invalid(
                name,
                format!("duplicate property `{}`", field.property),
            ));
        }
        if !IDENTIFIER_RE.is_match(&field.storage) {
            return Err(invalid(
                name,
                format!("storage name `{}` is not a snake_case identifier", field.storage),
            ));
        }
        if field.is_stored() && !columns.insert(field.storage.as_str()) {
            return Err(invalid(name, format!("duplicate column `{}`", field.storage)));
        }
        if field.flags.primary_key && !matches!(field.kind, FieldKind::Id | FieldKind::Version) {
            return Err(invalid(
                name,
                format!("`{}` cannot be part of the primary key", field.property),
            ));
        }
        if field.flags.cascade_delete && field.flags.restrict_delete {
            return Err(invalid(
                name,
                format!("`{}` cannot both cascade and restrict deletes", field.property),
            ));
        }
        if (field.flags.cascade_delete || field.flags.restrict_delete) && !field.is_to_many() {
            return Err(invalid(
                name,
                format!("delete flags on `{}` require a to-many association", field.property),
            ));
        }
    }

    Ok(())
}

fn validate_references(
    definition: &EntityDefinition,
    all: &BTreeMap<String, Arc<EntityDefinition>>,
) -> DefinitionResult<()> {
    let name = definition.name.as_str();
    let lookup = |target: &str| {
        all.get(target).ok_or_else(|| {
            invalid(name, format!("unknown association target `{target}`"))
        })
    };

    for field in &definition.fields {
        match &field.kind {
            FieldKind::Fk { target } | FieldKind::ReferenceVersion { target } => {
                lookup(target)?;
            }
            FieldKind::ManyToOne {
                target,
                local_column,
            } => {
                lookup(target)?;
                match definition.field_by_storage(local_column) {
                    Some(column) if matches!(column.kind, FieldKind::Fk { .. }) => {}
                    _ => {
                        return Err(invalid(
                            name,
                            format!(
                                "`{}` needs foreign key column `{local_column}`",
                                field.property
                            ),
                        ))
                    }
                }
            }
            FieldKind::OneToMany {
                target,
                reference_column,
            } => {
                let target_definition = lookup(target)?;
                if target_definition.field_by_storage(reference_column).is_none() {
                    return Err(invalid(
                        name,
                        format!("`{target}` has no column `{reference_column}`"),
                    ));
                }
                if definition.is_versioned() {
                    let version_column = version_column_for(reference_column);
                    if target_definition.field_by_storage(&version_column).is_none() {
                        return Err(invalid(
                            name,
                            format!("`{target}` has no version column `{version_column}`"),
                        ));
                    }
                }
            }
            FieldKind::ManyToMany {
                target,
                mapping_table,
                local_column,
                reference_column,
            } => {
                lookup(target)?;
                for identifier in [mapping_table, local_column, reference_column] {
                    if !IDENTIFIER_RE.is_match(identifier) {
                        return Err(invalid(
                            name,
                            format!("mapping identifier `{identifier}` is invalid"),
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}
