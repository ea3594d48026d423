//! Typed field descriptors.
//!
//! A [`Field`] is a tagged descriptor: the variant of [`FieldKind`] says
//! where the value lives (entity table, translation overlay, or another
//! table reached through an association) and [`FieldFlags`] carries the
//! write/delete semantics.

use serde::Serialize;

/// Storage column filled on insert.
pub const CREATED_AT: &str = "created_at";
/// Storage column filled on update.
pub const UPDATED_AT: &str = "updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScalarKind {
    Id,
    String,
    LongText,
    Int,
    Float,
    Bool,
    Date,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    /// Primary id column `id`.
    Id,
    /// Version column `version_id`, second half of a composite key.
    Version,
    /// Foreign key column pointing at `target.id`.
    Fk { target: String },
    /// Version column paired with an `Fk` to a versioned target.
    ReferenceVersion { target: String },
    /// Plain column on the entity table.
    Scalar(ScalarKind),
    /// Column on the `<entity>_translation` overlay table.
    Translated(ScalarKind),
    ManyToOne {
        target: String,
        local_column: String,
    },
    OneToMany {
        target: String,
        reference_column: String,
    },
    ManyToMany {
        target: String,
        mapping_table: String,
        local_column: String,
        reference_column: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FieldFlags {
    pub primary_key: bool,
    pub required: bool,
    pub cascade_delete: bool,
    pub restrict_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    /// Public camelCase name used in payloads, criteria and results.
    pub property: String,
    /// snake_case storage name (column for stored kinds).
    pub storage: String,
    pub kind: FieldKind,
    pub flags: FieldFlags,
}

impl Field {
    fn new(property: &str, kind: FieldKind) -> Self {
        Self {
            property: property.to_string(),
            storage: to_snake_case(property),
            kind,
            flags: FieldFlags::default(),
        }
    }

    pub fn id() -> Self {
        let mut field = Self::new("id", FieldKind::Id);
        field.flags.primary_key = true;
        field.flags.required = true;
        field
    }

    pub fn version() -> Self {
        let mut field = Self::new("versionId", FieldKind::Version);
        field.flags.primary_key = true;
        field.flags.required = true;
        field
    }

    pub fn fk(property: &str, target: &str) -> Self {
        Self::new(
            property,
            FieldKind::Fk {
                target: target.to_string(),
            },
        )
    }

    pub fn reference_version(property: &str, target: &str) -> Self {
        Self::new(
            property,
            FieldKind::ReferenceVersion {
                target: target.to_string(),
            },
        )
    }

    pub fn string(property: &str) -> Self {
        Self::new(property, FieldKind::Scalar(ScalarKind::String))
    }

    pub fn long_text(property: &str) -> Self {
        Self::new(property, FieldKind::Scalar(ScalarKind::LongText))
    }

    pub fn int(property: &str) -> Self {
        Self::new(property, FieldKind::Scalar(ScalarKind::Int))
    }

    pub fn float(property: &str) -> Self {
        Self::new(property, FieldKind::Scalar(ScalarKind::Float))
    }

    pub fn bool(property: &str) -> Self {
        Self::new(property, FieldKind::Scalar(ScalarKind::Bool))
    }

    pub fn date(property: &str) -> Self {
        Self::new(property, FieldKind::Scalar(ScalarKind::Date))
    }

    pub fn json(property: &str) -> Self {
        Self::new(property, FieldKind::Scalar(ScalarKind::Json))
    }

    pub fn translated(property: &str, kind: ScalarKind) -> Self {
        Self::new(property, FieldKind::Translated(kind))
    }

    pub fn many_to_one(property: &str, target: &str, local_column: &str) -> Self {
        Self::new(
            property,
            FieldKind::ManyToOne {
                target: target.to_string(),
                local_column: local_column.to_string(),
            },
        )
    }

    pub fn one_to_many(property: &str, target: &str, reference_column: &str) -> Self {
        Self::new(
            property,
            FieldKind::OneToMany {
                target: target.to_string(),
                reference_column: reference_column.to_string(),
            },
        )
    }

    pub fn many_to_many(
        property: &str,
        target: &str,
        mapping_table: &str,
        local_column: &str,
        reference_column: &str,
    ) -> Self {
        Self::new(
            property,
            FieldKind::ManyToMany {
                target: target.to_string(),
                mapping_table: mapping_table.to_string(),
                local_column: local_column.to_string(),
                reference_column: reference_column.to_string(),
            },
        )
    }

    pub fn created_at() -> Self {
        Self::date("createdAt")
    }

    pub fn updated_at() -> Self {
        Self::date("updatedAt")
    }

    pub fn primary_key(mut self) -> Self {
        self.flags.primary_key = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.flags.required = true;
        self
    }

    pub fn cascade_delete(mut self) -> Self {
        self.flags.cascade_delete = true;
        self
    }

    pub fn restrict_delete(mut self) -> Self {
        self.flags.restrict_delete = true;
        self
    }

    /// Value type for fields that hold a value (stored or translated).
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match &self.kind {
            FieldKind::Id | FieldKind::Version => Some(ScalarKind::Id),
            FieldKind::Fk { .. } | FieldKind::ReferenceVersion { .. } => Some(ScalarKind::Id),
            FieldKind::Scalar(kind) | FieldKind::Translated(kind) => Some(*kind),
            _ => None,
        }
    }

    /// True when the value is a column of the entity table itself.
    pub fn is_stored(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Id
                | FieldKind::Version
                | FieldKind::Fk { .. }
                | FieldKind::ReferenceVersion { .. }
                | FieldKind::Scalar(_)
        )
    }

    pub fn is_translated(&self) -> bool {
        matches!(self.kind, FieldKind::Translated(_))
    }

    pub fn is_association(&self) -> bool {
        self.association_target().is_some()
    }

    pub fn is_to_many(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::OneToMany { .. } | FieldKind::ManyToMany { .. }
        )
    }

    pub fn association_target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::ManyToOne { target, .. }
            | FieldKind::OneToMany { target, .. }
            | FieldKind::ManyToMany { target, .. } => Some(target.as_str()),
            _ => None,
        }
    }
}

/// `manufacturerId` -> `manufacturer_id`.
pub fn to_snake_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    for ch in value.chars() {
        if ch.is_ascii_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// `manufacturer_id` -> `manufacturerId`.
pub fn to_camel_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut upper_next = false;
    for ch in value.chars() {
        if ch == '_' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Version column paired with a foreign key column: `parent_id` -> `parent_version_id`.
pub fn version_column_for(fk_column: &str) -> String {
    match fk_column.strip_suffix("_id") {
        Some(prefix) => format!("{prefix}_version_id"),
        None => format!("{fk_column}_version_id"),
    }
}

#[cfg(test)]
mod tests {
    use super::{to_camel_case, to_snake_case, version_column_for, Field, FieldKind, ScalarKind};

    #[test]
    fn case_helpers_convert_both_directions() {
        assert_eq!(to_snake_case("productStreamId"), "product_stream_id");
        assert_eq!(to_camel_case("product_stream_id"), "productStreamId");
        assert_eq!(to_snake_case("id"), "id");
    }

    #[test]
    fn version_column_follows_fk_prefix() {
        assert_eq!(version_column_for("product_id"), "product_version_id");
        assert_eq!(version_column_for("parent_id"), "parent_version_id");
    }

    #[test]
    fn constructors_derive_storage_and_kind() {
        let fk = Field::fk("manufacturerId", "product_manufacturer");
        assert_eq!(fk.storage, "manufacturer_id");
        assert!(fk.is_stored());
        assert_eq!(fk.scalar_kind(), Some(ScalarKind::Id));

        let name = Field::translated("name", ScalarKind::String).required();
        assert!(name.is_translated());
        assert!(name.flags.required);

        let products = Field::one_to_many("products", "product", "manufacturer_id").restrict_delete();
        assert!(products.is_to_many());
        assert!(products.flags.restrict_delete);
        assert!(matches!(products.kind, FieldKind::OneToMany { .. }));
    }
}
