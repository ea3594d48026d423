//! Built-in commerce catalog definitions.
//!
//! # Invariants
//! - Every definition here has a matching table in `db/migrations`.
//! - The registry is built once per process and is read-only afterwards.

use super::field::{Field, ScalarKind};
use super::{DefinitionRegistry, EntityDefinition};
use once_cell::sync::Lazy;

static CATALOG: Lazy<DefinitionRegistry> = Lazy::new(|| {
    DefinitionRegistry::builder()
        .register(language())
        .register(currency())
        .register(product_manufacturer())
        .register(product())
        .register(category())
        .register(product_stream())
        .register(product_stream_filter())
        .build()
        .expect("valid built-in catalog definitions")
});

/// Shared registry of the built-in catalog.
pub fn registry() -> DefinitionRegistry {
    CATALOG.clone()
}

fn language() -> EntityDefinition {
    EntityDefinition::new(
        "language",
        vec![
            Field::id(),
            Field::string("name").required(),
            Field::created_at(),
            Field::updated_at(),
        ],
    )
}

fn currency() -> EntityDefinition {
    EntityDefinition::new(
        "currency",
        vec![
            Field::id(),
            Field::string("isoCode").required(),
            Field::float("factor").required(),
            Field::created_at(),
            Field::updated_at(),
        ],
    )
}

fn product_manufacturer() -> EntityDefinition {
    EntityDefinition::new(
        "product_manufacturer",
        vec![
            Field::id(),
            Field::string("link"),
            Field::translated("name", ScalarKind::String).required(),
            Field::translated("description", ScalarKind::LongText),
            Field::created_at(),
            Field::updated_at(),
            Field::one_to_many("products", "product", "manufacturer_id").restrict_delete(),
        ],
    )
}

fn product() -> EntityDefinition {
    EntityDefinition::new(
        "product",
        vec![
            Field::id(),
            Field::version(),
            Field::string("productNumber").required(),
            Field::int("stock").required(),
            Field::bool("active"),
            Field::json("price"),
            Field::float("weight"),
            Field::date("releaseDate"),
            Field::fk("manufacturerId", "product_manufacturer"),
            Field::translated("name", ScalarKind::String).required(),
            Field::translated("description", ScalarKind::LongText),
            Field::created_at(),
            Field::updated_at(),
            Field::many_to_one("manufacturer", "product_manufacturer", "manufacturer_id"),
            Field::many_to_many(
                "categories",
                "category",
                "product_category",
                "product_id",
                "category_id",
            )
            .cascade_delete(),
        ],
    )
}

fn category() -> EntityDefinition {
    EntityDefinition::new(
        "category",
        vec![
            Field::id(),
            Field::fk("parentId", "category"),
            Field::bool("active"),
            Field::translated("name", ScalarKind::String).required(),
            Field::created_at(),
            Field::updated_at(),
            Field::many_to_one("parent", "category", "parent_id"),
            Field::one_to_many("children", "category", "parent_id").cascade_delete(),
            Field::many_to_many(
                "products",
                "product",
                "product_category",
                "category_id",
                "product_id",
            )
            .cascade_delete(),
        ],
    )
}

fn product_stream() -> EntityDefinition {
    EntityDefinition::new(
        "product_stream",
        vec![
            Field::id(),
            Field::json("apiFilter"),
            Field::bool("invalid"),
            Field::translated("name", ScalarKind::String).required(),
            Field::translated("description", ScalarKind::LongText),
            Field::created_at(),
            Field::updated_at(),
            Field::one_to_many("filters", "product_stream_filter", "product_stream_id")
                .cascade_delete(),
        ],
    )
}

fn product_stream_filter() -> EntityDefinition {
    EntityDefinition::new(
        "product_stream_filter",
        vec![
            Field::id(),
            Field::fk("productStreamId", "product_stream").required(),
            Field::fk("parentId", "product_stream_filter"),
            Field::string("type").required(),
            Field::string("field"),
            Field::string("operator"),
            Field::long_text("value"),
            Field::json("parameters"),
            Field::int("position"),
            Field::created_at(),
            Field::updated_at(),
            Field::many_to_one("productStream", "product_stream", "product_stream_id"),
            Field::many_to_one("parent", "product_stream_filter", "parent_id"),
            Field::one_to_many("queries", "product_stream_filter", "parent_id").cascade_delete(),
        ],
    )
}
