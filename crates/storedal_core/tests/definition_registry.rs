use storedal_core::definition::{catalog, JoinSpec};
use storedal_core::{DefinitionError, DefinitionRegistry, EntityDefinition, Field};

#[test]
fn unknown_entity_is_reported_by_name() {
    let registry = catalog::registry();
    assert_eq!(
        registry.get("order").unwrap_err(),
        DefinitionError::DefinitionNotFound("order".to_string())
    );
}

#[test]
fn get_fields_keeps_declaration_order() {
    let registry = catalog::registry();
    let properties: Vec<String> = registry
        .get_fields("product_stream")
        .unwrap()
        .into_iter()
        .map(|field| field.property)
        .collect();
    assert_eq!(
        properties,
        vec![
            "id",
            "apiFilter",
            "invalid",
            "name",
            "description",
            "createdAt",
            "updatedAt",
            "filters"
        ]
    );
}

#[test]
fn association_paths_resolve_to_their_last_hop() {
    let registry = catalog::registry();

    let queries = registry
        .get_association("product_stream", "filters.queries")
        .unwrap();
    assert_eq!(queries.owner.name, "product_stream_filter");
    assert_eq!(queries.target.name, "product_stream_filter");
    assert_eq!(
        queries.join,
        JoinSpec::ToMany {
            reference_column: "parent_id".to_string(),
            version_column: None,
        }
    );

    let categories = registry.get_association("product", "categories").unwrap();
    assert_eq!(
        categories.join,
        JoinSpec::Mapping {
            mapping_table: "product_category".to_string(),
            local_column: "product_id".to_string(),
            local_version_column: Some("product_version_id".to_string()),
            reference_column: "category_id".to_string(),
            reference_version_column: None,
        }
    );
}

#[test]
fn association_path_through_scalar_is_invalid() {
    let registry = catalog::registry();
    assert_eq!(
        registry.get_association("product", "stock").unwrap_err(),
        DefinitionError::InvalidAssociationPath {
            entity: "product".to_string(),
            path: "stock".to_string(),
            segment: "stock".to_string(),
        }
    );
}

#[test]
fn field_paths_cover_prefixes_hops_and_json() {
    let registry = catalog::registry();

    let prefixed = registry.resolve_field_path("product", "product.stock").unwrap();
    assert!(prefixed.hops.is_empty());
    assert_eq!(prefixed.field.storage, "stock");

    let nested = registry
        .resolve_field_path("product", "manufacturer.name")
        .unwrap();
    assert_eq!(nested.association_path(), "manufacturer");
    assert_eq!(nested.definition.name, "product_manufacturer");
    assert!(nested.field.is_translated());
    assert!(!nested.crosses_to_many());

    let json = registry.resolve_field_path("product", "price.gross").unwrap();
    assert_eq!(json.field.property, "price");
    assert_eq!(json.json_path, vec!["gross"]);

    let to_many = registry.resolve_field_path("product", "categories").unwrap();
    assert!(to_many.crosses_to_many());
    assert_eq!(to_many.field.property, "id");
}

#[test]
fn field_path_errors_name_the_broken_segment() {
    let registry = catalog::registry();
    assert_eq!(
        registry
            .resolve_field_path("product", "manufacturer.country")
            .unwrap_err(),
        DefinitionError::UnknownField {
            entity: "product_manufacturer".to_string(),
            field: "country".to_string(),
        }
    );
    assert!(matches!(
        registry.resolve_field_path("product", "stock.value"),
        Err(DefinitionError::InvalidAssociationPath { segment, .. }) if segment == "stock"
    ));
}

#[test]
fn builder_rejects_dangling_association_targets() {
    let err = DefinitionRegistry::builder()
        .register(EntityDefinition::new(
            "owner",
            vec![Field::id(), Field::one_to_many("items", "item", "owner_id")],
        ))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::InvalidDefinition { entity, message }
            if entity == "owner" && message.contains("item")
    ));
}

#[test]
fn builder_rejects_delete_flags_on_to_one() {
    let err = DefinitionRegistry::builder()
        .register(EntityDefinition::new(
            "item",
            vec![
                Field::id(),
                Field::fk("ownerId", "item"),
                Field::many_to_one("owner", "item", "owner_id").cascade_delete(),
            ],
        ))
        .build()
        .unwrap_err();
    assert!(matches!(err, DefinitionError::InvalidDefinition { .. }));
}

#[test]
fn builder_requires_version_column_on_children_of_versioned_owner() {
    let err = DefinitionRegistry::builder()
        .register(EntityDefinition::new(
            "owner",
            vec![
                Field::id(),
                Field::version(),
                Field::one_to_many("items", "item", "owner_id"),
            ],
        ))
        .register(EntityDefinition::new(
            "item",
            vec![Field::id(), Field::fk("ownerId", "owner")],
        ))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::InvalidDefinition { message, .. } if message.contains("owner_version_id")
    ));
}

#[test]
fn builder_rejects_duplicate_registrations() {
    let entity = || EntityDefinition::new("item", vec![Field::id()]);
    let err = DefinitionRegistry::builder()
        .register(entity())
        .register(entity())
        .build()
        .unwrap_err();
    assert!(matches!(err, DefinitionError::InvalidDefinition { .. }));
}
