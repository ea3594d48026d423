use serde_json::json;
use std::sync::Arc;
use storedal_core::definition::catalog;
use storedal_core::{
    open_db_in_memory, Context, Criteria, DefinitionError, EntityRepository, EventDispatcher,
    ProductStreamIndexer, RepoError, SqliteEntityRepository, WriteError,
};

const CATEGORY: &str = "0c000000000000000000000000000001";
const STREAM: &str = "5a000000000000000000000000000001";

#[test]
fn create_and_search_roundtrip() {
    let conn = open_db_in_memory().unwrap();
    let registry = catalog::registry();
    let context = Context::default();
    let repo = SqliteEntityRepository::try_new(&conn, &registry, "category").unwrap();

    repo.create(&[json!({"id": CATEGORY, "name": "Clothing", "active": true})], &context)
        .unwrap();

    let result = repo.search(&Criteria::with_ids([CATEGORY]), &context).unwrap();
    let category = result.first().unwrap();
    assert_eq!(repo.definition().name, "category");
    assert_eq!(category.id(), Some(CATEGORY));
    assert_eq!(category.get_str("name"), Some("Clothing"));
    assert_eq!(category.get_bool("active"), Some(true));
    assert_eq!(category.get("parentId"), Some(&json!(null)));
}

#[test]
fn update_and_delete_go_through_the_writer() {
    let conn = open_db_in_memory().unwrap();
    let registry = catalog::registry();
    let context = Context::default();
    let repo = SqliteEntityRepository::try_new(&conn, &registry, "category").unwrap();

    repo.upsert(&[json!({"id": CATEGORY, "name": "Clothing"})], &context)
        .unwrap();
    repo.update(&[json!({"id": CATEGORY, "active": false})], &context)
        .unwrap();
    assert_eq!(
        repo.search_ids(&Criteria::new(), &context).unwrap(),
        vec![CATEGORY]
    );

    let summary = repo.delete(&[json!(CATEGORY)], &context).unwrap();
    assert_eq!(summary.event("category").unwrap().ids, vec![CATEGORY]);
    assert!(repo.search_ids(&Criteria::new(), &context).unwrap().is_empty());

    let err = repo
        .update(&[json!({"id": CATEGORY, "active": true})], &context)
        .unwrap_err();
    assert!(matches!(err, RepoError::Write(WriteError::NotFound { .. })));
}

#[test]
fn unknown_entity_cannot_get_a_repository() {
    let conn = open_db_in_memory().unwrap();
    let registry = catalog::registry();

    match SqliteEntityRepository::try_new(&conn, &registry, "order") {
        Err(RepoError::Definition(DefinitionError::DefinitionNotFound(name))) => {
            assert_eq!(name, "order")
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("repository for unknown entity"),
    }
}

#[test]
fn repository_writes_notify_subscribers() {
    let conn = open_db_in_memory().unwrap();
    let registry = catalog::registry();
    let context = Context::default();
    let mut dispatcher = EventDispatcher::new();
    dispatcher.subscribe(Arc::new(ProductStreamIndexer::new(registry.clone())));
    let repo = SqliteEntityRepository::try_new(&conn, &registry, "product_stream")
        .unwrap()
        .with_dispatcher(&dispatcher);

    repo.create(&[json!({"id": STREAM, "name": "All", "filters": []})], &context)
        .unwrap();

    let stream = repo
        .search(&Criteria::with_ids([STREAM]), &context)
        .unwrap();
    let stream = stream.first().unwrap();
    assert_eq!(stream.get_bool("invalid"), Some(false));
    assert_eq!(stream.get("apiFilter"), Some(&json!([])));
}
