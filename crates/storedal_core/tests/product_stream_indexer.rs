use rusqlite::{params, Connection};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use storedal_core::cache::{CacheStore, CachedResponse, InMemoryCacheStore};
use storedal_core::definition::catalog;
use storedal_core::{
    open_db_in_memory, Context, EntityWriter, EventDispatcher, IndexOutcome, ProductStreamIndexer,
};

const STREAM_1: &str = "5a000000000000000000000000000001";
const STREAM_2: &str = "5a000000000000000000000000000002";
const STREAM_3: &str = "5a000000000000000000000000000003";
const FILTER_1: &str = "5f000000000000000000000000000001";
const FILTER_2: &str = "5f000000000000000000000000000002";
const FILTER_3: &str = "5f000000000000000000000000000003";

#[test]
fn valid_filter_tree_is_persisted_canonically() {
    let conn = open_db_in_memory().unwrap();
    insert_stream(
        &conn,
        STREAM_1,
        json!([{"id": FILTER_1, "type": "equals", "field": "product.id", "value": "P1"}]),
    );
    assert_eq!(stream_state(&conn, STREAM_1), (None, true));

    let report = indexer().update(&conn, &[STREAM_1.to_string()]);

    assert_eq!(report.outcome(STREAM_1), Some(&IndexOutcome::Valid));
    assert_eq!(
        stream_state(&conn, STREAM_1),
        (
            Some(json!([{"type": "equals", "field": "product.id", "value": "P1"}])),
            false
        )
    );
}

#[test]
fn unknown_node_type_marks_stream_invalid() {
    let conn = open_db_in_memory().unwrap();
    insert_stream(&conn, STREAM_2, json!([{"id": FILTER_1, "type": "bogus"}]));

    let report = indexer().update(&conn, &[STREAM_2.to_string()]);

    match report.outcome(STREAM_2) {
        Some(IndexOutcome::Invalid { reason }) => assert!(reason.contains("bogus")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(stream_state(&conn, STREAM_2), (None, true));
}

#[test]
fn nested_multi_with_range_parameters_round_trips() {
    let conn = open_db_in_memory().unwrap();
    insert_stream(
        &conn,
        STREAM_1,
        json!([{
            "id": FILTER_1,
            "type": "multi",
            "operator": "OR",
            "queries": [
                {
                    "id": FILTER_2,
                    "type": "range",
                    "field": "product.stock",
                    "parameters": {"gte": 10},
                    "position": 0
                },
                {
                    "id": FILTER_3,
                    "type": "equals",
                    "field": "product.active",
                    "value": "1",
                    "position": 1
                }
            ]
        }]),
    );

    indexer().update(&conn, &[STREAM_1.to_string()]);

    assert_eq!(
        stream_state(&conn, STREAM_1),
        (
            Some(json!([{
                "type": "multi",
                "operator": "OR",
                "queries": [
                    {"type": "range", "field": "product.stock", "parameters": {"gte": 10}},
                    {"type": "equals", "field": "product.active", "value": "1"}
                ]
            }])),
            false
        )
    );
}

#[test]
fn empty_leaf_value_invalidates_whole_stream() {
    let conn = open_db_in_memory().unwrap();
    insert_stream(
        &conn,
        STREAM_1,
        json!([{
            "id": FILTER_1,
            "type": "multi",
            "queries": [
                {"id": FILTER_2, "type": "equals", "field": "product.id", "value": ""},
                {"id": FILTER_3, "type": "equals", "field": "product.id", "value": "P1"}
            ]
        }]),
    );

    let report = indexer().update(&conn, &[STREAM_1.to_string()]);

    assert!(matches!(
        report.outcome(STREAM_1),
        Some(IndexOutcome::Invalid { .. })
    ));
    assert_eq!(stream_state(&conn, STREAM_1), (None, true));
}

#[test]
fn one_broken_stream_does_not_block_the_batch() {
    let conn = open_db_in_memory().unwrap();
    insert_stream(
        &conn,
        STREAM_1,
        json!([{"id": FILTER_1, "type": "equals", "field": "product.id", "value": "P1"}]),
    );
    insert_stream(&conn, STREAM_2, json!([{"id": FILTER_2, "type": "bogus"}]));

    let report = indexer().update(
        &conn,
        &[
            STREAM_1.to_string(),
            STREAM_2.to_string(),
            STREAM_3.to_string(),
        ],
    );

    assert_eq!(report.len(), 3);
    assert_eq!(report.valid_count(), 1);
    assert_eq!(report.invalid_count(), 1);
    assert_eq!(report.outcome(STREAM_3), Some(&IndexOutcome::Missing));
    assert!(!stream_state(&conn, STREAM_1).1);
    assert!(stream_state(&conn, STREAM_2).1);
}

#[test]
fn recompute_is_idempotent() {
    let conn = open_db_in_memory().unwrap();
    insert_stream(
        &conn,
        STREAM_1,
        json!([{"id": FILTER_1, "type": "equalsAny", "field": "product.id", "value": "P1|P2"}]),
    );
    let indexer = indexer();

    indexer.update(&conn, &[STREAM_1.to_string()]);
    let first = stream_state(&conn, STREAM_1);
    indexer.update(&conn, &[STREAM_1.to_string()]);

    assert_eq!(stream_state(&conn, STREAM_1), first);
    assert_eq!(
        first.0,
        Some(json!([{"type": "equalsAny", "field": "product.id", "value": ["P1", "P2"]}]))
    );
}

#[test]
fn index_all_walks_every_stream_in_batches() {
    let conn = open_db_in_memory().unwrap();
    insert_stream(
        &conn,
        STREAM_1,
        json!([{"id": FILTER_1, "type": "equals", "field": "product.id", "value": "P1"}]),
    );
    insert_stream(&conn, STREAM_2, json!([{"id": FILTER_2, "type": "bogus"}]));
    insert_stream(&conn, STREAM_3, json!([]));

    let report = indexer().index_all(&conn, 2).unwrap();

    assert_eq!(report.len(), 3);
    assert_eq!(report.valid_count(), 2);
    assert_eq!(report.invalid_count(), 1);
    assert_eq!(stream_state(&conn, STREAM_3), (Some(json!([])), false));
}

#[test]
fn writes_through_dispatcher_keep_streams_current() {
    let conn = open_db_in_memory().unwrap();
    let registry = catalog::registry();
    let context = Context::default();
    let mut dispatcher = EventDispatcher::new();
    dispatcher.subscribe(Arc::new(ProductStreamIndexer::new(registry.clone())));
    let writer = EntityWriter::new(&conn, &registry, &context).with_dispatcher(&dispatcher);

    writer
        .insert(
            "product_stream",
            &[json!({
                "id": STREAM_1,
                "name": "Stream",
                "filters": [{"id": FILTER_1, "type": "equals", "field": "product.id", "value": "P1"}]
            })],
        )
        .unwrap();
    assert!(!stream_state(&conn, STREAM_1).1);

    writer
        .update("product_stream_filter", &[json!({"id": FILTER_1, "value": ""})])
        .unwrap();
    assert_eq!(stream_state(&conn, STREAM_1), (None, true));

    writer
        .delete("product_stream_filter", &[json!(FILTER_1)])
        .unwrap();
    assert_eq!(stream_state(&conn, STREAM_1), (Some(json!([])), false));
}

#[test]
fn moving_a_filter_recomputes_both_streams() {
    let conn = open_db_in_memory().unwrap();
    let registry = catalog::registry();
    let context = Context::default();
    let mut dispatcher = EventDispatcher::new();
    dispatcher.subscribe(Arc::new(ProductStreamIndexer::new(registry.clone())));
    let writer = EntityWriter::new(&conn, &registry, &context).with_dispatcher(&dispatcher);

    writer
        .insert(
            "product_stream",
            &[
                json!({
                    "id": STREAM_1,
                    "name": "Source",
                    "filters": [{"id": FILTER_1, "type": "equals", "field": "product.id", "value": "P1"}]
                }),
                json!({
                    "id": STREAM_2,
                    "name": "Destination",
                    "filters": [{"id": FILTER_2, "type": "equals", "field": "product.id", "value": "P2"}]
                }),
            ],
        )
        .unwrap();

    let summary = writer
        .update(
            "product_stream_filter",
            &[json!({"id": FILTER_1, "productStreamId": STREAM_2})],
        )
        .unwrap();

    let event = summary.event("product_stream_filter").unwrap();
    assert_eq!(
        event.replaced_references,
        vec![json!({"productStreamId": STREAM_1}).as_object().cloned().unwrap()]
    );
    assert_eq!(stream_state(&conn, STREAM_1), (Some(json!([])), false));
    let (moved_to, invalid) = stream_state(&conn, STREAM_2);
    assert!(!invalid);
    assert_eq!(moved_to.unwrap().as_array().map(Vec::len), Some(2));
}

#[test]
fn product_writes_recompute_streams_filtering_on_their_fields() {
    let conn = open_db_in_memory().unwrap();
    let registry = catalog::registry();
    let context = Context::default();
    insert_stream(
        &conn,
        STREAM_1,
        json!([{"id": FILTER_1, "type": "range", "field": "product.stock", "parameters": {"lt": 5}}]),
    );
    insert_stream(
        &conn,
        STREAM_2,
        json!([{"id": FILTER_2, "type": "equals", "field": "product.weight", "value": "1"}]),
    );

    let mut dispatcher = EventDispatcher::new();
    dispatcher.subscribe(Arc::new(ProductStreamIndexer::new(registry.clone())));
    EntityWriter::new(&conn, &registry, &context)
        .with_dispatcher(&dispatcher)
        .insert(
            "product",
            &[json!({"productNumber": "SW-1", "stock": 3, "name": "Shirt"})],
        )
        .unwrap();

    assert!(!stream_state(&conn, STREAM_1).1);
    assert!(stream_state(&conn, STREAM_2).1);
}

#[test]
fn recompute_purges_cached_stream_responses() {
    let conn = open_db_in_memory().unwrap();
    insert_stream(
        &conn,
        STREAM_1,
        json!([{"id": FILTER_1, "type": "equals", "field": "product.id", "value": "P1"}]),
    );
    let store = Arc::new(InMemoryCacheStore::new());
    store.write(
        "listing",
        CachedResponse {
            status: 200,
            headers: Vec::new(),
            body: "[]".to_string(),
        },
        &[format!("product_stream-{STREAM_1}")],
        Duration::from_secs(60),
    );
    store.write(
        "unrelated",
        CachedResponse {
            status: 200,
            headers: Vec::new(),
            body: "{}".to_string(),
        },
        &["product-x".to_string()],
        Duration::from_secs(60),
    );

    ProductStreamIndexer::new(catalog::registry())
        .with_cache(store.clone())
        .update(&conn, &[STREAM_1.to_string()]);

    assert!(store.lookup("listing").is_none());
    assert!(store.lookup("unrelated").is_some());
}

fn indexer() -> ProductStreamIndexer {
    ProductStreamIndexer::new(catalog::registry())
}

fn insert_stream(conn: &Connection, id: &str, filters: Value) {
    let registry = catalog::registry();
    let context = Context::default();
    EntityWriter::new(conn, &registry, &context)
        .insert(
            "product_stream",
            &[json!({"id": id, "name": format!("stream {id}"), "filters": filters})],
        )
        .unwrap();
}

/// `(api_filter, invalid)` as stored.
fn stream_state(conn: &Connection, id: &str) -> (Option<Value>, bool) {
    conn.query_row(
        "SELECT api_filter, invalid FROM product_stream WHERE id = ?1",
        params![id],
        |row| {
            let api_filter: Option<String> = row.get(0)?;
            let invalid: bool = row.get(1)?;
            Ok((
                api_filter.map(|text| serde_json::from_str(&text).unwrap()),
                invalid,
            ))
        },
    )
    .unwrap()
}
