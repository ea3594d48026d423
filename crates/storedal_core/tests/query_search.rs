use rusqlite::Connection;
use serde_json::{json, Value};
use storedal_core::definition::catalog;
use storedal_core::{
    open_db_in_memory, Context, Criteria, DefinitionError, EntityReader, EntityWriter,
    FieldSorting, Filter, MultiOperator, NullOrdering, QueryError, RangeParameters,
};

const GERMAN: &str = "de000000000000000000000000000001";
const MANUFACTURER: &str = "0a000000000000000000000000000001";
const SHIRT: &str = "0b000000000000000000000000000001";
const JACKET: &str = "0b000000000000000000000000000002";
const SOCKS: &str = "0b000000000000000000000000000003";
const CLOTHING: &str = "0c000000000000000000000000000001";
const SALE: &str = "0c000000000000000000000000000002";

fn seeded() -> Connection {
    let conn = open_db_in_memory().unwrap();
    let registry = catalog::registry();
    let context = Context::default();
    let writer = EntityWriter::new(&conn, &registry, &context);

    writer
        .insert("language", &[json!({"id": GERMAN, "name": "Deutsch"})])
        .unwrap();
    writer
        .insert("product_manufacturer", &[json!({"id": MANUFACTURER, "name": "Acme"})])
        .unwrap();
    writer
        .insert(
            "product",
            &[
                json!({
                    "id": SHIRT,
                    "productNumber": "SW-10",
                    "stock": 10,
                    "active": true,
                    "price": {"gross": 20, "net": 16.8},
                    "name": "Shirt",
                    "translations": {GERMAN: {"name": "Hemd"}},
                    "manufacturerId": MANUFACTURER,
                    "categories": [{"id": CLOTHING, "name": "Clothing"}, {"id": SALE, "name": "Sale"}]
                }),
                json!({
                    "id": JACKET,
                    "productNumber": "SW-9",
                    "stock": 2,
                    "active": true,
                    "price": {"gross": 120, "net": 100.8},
                    "name": "Jacket",
                    "categories": [{"id": CLOTHING}]
                }),
                json!({
                    "id": SOCKS,
                    "productNumber": "SW-100",
                    "stock": 0,
                    "active": false,
                    "price": {"gross": 5, "net": 4.2},
                    "name": "Socks"
                }),
            ],
        )
        .unwrap();
    conn
}

fn search(conn: &Connection, context: &Context, criteria: &Criteria) -> Vec<String> {
    let registry = catalog::registry();
    EntityReader::new(conn, &registry, context)
        .search_ids("product", criteria)
        .unwrap()
}

#[test]
fn equals_and_range_filters_combine_with_and() {
    let conn = seeded();
    let mut criteria = Criteria::new();
    criteria
        .add_filter(Filter::equals("active", true))
        .add_filter(Filter::range(
            "stock",
            RangeParameters {
                gte: Some(json!(5)),
                ..RangeParameters::default()
            },
        ));

    assert_eq!(search(&conn, &Context::default(), &criteria), vec![SHIRT]);
}

#[test]
fn or_and_not_trees_are_applied() {
    let conn = seeded();
    let mut criteria = Criteria::new();
    criteria
        .add_filter(Filter::multi(
            MultiOperator::Or,
            vec![
                Filter::equals("productNumber", "SW-9"),
                Filter::equals("productNumber", "SW-100"),
            ],
        ))
        .add_filter(Filter::not(
            MultiOperator::And,
            vec![Filter::equals("active", false)],
        ));

    assert_eq!(search(&conn, &Context::default(), &criteria), vec![JACKET]);
}

#[test]
fn json_path_filters_reach_into_price() {
    let conn = seeded();
    let mut criteria = Criteria::new();
    criteria
        .add_filter(Filter::range(
            "price.gross",
            RangeParameters {
                gte: Some(json!(10)),
                lt: Some(json!(100)),
                ..RangeParameters::default()
            },
        ));

    assert_eq!(search(&conn, &Context::default(), &criteria), vec![SHIRT]);
}

#[test]
fn natural_sorting_orders_embedded_numbers() {
    let conn = seeded();
    let mut criteria = Criteria::new();
    criteria.add_sorting(FieldSorting::asc("productNumber").natural());

    assert_eq!(
        search(&conn, &Context::default(), &criteria),
        vec![JACKET, SHIRT, SOCKS]
    );
}

#[test]
fn pagination_reports_total_before_limit() {
    let conn = seeded();
    let registry = catalog::registry();
    let context = Context::default();
    let mut criteria = Criteria::new();
    criteria
        .add_sorting(FieldSorting::desc("stock"))
        .set_limit(1)
        .set_offset(1);

    let result = EntityReader::new(&conn, &registry, &context)
        .search("product", &criteria)
        .unwrap();
    assert_eq!(result.total, 3);
    assert_eq!(result.ids(), vec![JACKET]);
}

#[test]
fn translated_fields_fall_back_along_language_chain() {
    let conn = seeded();
    let registry = catalog::registry();
    let context = Context::default().with_language(GERMAN);
    let mut criteria = Criteria::with_ids([SHIRT, JACKET]);
    criteria.add_sorting(FieldSorting::asc("productNumber").natural());

    let result = EntityReader::new(&conn, &registry, &context)
        .search("product", &criteria)
        .unwrap();
    assert_eq!(result.get(SHIRT).unwrap().get_str("name"), Some("Hemd"));
    assert_eq!(result.get(JACKET).unwrap().get_str("name"), Some("Jacket"));
}

#[test]
fn contains_matches_translated_values() {
    let conn = seeded();
    let mut criteria = Criteria::new();
    criteria.add_filter(Filter::contains("name", "ack"));

    assert_eq!(search(&conn, &Context::default(), &criteria), vec![JACKET]);
}

#[test]
fn to_one_association_is_hydrated_or_null() {
    let conn = seeded();
    let registry = catalog::registry();
    let context = Context::default();
    let mut criteria = Criteria::with_ids([SHIRT, SOCKS]);
    criteria.add_association("manufacturer");

    let result = EntityReader::new(&conn, &registry, &context)
        .search("product", &criteria)
        .unwrap();

    let manufacturer = result.get(SHIRT).unwrap().to_one("manufacturer").unwrap();
    assert_eq!(manufacturer["name"], json!("Acme"));
    assert_eq!(result.get(SOCKS).unwrap().get("manufacturer"), Some(&Value::Null));
}

#[test]
fn to_many_association_is_loaded_per_owner() {
    let conn = seeded();
    let registry = catalog::registry();
    let context = Context::default();
    let mut criteria = Criteria::with_ids([SHIRT, SOCKS]);
    criteria
        .add_association("categories")
        .add_sorting(FieldSorting::asc("name"));

    let result = EntityReader::new(&conn, &registry, &context)
        .search("product", &criteria)
        .unwrap();

    let names: Vec<&str> = result
        .get(SHIRT)
        .unwrap()
        .to_many("categories")
        .unwrap()
        .iter()
        .filter_map(|category| category["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Clothing", "Sale"]);
    assert_eq!(
        result.get(SOCKS).unwrap().to_many("categories").map(Vec::len),
        Some(0)
    );
}

#[test]
fn filters_through_to_many_return_each_owner_once() {
    let conn = seeded();
    let mut criteria = Criteria::new();
    criteria
        .add_filter(Filter::equals_any("categories.id", [CLOTHING, SALE]))
        .add_sorting(FieldSorting::asc("productNumber").natural());

    assert_eq!(
        search(&conn, &Context::default(), &criteria),
        vec![JACKET, SHIRT]
    );
}

#[test]
fn not_over_to_many_excludes_any_matching_child() {
    let conn = seeded();
    let mut criteria = Criteria::new();
    criteria
        .add_filter(Filter::not(
            MultiOperator::And,
            vec![Filter::equals("categories.id", SALE)],
        ))
        .add_sorting(FieldSorting::asc("productNumber").natural());

    assert_eq!(
        search(&conn, &Context::default(), &criteria),
        vec![JACKET, SOCKS]
    );
}

#[test]
fn separate_to_many_filters_may_match_different_children() {
    let conn = seeded();
    let mut criteria = Criteria::new();
    criteria
        .add_filter(Filter::equals("categories.id", CLOTHING))
        .add_filter(Filter::equals("categories.id", SALE));

    assert_eq!(search(&conn, &Context::default(), &criteria), vec![SHIRT]);
}

#[test]
fn to_many_filter_and_sorting_together_list_each_owner_once() {
    let conn = seeded();
    let mut criteria = Criteria::new();
    criteria
        .add_filter(Filter::equals("categories.id", CLOTHING))
        .add_sorting(FieldSorting::desc("categories.name"));

    let registry = catalog::registry();
    let context = Context::default();
    let result = EntityReader::new(&conn, &registry, &context)
        .search("product", &criteria)
        .unwrap();
    assert_eq!(result.total, 2);
    assert_eq!(result.ids(), vec![SHIRT, JACKET]);
}

#[test]
fn null_ordering_follows_direction_unless_overridden() {
    let conn = seeded();
    let registry = catalog::registry();
    let context = Context::default();
    EntityWriter::new(&conn, &registry, &context)
        .update(
            "product",
            &[
                json!({"id": SHIRT, "weight": 0.5}),
                json!({"id": JACKET, "weight": 1.5}),
            ],
        )
        .unwrap();

    let sorted = |sorting: FieldSorting| {
        let mut criteria = Criteria::new();
        criteria.add_sorting(sorting);
        search(&conn, &context, &criteria)
    };

    assert_eq!(sorted(FieldSorting::asc("weight")), vec![SOCKS, SHIRT, JACKET]);
    assert_eq!(sorted(FieldSorting::desc("weight")), vec![JACKET, SHIRT, SOCKS]);
    assert_eq!(
        sorted(FieldSorting::asc("weight").nulls(NullOrdering::Last)),
        vec![SHIRT, JACKET, SOCKS]
    );
    assert_eq!(
        sorted(FieldSorting::desc("weight").nulls(NullOrdering::First)),
        vec![SOCKS, JACKET, SHIRT]
    );
}

#[test]
fn filters_through_to_one_association() {
    let conn = seeded();
    let mut criteria = Criteria::new();
    criteria.add_filter(Filter::equals("manufacturer.name", "Acme"));

    assert_eq!(search(&conn, &Context::default(), &criteria), vec![SHIRT]);
}

#[test]
fn other_versions_are_invisible() {
    let conn = seeded();
    let draft = Context::default().with_version("0d000000000000000000000000000009");

    assert!(search(&conn, &draft, &Criteria::new()).is_empty());
}

#[test]
fn unknown_fields_are_rejected() {
    let conn = seeded();
    let registry = catalog::registry();
    let context = Context::default();
    let reader = EntityReader::new(&conn, &registry, &context);

    let mut criteria = Criteria::new();
    criteria.add_filter(Filter::equals("colour", "red"));
    assert!(matches!(
        reader.search("product", &criteria),
        Err(QueryError::Definition(DefinitionError::UnknownField { field, .. })) if field == "colour"
    ));

    let mut criteria = Criteria::new();
    criteria.add_filter(Filter::equals("vendor.name", "Acme"));
    assert!(matches!(
        reader.search("product", &criteria),
        Err(QueryError::Definition(DefinitionError::InvalidAssociationPath { segment, .. })) if segment == "vendor"
    ));
}
