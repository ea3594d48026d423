use serde_json::json;
use storedal_core::{Filter, FilterError, MultiOperator, RangeParameters};

#[test]
fn persisted_tree_parses_and_serializes_canonically() {
    let raw = json!([{
        "type": "multi",
        "operator": "or",
        "queries": [
            {"type": "equalsAny", "field": "product.id", "value": "a|b||c"},
            {"type": "range", "field": "product.stock", "parameters": {"gt": 1, "lte": "9"}},
            {"type": "not", "queries": [{"type": "contains", "field": "product.name", "value": 42}]}
        ]
    }]);

    let filters = Filter::list_from_api(&raw);
    assert_eq!(
        filters,
        vec![Filter::multi(
            MultiOperator::Or,
            vec![
                Filter::equals_any("product.id", ["a", "b", "c"]),
                Filter::range(
                    "product.stock",
                    RangeParameters {
                        gt: Some(json!(1)),
                        lte: Some(json!("9")),
                        ..RangeParameters::default()
                    }
                ),
                Filter::not(
                    MultiOperator::And,
                    vec![Filter::contains("product.name", "42")]
                ),
            ]
        )]
    );

    assert_eq!(
        Filter::list_to_api(&filters).unwrap(),
        json!([{
            "type": "multi",
            "operator": "OR",
            "queries": [
                {"type": "equalsAny", "field": "product.id", "value": ["a", "b", "c"]},
                {"type": "range", "field": "product.stock", "parameters": {"lte": "9", "gt": 1}},
                {
                    "type": "not",
                    "operator": "AND",
                    "queries": [{"type": "contains", "field": "product.name", "value": "42"}]
                }
            ]
        }])
    );
    assert_eq!(
        filters[0].fields(),
        vec!["product.id", "product.stock", "product.name"]
    );
}

#[test]
fn broken_leaf_invalidates_the_whole_list() {
    let filters = Filter::list_from_api(&json!([
        {"type": "equals", "field": "product.id", "value": "P1"},
        {"type": "multi", "queries": [{"type": "range", "field": "stock", "parameters": {}}]}
    ]));

    assert!(filters[0].is_valid());
    assert!(!filters[1].is_valid());
    assert_eq!(
        Filter::list_to_api(&filters).unwrap_err(),
        FilterError::InvalidNode {
            reason: "range needs at least one bound".to_string(),
        }
    );
}

#[test]
fn malformed_nodes_are_kept_as_invalid() {
    let cases = [
        json!("equals"),
        json!({"field": "product.id"}),
        json!({"type": "equals", "value": "P1"}),
        json!({"type": "equals", "field": " ", "value": "P1"}),
        json!({"type": "equals", "field": "product.id"}),
        json!({"type": "equalsAny", "field": "product.id", "value": 3}),
        json!({"type": "range", "field": "stock", "parameters": {"between": 1}}),
        json!({"type": "multi", "operator": "XOR"}),
        json!({"type": "multi", "queries": {}}),
    ];
    for raw in cases {
        assert!(
            matches!(Filter::from_api(&raw), Filter::Invalid { .. }),
            "{raw} should be invalid"
        );
    }
}

#[test]
fn null_equals_is_a_valid_comparison() {
    let filter = Filter::from_api(&json!({"type": "equals", "field": "product.manufacturerId", "value": null}));
    assert_eq!(filter, Filter::equals("product.manufacturerId", json!(null)));
    assert!(filter.is_valid());
}

#[test]
fn non_array_list_is_one_invalid_node() {
    let filters = Filter::list_from_api(&json!({"type": "equals"}));
    assert_eq!(filters.len(), 1);
    assert!(!filters[0].is_valid());
}
