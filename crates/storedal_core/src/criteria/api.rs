//! Persisted ("api") representation of filter trees.
//!
//! # Responsibility
//! - Parse `{type, field?, value?, parameters?, operator?, queries?}` nodes
//!   into [`Filter`] trees without ever failing.
//! - Serialize valid trees back into the same shape.
//!
//! # Invariants
//! - Parsing never returns an error: a malformed node becomes
//!   [`Filter::Invalid`] carrying the raw node.
//! - For every valid tree `f`, `from_api(to_api(f)) == f`.
//! - `equalsAny` accepts an array or a `|`-joined string and is always
//!   written back as an array.

use super::filter::{Filter, MultiOperator, RangeParameters};
use serde::Serialize;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type FilterResult<T> = Result<T, FilterError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Tree contains a node that cannot be serialized or executed.
    InvalidNode { reason: String },
}

impl Display for FilterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidNode { reason } => write!(f, "invalid filter node: {reason}"),
        }
    }
}

impl Error for FilterError {}

/// Canonical wire shape of one filter node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiFilterNode {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<RangeParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<MultiOperator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queries: Option<Vec<ApiFilterNode>>,
}

impl Filter {
    /// Parses one persisted node.
    pub fn from_api(raw: &Value) -> Filter {
        let Some(node) = raw.as_object() else {
            return invalid(raw, "filter node must be an object");
        };
        let Some(kind) = node.get("type").and_then(Value::as_str) else {
            return invalid(raw, "filter node has no `type`");
        };

        match kind {
            "equals" => {
                let field = match required_field(raw, node) {
                    Ok(field) => field,
                    Err(filter) => return filter,
                };
                let Some(value) = node.get("value") else {
                    return invalid(raw, "equals filter has no `value`");
                };
                checked(raw, Filter::Equals {
                    field,
                    value: value.clone(),
                })
            }
            "equalsAny" => {
                let field = match required_field(raw, node) {
                    Ok(field) => field,
                    Err(filter) => return filter,
                };
                let values = match node.get("value") {
                    Some(Value::Array(values)) => values.clone(),
                    Some(Value::String(joined)) => joined
                        .split('|')
                        .filter(|part| !part.is_empty())
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                    _ => return invalid(raw, "equalsAny filter needs a list `value`"),
                };
                checked(raw, Filter::EqualsAny { field, values })
            }
            "contains" => {
                let field = match required_field(raw, node) {
                    Ok(field) => field,
                    Err(filter) => return filter,
                };
                let value = match node.get("value") {
                    Some(Value::String(text)) => text.clone(),
                    Some(Value::Number(number)) => number.to_string(),
                    _ => return invalid(raw, "contains filter needs a string `value`"),
                };
                checked(raw, Filter::Contains { field, value })
            }
            "range" => {
                let field = match required_field(raw, node) {
                    Ok(field) => field,
                    Err(filter) => return filter,
                };
                match parse_range_parameters(node.get("parameters")) {
                    Ok(parameters) => checked(raw, Filter::Range { field, parameters }),
                    Err(reason) => invalid(raw, &reason),
                }
            }
            "multi" | "not" => {
                let operator = match node.get("operator") {
                    None | Some(Value::Null) => MultiOperator::And,
                    Some(Value::String(text)) => match MultiOperator::parse(text) {
                        Some(operator) => operator,
                        None => return invalid(raw, &format!("unknown operator `{text}`")),
                    },
                    Some(_) => return invalid(raw, "operator must be a string"),
                };
                let queries = match node.get("queries") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items.iter().map(Filter::from_api).collect(),
                    Some(_) => return invalid(raw, "queries must be a list"),
                };
                if kind == "multi" {
                    Filter::Multi { operator, queries }
                } else {
                    Filter::Not { operator, queries }
                }
            }
            other => invalid(raw, &format!("unknown filter type `{other}`")),
        }
    }

    /// Parses a persisted list of top-level nodes.
    pub fn list_from_api(raw: &Value) -> Vec<Filter> {
        match raw {
            Value::Array(items) => items.iter().map(Filter::from_api).collect(),
            other => vec![invalid(other, "filter list must be an array")],
        }
    }

    /// Serializes a valid tree into its canonical node.
    pub fn to_api_node(&self) -> FilterResult<ApiFilterNode> {
        let node = |kind, field: &str| ApiFilterNode {
            kind,
            field: Some(field.to_string()),
            value: None,
            parameters: None,
            operator: None,
            queries: None,
        };

        Ok(match self {
            Self::Equals { field, value } => ApiFilterNode {
                value: Some(value.clone()),
                ..node("equals", field)
            },
            Self::EqualsAny { field, values } => ApiFilterNode {
                value: Some(Value::Array(values.clone())),
                ..node("equalsAny", field)
            },
            Self::Contains { field, value } => ApiFilterNode {
                value: Some(Value::String(value.clone())),
                ..node("contains", field)
            },
            Self::Range { field, parameters } => ApiFilterNode {
                parameters: Some(parameters.clone()),
                ..node("range", field)
            },
            Self::Multi { operator, queries } | Self::Not { operator, queries } => {
                ApiFilterNode {
                    kind: if matches!(self, Self::Multi { .. }) {
                        "multi"
                    } else {
                        "not"
                    },
                    field: None,
                    value: None,
                    parameters: None,
                    operator: Some(*operator),
                    queries: Some(
                        queries
                            .iter()
                            .map(Filter::to_api_node)
                            .collect::<FilterResult<Vec<_>>>()?,
                    ),
                }
            }
            Self::Invalid { reason, .. } => {
                return Err(FilterError::InvalidNode {
                    reason: reason.clone(),
                })
            }
        })
    }

    pub fn to_api(&self) -> FilterResult<Value> {
        if let Some(reason) = self.invalid_reason() {
            return Err(FilterError::InvalidNode { reason });
        }
        serde_json::to_value(self.to_api_node()?).map_err(|err| FilterError::InvalidNode {
            reason: err.to_string(),
        })
    }

    pub fn list_to_api(filters: &[Filter]) -> FilterResult<Value> {
        filters
            .iter()
            .map(Filter::to_api)
            .collect::<FilterResult<Vec<_>>>()
            .map(Value::Array)
    }
}

fn invalid(raw: &Value, reason: &str) -> Filter {
    Filter::Invalid {
        raw: raw.clone(),
        reason: reason.to_string(),
    }
}

/// Leaf nodes that parsed but carry empty content are invalid as a whole.
fn checked(raw: &Value, filter: Filter) -> Filter {
    match filter.invalid_reason() {
        Some(reason) => invalid(raw, &reason),
        None => filter,
    }
}

fn required_field(raw: &Value, node: &Map<String, Value>) -> Result<String, Filter> {
    match node.get("field") {
        Some(Value::String(field)) if !field.trim().is_empty() => Ok(field.clone()),
        _ => Err(invalid(raw, "filter node needs a non-empty `field`")),
    }
}

fn parse_range_parameters(raw: Option<&Value>) -> Result<RangeParameters, String> {
    let parameters = match raw {
        Some(Value::Object(parameters)) => parameters.clone(),
        // Stored rows keep parameters as JSON text.
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(parameters)) => parameters,
            _ => return Err("range parameters must be an object".to_string()),
        },
        _ => return Err("range filter needs `parameters`".to_string()),
    };

    let mut out = RangeParameters::default();
    for (key, bound) in parameters {
        if !(bound.is_number() || bound.is_string()) {
            return Err(format!("range bound `{key}` must be a number or string"));
        }
        match key.as_str() {
            "gte" => out.gte = Some(bound),
            "lte" => out.lte = Some(bound),
            "gt" => out.gt = Some(bound),
            "lt" => out.lt = Some(bound),
            other => return Err(format!("unknown range parameter `{other}`")),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::criteria::{Filter, MultiOperator, RangeParameters};
    use serde_json::json;

    #[test]
    fn equals_any_accepts_pipe_joined_values() {
        let filter = Filter::from_api(&json!({
            "type": "equalsAny",
            "field": "id",
            "value": "a|b"
        }));
        assert_eq!(filter, Filter::equals_any("id", ["a", "b"]));
    }

    #[test]
    fn multi_without_operator_defaults_to_and() {
        let filter = Filter::from_api(&json!({
            "type": "multi",
            "queries": [{"type": "equals", "field": "stock", "value": 1000}]
        }));
        assert_eq!(
            filter,
            Filter::multi(MultiOperator::And, vec![Filter::equals("stock", 1000)])
        );
    }

    #[test]
    fn unknown_type_keeps_raw_payload() {
        let raw = json!({"type": "bogus", "field": "id"});
        match Filter::from_api(&raw) {
            Filter::Invalid { raw: kept, reason } => {
                assert_eq!(kept, raw);
                assert!(reason.contains("bogus"));
            }
            other => panic!("unexpected filter: {other:?}"),
        }
    }

    #[test]
    fn range_parameters_from_stored_json_text() {
        let filter = Filter::from_api(&json!({
            "type": "range",
            "field": "price.gross",
            "parameters": "{\"gte\":10}"
        }));
        assert_eq!(
            filter,
            Filter::range(
                "price.gross",
                RangeParameters {
                    gte: Some(json!(10)),
                    ..RangeParameters::default()
                }
            )
        );
    }

    #[test]
    fn serialization_omits_absent_keys() {
        let value = Filter::equals("product.id", "P1").to_api().unwrap();
        assert_eq!(
            value,
            json!({"type": "equals", "field": "product.id", "value": "P1"})
        );
    }
}
