//! Filter tree nodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MultiOperator {
    #[default]
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl MultiOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            _ => None,
        }
    }
}

/// Range bounds; at least one must be set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RangeParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<Value>,
}

impl RangeParameters {
    pub fn is_empty(&self) -> bool {
        self.gte.is_none() && self.lte.is_none() && self.gt.is_none() && self.lt.is_none()
    }

    /// `(sql operator, bound)` pairs in a stable order.
    pub fn bounds(&self) -> Vec<(&'static str, &Value)> {
        [
            (">=", self.gte.as_ref()),
            ("<=", self.lte.as_ref()),
            (">", self.gt.as_ref()),
            ("<", self.lt.as_ref()),
        ]
        .into_iter()
        .filter_map(|(operator, bound)| bound.map(|bound| (operator, bound)))
        .collect()
    }
}

/// One node of a filter tree.
///
/// `Invalid` keeps the raw payload a node was parsed from, so a broken
/// persisted tree is reported instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Equals {
        field: String,
        value: Value,
    },
    EqualsAny {
        field: String,
        values: Vec<Value>,
    },
    Contains {
        field: String,
        value: String,
    },
    Range {
        field: String,
        parameters: RangeParameters,
    },
    Multi {
        operator: MultiOperator,
        queries: Vec<Filter>,
    },
    Not {
        operator: MultiOperator,
        queries: Vec<Filter>,
    },
    Invalid {
        raw: Value,
        reason: String,
    },
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn equals_any<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::EqualsAny {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn range(field: impl Into<String>, parameters: RangeParameters) -> Self {
        Self::Range {
            field: field.into(),
            parameters,
        }
    }

    pub fn multi(operator: MultiOperator, queries: Vec<Filter>) -> Self {
        Self::Multi { operator, queries }
    }

    pub fn not(operator: MultiOperator, queries: Vec<Filter>) -> Self {
        Self::Not { operator, queries }
    }

    /// Returns the first reason this tree cannot be executed or persisted.
    pub fn invalid_reason(&self) -> Option<String> {
        match self {
            Self::Invalid { reason, .. } => Some(reason.clone()),
            Self::Equals { field, value } => field_reason(field).or_else(|| {
                matches!(value, Value::String(text) if text.is_empty())
                    .then(|| "equals value must not be empty".to_string())
                    .or_else(|| {
                        matches!(value, Value::Array(_) | Value::Object(_))
                            .then(|| "equals value must be a scalar".to_string())
                    })
            }),
            Self::EqualsAny { field, values } => field_reason(field).or_else(|| {
                values
                    .is_empty()
                    .then(|| "equalsAny needs at least one value".to_string())
            }),
            Self::Contains { field, value } => field_reason(field).or_else(|| {
                value
                    .is_empty()
                    .then(|| "contains value must not be empty".to_string())
            }),
            Self::Range { field, parameters } => field_reason(field).or_else(|| {
                if parameters.is_empty() {
                    return Some("range needs at least one bound".to_string());
                }
                [
                    ("gte", &parameters.gte),
                    ("lte", &parameters.lte),
                    ("gt", &parameters.gt),
                    ("lt", &parameters.lt),
                ]
                .into_iter()
                .find(|(_, bound)| {
                    bound
                        .as_ref()
                        .is_some_and(|bound| !(bound.is_number() || bound.is_string()))
                })
                .map(|(key, _)| format!("range bound `{key}` must be a number or string"))
            }),
            Self::Multi { queries, .. } | Self::Not { queries, .. } => {
                queries.iter().find_map(Filter::invalid_reason)
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.invalid_reason().is_none()
    }

    /// Field paths referenced anywhere in this tree.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Equals { field, .. }
            | Self::EqualsAny { field, .. }
            | Self::Contains { field, .. }
            | Self::Range { field, .. } => out.push(field.as_str()),
            Self::Multi { queries, .. } | Self::Not { queries, .. } => {
                for query in queries {
                    query.collect_fields(out);
                }
            }
            Self::Invalid { .. } => {}
        }
    }
}

fn field_reason(field: &str) -> Option<String> {
    field
        .trim()
        .is_empty()
        .then(|| "field must not be empty".to_string())
}
