//! Conversions between JSON payload values and SQLite storage values.
//!
//! # Invariants
//! - Write conversions are strict: a value of the wrong shape is rejected.
//! - Filter conversions are lenient: a comparison value that does not fit
//!   the column type is bound as-is and simply matches nothing.
//! - Ids are stored as 32-char lowercase hex.

use crate::definition::ScalarKind;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value as JsonValue};

/// Normalizes an id (`"0FA9...-..."` or simple hex) to 32-char lowercase hex.
pub fn normalize_id(raw: &str) -> Option<String> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|ch| *ch != '-')
        .map(|ch| ch.to_ascii_lowercase())
        .collect();
    (compact.len() == 32 && compact.chars().all(|ch| ch.is_ascii_hexdigit())).then_some(compact)
}

/// Converts a payload value into the storage value of a `kind` column.
pub fn json_to_sql(kind: ScalarKind, value: &JsonValue) -> Result<SqlValue, String> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    match kind {
        ScalarKind::Id => value
            .as_str()
            .and_then(normalize_id)
            .map(SqlValue::Text)
            .ok_or_else(|| format!("expected hex id, got {}", describe(value))),
        ScalarKind::String | ScalarKind::LongText => value
            .as_str()
            .map(|text| SqlValue::Text(text.to_string()))
            .ok_or_else(|| format!("expected string, got {}", describe(value))),
        ScalarKind::Int | ScalarKind::Date => value
            .as_i64()
            .map(SqlValue::Integer)
            .ok_or_else(|| format!("expected integer, got {}", describe(value))),
        ScalarKind::Float => value
            .as_f64()
            .map(SqlValue::Real)
            .ok_or_else(|| format!("expected number, got {}", describe(value))),
        ScalarKind::Bool => value
            .as_bool()
            .map(|flag| SqlValue::Integer(i64::from(flag)))
            .ok_or_else(|| format!("expected boolean, got {}", describe(value))),
        ScalarKind::Json => serde_json::to_string(value)
            .map(SqlValue::Text)
            .map_err(|err| format!("unserializable json value: {err}")),
    }
}

/// Converts a filter comparison value for a `kind` column.
pub fn filter_value_to_sql(kind: Option<ScalarKind>, value: &JsonValue) -> SqlValue {
    match (kind, value) {
        (_, JsonValue::Null) => SqlValue::Null,
        (Some(ScalarKind::Id), JsonValue::String(text)) => {
            SqlValue::Text(normalize_id(text).unwrap_or_else(|| text.clone()))
        }
        (Some(ScalarKind::Bool), JsonValue::String(text)) => match text.as_str() {
            "1" | "true" => SqlValue::Integer(1),
            "0" | "false" => SqlValue::Integer(0),
            _ => SqlValue::Text(text.clone()),
        },
        (Some(ScalarKind::Int | ScalarKind::Date | ScalarKind::Float), JsonValue::String(text)) => {
            if let Ok(number) = text.parse::<i64>() {
                SqlValue::Integer(number)
            } else if let Ok(number) = text.parse::<f64>() {
                SqlValue::Real(number)
            } else {
                SqlValue::Text(text.clone())
            }
        }
        (_, JsonValue::Bool(flag)) => SqlValue::Integer(i64::from(*flag)),
        (_, JsonValue::Number(number)) => number_to_sql(number),
        (_, JsonValue::String(text)) => SqlValue::Text(text.clone()),
        (_, other) => SqlValue::Text(other.to_string()),
    }
}

/// Converts a stored column value back into its JSON representation.
pub fn sql_to_json(kind: Option<ScalarKind>, value: ValueRef<'_>) -> Result<JsonValue, String> {
    Ok(match (kind, value) {
        (_, ValueRef::Null) => JsonValue::Null,
        (Some(ScalarKind::Bool), ValueRef::Integer(flag)) => JsonValue::Bool(flag != 0),
        (Some(ScalarKind::Json), ValueRef::Text(bytes)) => {
            let text = std::str::from_utf8(bytes).map_err(|err| err.to_string())?;
            serde_json::from_str(text).map_err(|err| format!("stored json is malformed: {err}"))?
        }
        (Some(ScalarKind::Float), ValueRef::Integer(number)) => {
            Number::from_f64(number as f64).map_or(JsonValue::Null, JsonValue::Number)
        }
        (_, ValueRef::Integer(number)) => JsonValue::from(number),
        (_, ValueRef::Real(number)) => {
            Number::from_f64(number).map_or(JsonValue::Null, JsonValue::Number)
        }
        (_, ValueRef::Text(bytes)) => JsonValue::String(
            std::str::from_utf8(bytes)
                .map_err(|err| err.to_string())?
                .to_string(),
        ),
        (_, ValueRef::Blob(_)) => return Err("blob columns are not supported".to_string()),
    })
}

fn number_to_sql(number: &Number) -> SqlValue {
    if let Some(integer) = number.as_i64() {
        SqlValue::Integer(integer)
    } else {
        SqlValue::Real(number.as_f64().unwrap_or_default())
    }
}

fn describe(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::{filter_value_to_sql, json_to_sql, normalize_id, sql_to_json};
    use crate::definition::ScalarKind;
    use rusqlite::types::{Value as SqlValue, ValueRef};
    use serde_json::json;

    #[test]
    fn normalize_id_accepts_hyphenated_uppercase() {
        assert_eq!(
            normalize_id("0FA91CE3-E96A-4BC2-BE4B-D9CE752C3425").as_deref(),
            Some("0fa91ce3e96a4bc2be4bd9ce752c3425")
        );
        assert_eq!(normalize_id("P1"), None);
    }

    #[test]
    fn write_conversion_is_strict() {
        assert!(json_to_sql(ScalarKind::Int, &json!("12")).is_err());
        assert_eq!(
            json_to_sql(ScalarKind::Bool, &json!(true)).unwrap(),
            SqlValue::Integer(1)
        );
        assert_eq!(
            json_to_sql(ScalarKind::Json, &json!({"gross": 10})).unwrap(),
            SqlValue::Text("{\"gross\":10}".to_string())
        );
    }

    #[test]
    fn filter_conversion_is_lenient() {
        assert_eq!(
            filter_value_to_sql(Some(ScalarKind::Id), &json!("P1")),
            SqlValue::Text("P1".to_string())
        );
        assert_eq!(
            filter_value_to_sql(Some(ScalarKind::Int), &json!("10")),
            SqlValue::Integer(10)
        );
    }

    #[test]
    fn read_conversion_restores_booleans_and_json() {
        assert_eq!(
            sql_to_json(Some(ScalarKind::Bool), ValueRef::Integer(0)).unwrap(),
            json!(false)
        );
        assert_eq!(
            sql_to_json(Some(ScalarKind::Json), ValueRef::Text(b"[1,2]")).unwrap(),
            json!([1, 2])
        );
    }
}
