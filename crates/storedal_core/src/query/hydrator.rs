//! Flat row to nested object hydration.

use super::planner::SelectedColumn;
use super::{QueryError, QueryResult};
use crate::value::sql_to_json;
use rusqlite::Row;
use serde_json::{Map, Value};

pub(crate) fn hydrate_row(
    row: &Row<'_>,
    columns: &[SelectedColumn],
) -> QueryResult<Map<String, Value>> {
    let mut root = Map::new();
    for (index, column) in columns.iter().enumerate() {
        let value = sql_to_json(column.kind, row.get_ref(index)?).map_err(|message| {
            QueryError::InvalidData(format!("{}: {message}", column.property))
        })?;
        let target = object_at(&mut root, &column.path).ok_or_else(|| {
            QueryError::InvalidData(format!(
                "association path `{}` collides with a field",
                column.path.join(".")
            ))
        })?;
        target.insert(column.property.clone(), value);
    }

    let mut to_one_paths: Vec<&[String]> = columns
        .iter()
        .map(|column| column.path.as_slice())
        .filter(|path| !path.is_empty())
        .collect();
    to_one_paths.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    to_one_paths.dedup();
    for path in to_one_paths {
        null_unmatched(&mut root, path);
    }

    Ok(root)
}

pub(crate) fn object_at<'a>(
    root: &'a mut Map<String, Value>,
    path: &[String],
) -> Option<&'a mut Map<String, Value>> {
    let mut current = root;
    for segment in path {
        current = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()?;
    }
    Some(current)
}

/// A LEFT JOIN without a match yields an object of nulls; turn it into `null`.
fn null_unmatched(root: &mut Map<String, Value>, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        match current.get_mut(segment).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(slot) = current.get_mut(last) {
        let unmatched = slot
            .as_object()
            .map_or(false, |object| object.get("id").map_or(true, Value::is_null));
        if unmatched {
            *slot = Value::Null;
        }
    }
}
