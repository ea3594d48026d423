//! Generic hydrated entity.

use crate::definition::{DefinitionError, EntityDefinition};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// One entity row: ordered property map plus its definition.
///
/// To-one associations are nested objects (or `null`), to-many
/// associations are arrays of objects.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    #[serde(skip)]
    pub definition: Arc<EntityDefinition>,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

impl Entity {
    pub fn new(definition: Arc<EntityDefinition>, values: Map<String, Value>) -> Self {
        Self { definition, values }
    }

    pub fn entity_name(&self) -> &str {
        &self.definition.name
    }

    pub fn id(&self) -> Option<&str> {
        self.get_str("id")
    }

    pub fn version_id(&self) -> Option<&str> {
        self.get_str("versionId")
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.values.get(property)
    }

    /// Like [`Entity::get`] but rejects properties the definition does not declare.
    pub fn field_value(&self, property: &str) -> Result<&Value, DefinitionError> {
        if self.definition.field(property).is_none() {
            return Err(DefinitionError::UnknownField {
                entity: self.definition.name.clone(),
                field: property.to_string(),
            });
        }
        Ok(self.values.get(property).unwrap_or(&Value::Null))
    }

    pub fn get_str(&self, property: &str) -> Option<&str> {
        self.values.get(property).and_then(Value::as_str)
    }

    pub fn get_i64(&self, property: &str) -> Option<i64> {
        self.values.get(property).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, property: &str) -> Option<f64> {
        self.values.get(property).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, property: &str) -> Option<bool> {
        self.values.get(property).and_then(Value::as_bool)
    }

    /// Loaded to-one association, `None` when not loaded or empty.
    pub fn to_one(&self, property: &str) -> Option<&Map<String, Value>> {
        self.values.get(property).and_then(Value::as_object)
    }

    /// Loaded to-many association, `None` when not loaded.
    pub fn to_many(&self, property: &str) -> Option<&Vec<Value>> {
        self.values.get(property).and_then(Value::as_array)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResult {
    /// Matching rows before pagination.
    pub total: u64,
    pub entities: Vec<Entity>,
}

impl SearchResult {
    pub fn ids(&self) -> Vec<&str> {
        self.entities.iter().filter_map(Entity::id).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.id() == Some(id))
    }

    pub fn first(&self) -> Option<&Entity> {
        self.entities.first()
    }
}
