//! The replicated item and its serializer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::StoreError;

/// A schemaless record persisted by a data store.
///
/// `id` and `entity_name` are reserved; everything else lives in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub entity_name: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Item {
    pub fn new(id: impl Into<String>, entity_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_name: entity_name.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Reads a field by name, including the reserved `id` and `entity_name`.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "entity_name" => Some(Value::String(self.entity_name.clone())),
            _ => self.fields.get(name).cloned(),
        }
    }
}

/// Turns items into opaque change payloads and back.
pub trait ItemSerializer: Send + Sync {
    fn serialize(&self, item: &Item) -> Result<String, StoreError>;
    fn deserialize(&self, payload: &str) -> Result<Item, StoreError>;
}

/// Serializes items as flat JSON objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonItemSerializer;

impl ItemSerializer for JsonItemSerializer {
    fn serialize(&self, item: &Item) -> Result<String, StoreError> {
        Ok(serde_json::to_string(item)?)
    }

    fn deserialize(&self, payload: &str) -> Result<Item, StoreError> {
        Ok(serde_json::from_str(payload)?)
    }
}
