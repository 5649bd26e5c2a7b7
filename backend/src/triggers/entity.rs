// Entity snapshots and typed per-entity field accessors.
//
// A snapshot is the deep-copied state of one record as seen at a lifecycle
// boundary. Schemas declare which fields an entity type has and their types so
// that triggers referencing unknown fields are rejected at registration.

use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

pub type FieldMap = serde_json::Map<String, Value>;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Entity type '{entity_type}' has no field '{field}'")]
    UnknownField { entity_type: String, field: String },
    #[error("Field '{field}' on '{entity_type}' expects {expected}, got {actual}")]
    TypeMismatch {
        entity_type: String,
        field: String,
        expected: FieldType,
        actual: String,
    },
    #[error("Entity '{0}' did not serialize to an object")]
    NotAnObject(String),
    #[error("Path '{0}' crosses a field that is not an object")]
    NotNested(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Normalized entity type name used for matching and indexing.
pub fn entity_key(entity_type: &str) -> String {
    entity_type.trim().to_lowercase()
}

/// A typed record that can be captured into a snapshot.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const ENTITY_TYPE: &'static str;

    /// `None` for records not yet persisted.
    fn entity_id(&self) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub entity_type: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_type: String,
    pub id: Option<String>,
    pub fields: FieldMap,
}

/// Per-field difference between two snapshots
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

impl EntitySnapshot {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: Some(id.into()),
            fields: FieldMap::new(),
        }
    }

    pub fn unsaved(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: None,
            fields: FieldMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn capture<E: Entity>(entity: &E) -> SchemaResult<Self> {
        match serde_json::to_value(entity)? {
            Value::Object(fields) => Ok(Self {
                entity_type: E::ENTITY_TYPE.to_string(),
                id: entity.entity_id(),
                fields,
            }),
            _ => Err(SchemaError::NotAnObject(E::ENTITY_TYPE.to_string())),
        }
    }

    pub fn restore<E: Entity>(&self) -> SchemaResult<E> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    pub fn key(&self) -> Option<SnapshotKey> {
        self.id.as_ref().map(|id| SnapshotKey {
            entity_type: entity_key(&self.entity_type),
            id: id.clone(),
        })
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Resolve a dotted path such as `client.is_vip` through nested objects
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.lookup(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.lookup(field).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.lookup(field).and_then(Value::as_bool)
    }

    /// Set a field, returning the previous value.
    pub fn set(&mut self, field: &str, value: Value) -> Option<Value> {
        self.fields.insert(field.to_string(), value)
    }

    /// Set a dotted path such as `client.is_vip`, creating missing or null
    /// intermediate objects. Returns the previous value at the leaf.
    pub fn set_path(&mut self, path: &str, value: Value) -> SchemaResult<Option<Value>> {
        let Some((parents, leaf)) = path.rsplit_once('.') else {
            return Ok(self.set(path, value));
        };

        let mut current = &mut self.fields;
        for part in parents.split('.') {
            let slot = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(FieldMap::new()));
            if slot.is_null() {
                *slot = Value::Object(FieldMap::new());
            }
            current = slot
                .as_object_mut()
                .ok_or_else(|| SchemaError::NotNested(path.to_string()))?;
        }
        Ok(current.insert(leaf.to_string(), value))
    }

    /// Fields whose values differ between `self` (before) and `after`.
    /// Fields present on only one side compare against null.
    pub fn diff(&self, after: &EntitySnapshot) -> BTreeMap<String, FieldChange> {
        let names: BTreeSet<&String> = self.fields.keys().chain(after.fields.keys()).collect();

        names
            .into_iter()
            .filter_map(|name| {
                let old = self.fields.get(name).cloned().unwrap_or(Value::Null);
                let new = after.fields.get(name).cloned().unwrap_or(Value::Null);
                (old != new).then(|| (name.clone(), FieldChange { old, new }))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Uuid,
    List,
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
            FieldType::Uuid => "uuid",
            FieldType::List => "list",
            FieldType::Json => "json",
        };
        f.write_str(name)
    }
}

impl FieldType {
    /// Null is accepted for every type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::Json, _) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldType::Float, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s).is_ok(),
            (FieldType::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s).is_ok(),
            (FieldType::List, Value::Array(_)) => true,
            _ => false,
        }
    }
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(s) => format!("string \"{}\"", s),
        Value::Array(_) => "list".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

/// Field declarations for one entity type
#[derive(Debug, Clone)]
pub struct EntitySchema {
    entity_type: String,
    fields: BTreeMap<String, FieldType>,
}

impl EntitySchema {
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.insert(name.to_string(), field_type);
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        let root = name.split('.').next().unwrap_or(name);
        self.fields.get(root).copied()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_type(name).is_some()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn check_field(&self, name: &str) -> SchemaResult<FieldType> {
        self.field_type(name).ok_or_else(|| SchemaError::UnknownField {
            entity_type: self.entity_type.clone(),
            field: name.to_string(),
        })
    }

    pub fn check_value(&self, name: &str, value: &Value) -> SchemaResult<()> {
        let expected = self.check_field(name)?;
        // Nested paths land inside a json/object field; only the root is typed.
        if name.contains('.') || expected.accepts(value) {
            Ok(())
        } else {
            Err(SchemaError::TypeMismatch {
                entity_type: self.entity_type.clone(),
                field: name.to_string(),
                expected,
                actual: describe_value(value),
            })
        }
    }

    /// Type-checked setter.
    pub fn set(&self, snapshot: &mut EntitySnapshot, name: &str, value: Value) -> SchemaResult<Option<Value>> {
        self.check_value(name, &value)?;
        Ok(snapshot.set(name, value))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, schema: EntitySchema) -> Self {
        self.register(schema);
        self
    }

    pub fn register(&mut self, schema: EntitySchema) {
        self.schemas.insert(entity_key(&schema.entity_type), schema);
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntitySchema> {
        self.schemas.get(&entity_key(entity_type))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: String,
        status: String,
        approved: bool,
    }

    impl Entity for Widget {
        const ENTITY_TYPE: &'static str = "Widget";

        fn entity_id(&self) -> Option<String> {
            Some(self.id.clone())
        }
    }

    #[test]
    fn test_capture_and_restore() {
        let widget = Widget {
            id: "w-1".to_string(),
            status: "draft".to_string(),
            approved: false,
        };
        let snapshot = EntitySnapshot::capture(&widget).unwrap();

        assert_eq!(snapshot.entity_type, "Widget");
        assert_eq!(snapshot.id.as_deref(), Some("w-1"));
        assert_eq!(snapshot.get_str("status"), Some("draft"));
        assert_eq!(snapshot.restore::<Widget>().unwrap(), widget);
    }

    #[test]
    fn test_diff_reports_only_changed_fields() {
        let before = EntitySnapshot::new("Widget", "1")
            .with_field("status", "draft")
            .with_field("name", "gear");
        let after = EntitySnapshot::new("Widget", "1")
            .with_field("status", "active")
            .with_field("name", "gear")
            .with_field("color", "red");

        let changes = before.diff(&after);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["status"], FieldChange { old: json!("draft"), new: json!("active") });
        assert_eq!(changes["color"].old, Value::Null);
    }

    #[test]
    fn test_lookup_nested_path() {
        let snapshot = EntitySnapshot::new("Order", "9").with_field("client", json!({"is_vip": true}));
        assert_eq!(snapshot.get_bool("client.is_vip"), Some(true));
        assert!(snapshot.lookup("client.missing").is_none());
    }

    #[test]
    fn test_set_path_writes_nested_objects() {
        let mut snapshot = EntitySnapshot::new("Order", "9").with_field("client", json!({"is_vip": false}));

        assert_eq!(snapshot.set_path("client.is_vip", json!(true)).unwrap(), Some(json!(false)));
        assert_eq!(snapshot.get_bool("client.is_vip"), Some(true));
        assert!(snapshot.get("client.is_vip").is_none());

        assert_eq!(snapshot.set_path("shipping.address.city", json!("Oslo")).unwrap(), None);
        assert_eq!(snapshot.get_str("shipping.address.city"), Some("Oslo"));

        snapshot.set("note", json!("plain"));
        assert!(matches!(
            snapshot.set_path("note.text", json!("x")),
            Err(SchemaError::NotNested(_))
        ));
    }

    #[test]
    fn test_schema_rejects_unknown_field_and_wrong_type() {
        let schema = EntitySchema::new("Widget")
            .field("status", FieldType::String)
            .field("approved", FieldType::Boolean)
            .field("created_at", FieldType::Timestamp);

        assert!(schema.check_value("approved", &json!(true)).is_ok());
        assert!(schema.check_value("approved", &Value::Null).is_ok());
        assert!(matches!(
            schema.check_value("aproved", &json!(true)),
            Err(SchemaError::UnknownField { .. })
        ));
        assert!(matches!(
            schema.check_value("approved", &json!("yes")),
            Err(SchemaError::TypeMismatch { .. })
        ));
        assert!(schema.check_value("created_at", &json!("2024-05-01T10:00:00Z")).is_ok());
        assert!(schema.check_value("created_at", &json!("yesterday")).is_err());
    }

    #[test]
    fn test_schema_setter_and_case_insensitive_lookup() {
        let registry = SchemaRegistry::new().with(EntitySchema::new("Widget").field("approved", FieldType::Boolean));
        let schema = registry.get("widget").unwrap();

        let mut snapshot = EntitySnapshot::new("Widget", "1").with_field("approved", false);
        let previous = schema.set(&mut snapshot, "approved", json!(true)).unwrap();

        assert_eq!(previous, Some(json!(false)));
        assert_eq!(snapshot.get_bool("approved"), Some(true));
        assert!(schema.set(&mut snapshot, "approved", json!(1)).is_err());
    }
}
