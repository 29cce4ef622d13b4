//! Element types, values and records.
//!
//! Element types form a single-inheritance lattice: every type has at most one
//! parent and inherits the parent's fields. A type `T` is assignable from `U`
//! when `U` is `T` or one of its descendants.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Storage type of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Text,
}

impl FieldType {
    /// DuckDB column type used for this field.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Bool => "BOOLEAN",
            FieldType::Int => "BIGINT",
            FieldType::Float => "DOUBLE",
            FieldType::Text => "VARCHAR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
        }
    }
}

#[derive(Debug)]
struct TypeInfo {
    name: String,
    parent: Option<ElementType>,
    fields: Vec<Field>,
}

/// Runtime type tag of the elements produced by a queryable.
///
/// Cheap to clone. Two element types are the same type when their names match.
#[derive(Clone)]
pub struct ElementType(Arc<TypeInfo>);

impl ElementType {
    /// Create a root type with no parent.
    pub fn root(name: &str, fields: Vec<Field>) -> Self {
        Self(Arc::new(TypeInfo {
            name: name.to_string(),
            parent: None,
            fields,
        }))
    }

    /// Create a type deriving from `parent`.
    pub fn derive(name: &str, parent: &ElementType, fields: Vec<Field>) -> Self {
        Self(Arc::new(TypeInfo {
            name: name.to_string(),
            parent: Some(parent.clone()),
            fields,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&ElementType> {
        self.0.parent.as_ref()
    }

    /// This type followed by its ancestors, most derived first.
    pub fn ancestors(&self) -> impl Iterator<Item = &ElementType> {
        std::iter::successors(Some(self), |t| t.parent())
    }

    /// All fields, inherited ones first.
    pub fn fields(&self) -> Vec<Field> {
        let mut chain: Vec<&ElementType> = self.ancestors().collect();
        chain.reverse();
        chain
            .into_iter()
            .flat_map(|t| t.0.fields.iter().cloned())
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<Field> {
        self.ancestors()
            .flat_map(|t| t.0.fields.iter())
            .find(|f| f.name == name)
            .cloned()
    }

    /// Whether a value of type `other` can be used where `self` is expected.
    pub fn is_assignable_from(&self, other: &ElementType) -> bool {
        other.ancestors().any(|t| t == self)
    }
}

impl PartialEq for ElementType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
    }
}

impl Eq for ElementType {}

impl Hash for ElementType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parent() {
            Some(parent) => write!(f, "{}: {}", self.name(), parent.name()),
            None => write!(f, "{}", self.name()),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Named element types, resolved by name when building sources from configuration.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    types: HashMap<String, ElementType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. Its parent, if any, must already be registered.
    pub fn register(
        &mut self,
        name: &str,
        parent: Option<&str>,
        fields: Vec<Field>,
    ) -> Result<ElementType> {
        if self.types.contains_key(name) {
            return Err(Error::Config(format!("Element type '{}' defined twice", name)));
        }
        let element_type = match parent {
            Some(parent_name) => {
                let parent = self.get(parent_name).ok_or_else(|| {
                    Error::Config(format!(
                        "Parent type '{}' of '{}' is not defined",
                        parent_name, name
                    ))
                })?;
                ElementType::derive(name, &parent, fields)
            }
            None => ElementType::root(name, fields),
        };
        self.types.insert(name.to_string(), element_type.clone());
        Ok(element_type)
    }

    pub fn get(&self, name: &str) -> Option<ElementType> {
        self.types.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// A scalar value carried by records and expression constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }

    /// Ordering between comparable values. Ints and floats compare numerically;
    /// null and mismatched kinds are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Text(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

static NULL_VALUE: Value = Value::Null;

/// One element produced by a queryable.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    element_type: ElementType,
    values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(element_type: ElementType) -> Self {
        Self {
            element_type,
            values: BTreeMap::new(),
        }
    }

    /// Builder-style setter.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.values.insert(field.to_string(), value.into());
        self
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.values.insert(field.to_string(), value);
    }

    pub fn element_type(&self) -> &ElementType {
        &self.element_type
    }

    /// Value of a field declared on the record's type. Declared but unset
    /// fields read as null; undeclared fields are `None`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self.values.get(field) {
            Some(value) => Some(value),
            None if self.element_type.field(field).is_some() => Some(&NULL_VALUE),
            None => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(
            "$type".to_string(),
            serde_json::Value::String(self.element_type.name().to_string()),
        );
        for (name, value) in &self.values {
            map.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> (ElementType, ElementType, ElementType) {
        let data = ElementType::root("Data", vec![Field::new("id", FieldType::Int)]);
        let page = ElementType::derive("Page", &data, vec![Field::new("title", FieldType::Text)]);
        let media = ElementType::derive("Media", &data, vec![Field::new("size", FieldType::Int)]);
        (data, page, media)
    }

    #[test]
    fn test_assignability() {
        let (data, page, media) = hierarchy();
        assert!(data.is_assignable_from(&page));
        assert!(data.is_assignable_from(&data));
        assert!(!page.is_assignable_from(&data));
        assert!(!page.is_assignable_from(&media));
    }

    #[test]
    fn test_inherited_fields_come_first() {
        let (_, page, _) = hierarchy();
        let names: Vec<String> = page.fields().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["id", "title"]);
        assert_eq!(page.field("id").unwrap().field_type, FieldType::Int);
        assert!(page.field("size").is_none());
    }

    #[test]
    fn test_registry_requires_parent() {
        let mut registry = TypeRegistry::new();
        assert!(registry.register("Page", Some("Data"), vec![]).is_err());
        registry.register("Data", None, vec![]).unwrap();
        let page = registry.register("Page", Some("Data"), vec![]).unwrap();
        assert_eq!(page.parent().unwrap().name(), "Data");
        assert!(registry.register("Page", None, vec![]).is_err());
    }

    #[test]
    fn test_record_get() {
        let (_, page, _) = hierarchy();
        let record = Record::new(page).with("title", "home");
        assert_eq!(record.get("title"), Some(&Value::Text("home".into())));
        assert_eq!(record.get("id"), Some(&Value::Null));
        assert_eq!(record.get("size"), None);
        assert_eq!(record.to_json()["$type"], "Page");
    }

    #[test]
    fn test_value_compare() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert_eq!(Value::Text("a".into()).compare(&Value::Int(1)), None);
    }
}
