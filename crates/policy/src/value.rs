//! Tagged configuration values.
//!
//! Configuration blobs arrive as loosely-typed maps. They are decoded into
//! [`Value`] and read through [`Table`] accessors that fail with a typed
//! [`FieldError`] instead of panicking or silently defaulting.

use crate::error::FieldError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Table(Table),
}

/// A string-keyed map of values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table(BTreeMap<String, Value>);

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Table(_) => "table",
        }
    }

    pub fn as_table(&self) -> Result<&Table, FieldError> {
        match self {
            Value::Table(table) => Ok(table),
            other => Err(FieldError::NotATable(other.type_name())),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn required_str(&self, field: &str) -> Result<&str, FieldError> {
        match self.get(field) {
            None | Some(Value::Null) => Err(FieldError::Missing(field.to_string())),
            Some(Value::Str(s)) => Ok(s),
            Some(other) => Err(wrong_type(field, "a string", other)),
        }
    }

    /// A list of strings. A single string is accepted as a one-element list.
    pub fn optional_str_list(&self, field: &str) -> Result<Option<Vec<String>>, FieldError> {
        match self.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Str(s)) => Ok(Some(vec![s.clone()])),
            Some(Value::List(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| wrong_type(field, "a list of strings", item))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(other) => Err(wrong_type(field, "a list of strings", other)),
        }
    }
}

fn wrong_type(field: &str, expected: &'static str, found: &Value) -> FieldError {
    FieldError::WrongType {
        field: field.to_string(),
        expected,
        found: found.type_name(),
    }
}

impl From<toml::Value> for Value {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => Value::Str(s),
            toml::Value::Integer(n) => Value::Int(n),
            toml::Value::Float(f) => Value::Float(f),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::Str(dt.to_string()),
            toml::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            toml::Value::Table(table) => Value::Table(Table(
                table.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            )),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<Table> for Value {
    fn from(table: Table) -> Self {
        Value::Table(table)
    }
}
