//! Value types exchanged with the server.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{DriverError, DriverResult};

// ============================================================================
// Value
// ============================================================================

/// A value in statement parameters, records and response metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null
    Null,
    /// Boolean
    Boolean(bool),
    /// Integer (i64)
    Integer(i64),
    /// Float (f64)
    Float(f64),
    /// String
    String(String),
    /// Bytes
    Bytes(Vec<u8>),
    /// List
    List(Vec<Value>),
    /// Map
    Map(HashMap<String, Value>),
}

impl Value {
    /// Whether the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// As boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// As integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// As float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// As string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// As list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// As map
    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            Value::List(l) => write!(f, "list[{}]", l.len()),
            Value::Map(m) => write!(f, "map[{}]", m.len()),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = DriverError;

    fn try_from(value: Value) -> DriverResult<Self> {
        match value {
            Value::Boolean(b) => Ok(b),
            other => Err(conversion_error("Boolean", &other)),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = DriverError;

    fn try_from(value: Value) -> DriverResult<Self> {
        match value {
            Value::Integer(i) => Ok(i),
            other => Err(conversion_error("Integer", &other)),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = DriverError;

    fn try_from(value: Value) -> DriverResult<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            other => Err(conversion_error("Float", &other)),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = DriverError;

    fn try_from(value: Value) -> DriverResult<Self> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(conversion_error("String", &other)),
        }
    }
}

fn conversion_error(expected: &str, got: &Value) -> DriverError {
    DriverError::Internal(format!("Cannot convert {:?} to {}", got, expected))
}

// ============================================================================
// Tests
// ============================================================================
