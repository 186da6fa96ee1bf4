//! Parameter definitions and opaque parameter values.
//!
//! A description declares the structural shape of its input. Instances
//! store the input as an opaque JSON value, checked only against that
//! shape. Typed access belongs to the process module that owns the
//! concrete input type.

use std::collections::BTreeMap;

use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structural schema of an input type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterShape {
    /// Accepts any value
    Any,
    /// Only `null` (descriptions without input)
    Null,
    Boolean,
    Integer,
    Number,
    String,
    /// RFC 3339 timestamp encoded as a string
    DateTime,
    /// `null` or absent, otherwise `inner`
    Optional { inner: Box<ParameterShape> },
    Array { items: Box<ParameterShape> },
    /// Exactly the listed fields; unknown fields are violations
    Object { fields: BTreeMap<String, ParameterShape> },
}

impl ParameterShape {
    pub fn optional(inner: ParameterShape) -> Self {
        Self::Optional {
            inner: Box::new(inner),
        }
    }

    pub fn array(items: ParameterShape) -> Self {
        Self::Array {
            items: Box::new(items),
        }
    }

    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, ParameterShape)>,
        K: Into<String>,
    {
        Self::Object {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Check a value against this shape, collecting every violation
    pub fn conforms(&self, value: &Value) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();
        self.check("$", value, &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    fn check(&self, path: &str, value: &Value, violations: &mut Vec<String>) {
        match (self, value) {
            (Self::Any, _) => {}
            (Self::Optional { .. }, Value::Null) => {}
            (Self::Optional { inner }, _) => inner.check(path, value, violations),
            (Self::Null, Value::Null) => {}
            (Self::Boolean, Value::Bool(_)) => {}
            (Self::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {}
            (Self::Number, Value::Number(_)) => {}
            (Self::String, Value::String(_)) => {}
            (Self::DateTime, Value::String(s)) => {
                if DateTime::parse_from_rfc3339(s).is_err() {
                    violations.push(format!("{}: '{}' is not an RFC 3339 timestamp", path, s));
                }
            }
            (Self::Array { items }, Value::Array(values)) => {
                for (i, item) in values.iter().enumerate() {
                    items.check(&format!("{}[{}]", path, i), item, violations);
                }
            }
            (Self::Object { fields }, Value::Object(map)) => {
                for (name, shape) in fields {
                    let field_path = format!("{}.{}", path, name);
                    match map.get(name) {
                        Some(field) => shape.check(&field_path, field, violations),
                        None if matches!(shape, Self::Optional { .. }) => {}
                        None => violations.push(format!("{}: missing", field_path)),
                    }
                }
                for name in map.keys().filter(|k| !fields.contains_key(*k)) {
                    violations.push(format!("{}.{}: unexpected field", path, name));
                }
            }
            (expected, actual) => violations.push(format!(
                "{}: expected {}, found {}",
                path,
                expected.kind(),
                json_kind(actual)
            )),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::DateTime => "date-time",
            Self::Optional { .. } => "optional",
            Self::Array { .. } => "array",
            Self::Object { .. } => "object",
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A typed process input that knows its own shape
pub trait ProcessInput: Serialize + DeserializeOwned {
    fn parameter_shape() -> ParameterShape;
}

impl ProcessInput for () {
    fn parameter_shape() -> ParameterShape {
        ParameterShape::Null
    }
}

/// Opaque input stored on an instance and returned verbatim
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterValue(Value);

impl ParameterValue {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Serialize a typed input at the process-module boundary
    pub fn from_typed<T: Serialize + ?Sized>(input: &T) -> serde_json::Result<Self> {
        serde_json::to_value(input).map(Self)
    }

    /// Deserialize into the process module's concrete input type
    pub fn to_typed<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.0.clone())
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }
}
