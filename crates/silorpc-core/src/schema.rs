//! Type descriptors for method parameters and return values.
//!
//! There is no runtime reflection here: contract authors supply explicit
//! [`ValueType`] tokens, and the codec checks JSON values against them. A
//! [`ValueType::Deferred`] token stands for a forward/string type reference;
//! it cannot be used for (de)serialization and is rejected when the contract
//! is built, not at first call.

use serde_json::Value;
use std::fmt;

/// Named arguments as they travel on the wire.
pub type ArgumentMap = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Str,
    /// Arbitrary JSON object; the escape hatch for model payloads whose shape
    /// is owned by the service, not the dispatch layer.
    Json,
    OptionOf(Box<ValueType>),
    ListOf(Box<ValueType>),
    /// A type reference by name only. Unusable for serialization; contract
    /// construction fails if one appears anywhere in a declared type.
    Deferred(String),
}

impl ValueType {
    pub fn option_of(inner: ValueType) -> ValueType {
        ValueType::OptionOf(Box::new(inner))
    }

    pub fn list_of(inner: ValueType) -> ValueType {
        ValueType::ListOf(Box::new(inner))
    }

    /// True when the type carries no deferred references, nested ones included.
    pub fn is_concrete(&self) -> bool {
        match self {
            ValueType::Deferred(_) => false,
            ValueType::OptionOf(inner) | ValueType::ListOf(inner) => inner.is_concrete(),
            _ => true,
        }
    }

    pub fn is_option(&self) -> bool {
        matches!(self, ValueType::OptionOf(_))
    }

    /// Check a JSON value against this descriptor.
    pub fn check(&self, value: &Value) -> Result<(), TypeMismatch> {
        let ok = match self {
            ValueType::Bool => value.is_boolean(),
            ValueType::Int => value.is_i64() || value.is_u64(),
            ValueType::Float => value.is_number(),
            ValueType::Str => value.is_string(),
            ValueType::Json => value.is_object(),
            ValueType::OptionOf(inner) => return check_option(inner, value),
            ValueType::ListOf(inner) => return check_list(self, inner, value),
            ValueType::Deferred(name) => {
                return Err(TypeMismatch {
                    expected: self.to_string(),
                    actual: format!("deferred type reference `{}`", name),
                })
            }
        };
        if ok {
            Ok(())
        } else {
            Err(TypeMismatch {
                expected: self.to_string(),
                actual: json_kind(value).to_string(),
            })
        }
    }
}

fn check_option(inner: &ValueType, value: &Value) -> Result<(), TypeMismatch> {
    if value.is_null() {
        Ok(())
    } else {
        inner.check(value)
    }
}

fn check_list(list: &ValueType, inner: &ValueType, value: &Value) -> Result<(), TypeMismatch> {
    let items = value.as_array().ok_or_else(|| TypeMismatch {
        expected: list.to_string(),
        actual: json_kind(value).to_string(),
    })?;
    for item in items {
        inner.check(item)?;
    }
    Ok(())
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => write!(f, "bool"),
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::Str => write!(f, "str"),
            ValueType::Json => write!(f, "json"),
            ValueType::OptionOf(inner) => write!(f, "option<{}>", inner),
            ValueType::ListOf(inner) => write!(f, "list<{}>", inner),
            ValueType::Deferred(name) => write!(f, "deferred<{}>", name),
        }
    }
}

/// JSON kind label used in mismatch messages.
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("expected {expected}, got {actual}")]
pub struct TypeMismatch {
    pub expected: String,
    pub actual: String,
}
