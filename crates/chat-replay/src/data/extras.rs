use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ChatError;

/// Kind of an extra parameter, fixed per deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Text,
    Number,
    Integer,
    Boolean,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Text => "text",
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
        }
    }

    /// Whether a value of kind `value` may be passed where `self` is declared.
    ///
    /// Integers widen to numbers; nothing else converts.
    pub fn accepts(&self, value: ParamKind) -> bool {
        *self == value || (*self == ParamKind::Number && value == ParamKind::Integer)
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single extra parameter value passed alongside the message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Boolean(_) => ParamKind::Boolean,
            ParamValue::Integer(_) => ParamKind::Integer,
            ParamValue::Number(_) => ParamKind::Number,
            ParamValue::Text(_) => ParamKind::Text,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Integer(value) => Some(*value as f64),
            ParamValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Integer view of a numeric value. Fractional numbers truncate toward zero.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Integer(value) => Some(*value),
            ParamValue::Number(value) if value.is_finite() => Some(value.trunc() as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Boolean(value) => write!(f, "{value}"),
            ParamValue::Integer(value) => write!(f, "{value}"),
            ParamValue::Number(value) => write!(f, "{value}"),
            ParamValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Integer(value.into())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Boolean(value)
    }
}

/// Ordered, named declaration of the extra parameters a producer takes.
///
/// The order is the order values are passed in; names are only used in error
/// messages and the cache fingerprint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtrasSchema {
    params: IndexMap<String, ParamKind>,
}

impl ExtrasSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter. Re-declaring a name replaces its kind in place.
    pub fn with(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.insert(name.into(), kind);
        self
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ParamKind)> {
        self.params.iter().map(|(name, kind)| (name.as_str(), *kind))
    }

    pub fn validate(&self, extras: &[ParamValue]) -> Result<(), ChatError> {
        if extras.len() != self.params.len() {
            return Err(ChatError::SchemaMismatch {
                reason: format!(
                    "expected {} extra parameter(s), got {}",
                    self.params.len(),
                    extras.len()
                ),
            });
        }

        for ((name, declared), value) in self.params.iter().zip(extras) {
            if !declared.accepts(value.kind()) {
                return Err(ChatError::SchemaMismatch {
                    reason: format!(
                        "parameter `{name}` expects {declared}, got {}",
                        value.kind()
                    ),
                });
            }
        }

        Ok(())
    }
}
