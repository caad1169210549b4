use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

pub const MAX_PROPERTIES: usize = 32;
pub const MAX_KEY_CHARS: usize = 64;
pub const MAX_TEXT_CHARS: usize = 512;

/// A scalar attached to usage records and provider signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

pub fn validate_properties(properties: &Properties) -> CoreResult<()> {
    if properties.len() > MAX_PROPERTIES {
        return Err(CoreError::invalid(format!(
            "at most {MAX_PROPERTIES} properties are allowed, got {}",
            properties.len()
        )));
    }
    for (key, value) in properties {
        let key_chars = key.chars().count();
        if key_chars == 0 || key_chars > MAX_KEY_CHARS {
            return Err(CoreError::invalid(format!(
                "property keys must be 1..={MAX_KEY_CHARS} characters"
            )));
        }
        match value {
            PropertyValue::Text(text) if text.chars().count() > MAX_TEXT_CHARS => {
                return Err(CoreError::invalid(format!(
                    "property '{key}' exceeds {MAX_TEXT_CHARS} characters"
                )));
            }
            PropertyValue::Float(f) if !f.is_finite() => {
                return Err(CoreError::invalid(format!(
                    "property '{key}' must be a finite number"
                )));
            }
            _ => {}
        }
    }
    Ok(())
}
