use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;

/// Property values keyed by property name.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::Object => "object",
            PropertyType::Array => "array",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<JsonValue>),
    Object(JsonMap<String, JsonValue>),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot convert {value:?} to {expected}")]
pub struct ConversionError {
    pub expected: PropertyType,
    pub value: String,
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyType {
        match self {
            PropertyValue::Boolean(_) => PropertyType::Boolean,
            PropertyValue::Number(_) => PropertyType::Number,
            PropertyValue::String(_) => PropertyType::String,
            PropertyValue::Array(_) => PropertyType::Array,
            PropertyValue::Object(_) => PropertyType::Object,
        }
    }

    /// Converts an attribute string into a value of type `ty`.
    ///
    /// Booleans follow HTML semantics: any present attribute is `true`,
    /// whatever its text.
    pub fn from_attribute(ty: PropertyType, raw: &str) -> Result<Self, ConversionError> {
        let mismatch = || ConversionError {
            expected: ty,
            value: raw.to_string(),
        };

        match ty {
            PropertyType::String => Ok(PropertyValue::String(raw.to_string())),
            PropertyType::Boolean => Ok(PropertyValue::Boolean(true)),
            PropertyType::Number => parse_number(raw)
                .map(PropertyValue::Number)
                .ok_or_else(mismatch),
            PropertyType::Object => match serde_json::from_str::<JsonValue>(raw) {
                Ok(JsonValue::Object(map)) => Ok(PropertyValue::Object(map)),
                _ => Err(mismatch()),
            },
            PropertyType::Array => match serde_json::from_str::<JsonValue>(raw) {
                Ok(JsonValue::Array(items)) => Ok(PropertyValue::Array(items)),
                _ => Err(mismatch()),
            },
        }
    }

    /// The attribute text mirroring this value, or `None` when the attribute
    /// should be absent.
    pub fn to_attribute(&self) -> Option<String> {
        match self {
            PropertyValue::Boolean(true) => Some(String::new()),
            PropertyValue::Boolean(false) => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Boolean(value) => write!(f, "{value}"),
            PropertyValue::Number(value) => f.write_str(&format_number(*value)),
            PropertyValue::String(value) => f.write_str(value),
            PropertyValue::Array(items) => {
                let json = JsonValue::Array(items.clone());
                write!(f, "{json}")
            }
            PropertyValue::Object(map) => {
                let json = JsonValue::Object(map.clone());
                write!(f, "{json}")
            }
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Number(f64::from(value))
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<Vec<JsonValue>> for PropertyValue {
    fn from(value: Vec<JsonValue>) -> Self {
        PropertyValue::Array(value)
    }
}

impl From<JsonMap<String, JsonValue>> for PropertyValue {
    fn from(value: JsonMap<String, JsonValue>) -> Self {
        PropertyValue::Object(value)
    }
}

/// Declared shape of one component property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDecl {
    name: String,
    ty: PropertyType,
    default: PropertyValue,
    reflect: bool,
    attribute: String,
}

impl PropertyDecl {
    pub fn new(name: impl Into<String>, ty: PropertyType, default: impl Into<PropertyValue>) -> Self {
        let name = name.into();
        let attribute = attribute_name_for(&name);
        Self {
            name,
            ty,
            default: default.into(),
            reflect: false,
            attribute,
        }
    }

    pub fn string(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self::new(name, PropertyType::String, PropertyValue::String(default.into()))
    }

    pub fn number(name: impl Into<String>, default: f64) -> Self {
        Self::new(name, PropertyType::Number, default)
    }

    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self::new(name, PropertyType::Boolean, default)
    }

    pub fn reflect(mut self, reflect: bool) -> Self {
        self.reflect = reflect;
        self
    }

    /// Overrides the attribute name derived from the property name.
    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = attribute.into().to_ascii_lowercase();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> PropertyType {
        self.ty
    }

    pub fn default_value(&self) -> &PropertyValue {
        &self.default
    }

    pub fn reflects(&self) -> bool {
        self.reflect
    }

    pub fn attribute_name(&self) -> &str {
        &self.attribute
    }

    pub fn accepts(&self, value: &PropertyValue) -> bool {
        value.kind() == self.ty
    }
}

/// `maxCount` becomes `max-count`.
pub fn attribute_name_for(property: &str) -> String {
    let mut attribute = String::with_capacity(property.len() + 4);
    for (index, ch) in property.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                attribute.push('-');
            }
            attribute.push(ch.to_ascii_lowercase());
        } else {
            attribute.push(ch);
        }
    }
    attribute
}

pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return String::from("NaN");
    }
    if value.is_infinite() {
        return if value > 0.0 {
            String::from("Infinity")
        } else {
            String::from("-Infinity")
        };
    }
    if value == 0.0 {
        // collapses -0
        return String::from("0");
    }
    format!("{value}")
}

fn parse_number(raw: &str) -> Option<f64> {
    match raw.trim() {
        "NaN" => Some(f64::NAN),
        "Infinity" | "+Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        // reject the spellings Rust accepts but markup never uses
        trimmed
            if trimmed
                .trim_start_matches(['+', '-'])
                .starts_with(|c: char| c.is_ascii_alphabetic()) =>
        {
            None
        }
        trimmed if trimmed.is_empty() => None,
        trimmed => trimmed.parse::<f64>().ok(),
    }
}
