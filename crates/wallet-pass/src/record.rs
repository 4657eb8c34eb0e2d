use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::{Number, Value as JsonValue};

pub const FIELD_ID: &str = "id";
pub const FIELD_BIB: &str = "bib";
pub const FIELD_ACCESS_KEY: &str = "access_key";
pub const FIELD_COLOUR_SIGN: &str = "colour_sign";

/// A scalar value stored on a runner record.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(Number),
    Bool(bool),
}

impl FieldValue {
    fn from_json(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(text) => Some(FieldValue::Text(text)),
            JsonValue::Number(number) => Some(FieldValue::Number(number)),
            JsonValue::Bool(flag) => Some(FieldValue::Bool(flag)),
            JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Bool(flag) => write!(f, "{flag}"),
            FieldValue::Number(number) => match number.as_f64() {
                Some(float) if number.is_f64() && is_integral_i64(float) => {
                    write!(f, "{}", float as i64)
                }
                _ => write!(f, "{number}"),
            },
        }
    }
}

/// Whole floats inside `i64` range render without a fraction; anything
/// larger keeps its JSON form instead of saturating.
fn is_integral_i64(float: f64) -> bool {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    float.is_finite() && float.fract() == 0.0 && (-LIMIT..LIMIT).contains(&float)
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value.into())
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Number(value.into())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// One event participant as read from the datastore.
///
/// Only scalar columns are kept; `null` and nested values read as absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunnerRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl RunnerRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn from_json(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(map) => Some(Self {
                fields: map
                    .into_iter()
                    .filter_map(|(name, value)| FieldValue::from_json(value).map(|v| (name, v)))
                    .collect(),
            }),
            _ => None,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// String form of a field, `None` when absent.
    pub fn text(&self, name: &str) -> Option<String> {
        self.lookup(name).map(ToString::to_string)
    }

    /// String form of a field, `None` when absent or blank.
    pub fn non_blank(&self, name: &str) -> Option<String> {
        self.text(name).filter(|value| !value.trim().is_empty())
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl<'de> Deserialize<'de> for RunnerRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = JsonValue::deserialize(deserializer)?;
        RunnerRecord::from_json(value)
            .ok_or_else(|| serde::de::Error::custom("runner record must be a JSON object"))
    }
}
