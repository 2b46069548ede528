//! Unified value model.
//!
//! `Value` is the engine-neutral representation used for parameters and row
//! columns. `ToValue` / `FromValue` convert between it and Rust field types;
//! the read side is tolerant of the encodings used by engines that lack a
//! native boolean, UUID or JSON type.

use crate::error::MappingError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A single column or parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// NULL value
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Uuid(Uuid),
    Timestamp(NaiveDateTime),
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    Json(JsonValue),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Uuid(_) => "uuid",
            Self::Timestamp(_) => "timestamp",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Conversion of a Rust value into a `Value`.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

/// Conversion of a `Value` into a Rust value.
///
/// Null handling is the caller's concern except for `Option<T>`, which maps
/// null to `None`.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, MappingError>;
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, MappingError> {
        Ok(value)
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, MappingError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, MappingError> {
        match value {
            Value::Bool(v) => Ok(v),
            // Engines without a boolean column type store 0/1
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            Value::Int(v) => Err(MappingError::out_of_range("bool", v)),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "t" | "y" => Ok(true),
                "0" | "false" | "f" | "n" => Ok(false),
                _ => Err(MappingError::parse("bool", s)),
            },
            other => Err(MappingError::mismatch("bool", other.type_name())),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, MappingError> {
        match value {
            Value::Int(v) => Ok(v),
            Value::Bool(v) => Ok(v as i64),
            Value::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(v as i64),
            Value::Float(v) => Err(MappingError::out_of_range("i64", v)),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| MappingError::parse("i64", s)),
            other => Err(MappingError::mismatch("i64", other.type_name())),
        }
    }
}

macro_rules! impl_narrow_int {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToValue for $ty {
                fn to_value(&self) -> Value {
                    Value::Int(i64::from(*self))
                }
            }

            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, MappingError> {
                    let wide = i64::from_value(value)?;
                    <$ty>::try_from(wide)
                        .map_err(|_| MappingError::out_of_range(stringify!($ty), wide))
                }
            }
        )+
    };
}

impl_narrow_int!(i8, i16, i32, u8, u16, u32);

impl ToValue for i64 {
    fn to_value(&self) -> Value {
        Value::Int(*self)
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, MappingError> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| MappingError::parse("f64", s)),
            other => Err(MappingError::mismatch("f64", other.type_name())),
        }
    }
}

impl ToValue for f32 {
    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, MappingError> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, MappingError> {
        match value {
            Value::Text(s) => Ok(s),
            Value::Uuid(u) => Ok(u.hyphenated().to_string()),
            Value::Int(v) => Ok(v.to_string()),
            Value::Float(v) => Ok(v.to_string()),
            Value::Json(v) => Ok(v.to_string()),
            Value::Timestamp(v) => Ok(v.to_string()),
            Value::Bytes(b) => {
                String::from_utf8(b).map_err(|_| MappingError::mismatch("String", "bytes"))
            }
            other => Err(MappingError::mismatch("String", other.type_name())),
        }
    }
}

impl ToValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, MappingError> {
        match value {
            Value::Bytes(b) => Ok(b),
            Value::Text(s) => Ok(s.into_bytes()),
            other => Err(MappingError::mismatch("bytes", other.type_name())),
        }
    }
}

impl ToValue for Uuid {
    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self, MappingError> {
        match value {
            Value::Uuid(u) => Ok(u),
            // Engines without a binary UUID type hand back text or raw bytes
            Value::Text(s) => Uuid::parse_str(s.trim()).map_err(|_| MappingError::parse("uuid", s)),
            Value::Bytes(b) => {
                Uuid::from_slice(&b).map_err(|_| MappingError::out_of_range("uuid", b.len()))
            }
            other => Err(MappingError::mismatch("uuid", other.type_name())),
        }
    }
}

impl ToValue for NaiveDateTime {
    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }
}

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self, MappingError> {
        match value {
            Value::Timestamp(v) => Ok(v),
            Value::Text(s) => {
                let trimmed = s.trim();
                TIMESTAMP_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                    .or_else(|| {
                        DateTime::parse_from_rfc3339(trimmed)
                            .ok()
                            .map(|dt| dt.naive_utc())
                    })
                    .ok_or_else(|| MappingError::parse("timestamp", s))
            }
            other => Err(MappingError::mismatch("timestamp", other.type_name())),
        }
    }
}

impl ToValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::Timestamp(self.naive_utc())
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, MappingError> {
        NaiveDateTime::from_value(value).map(|naive| naive.and_utc())
    }
}

impl ToValue for JsonValue {
    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }
}

impl FromValue for JsonValue {
    fn from_value(value: Value) -> Result<Self, MappingError> {
        match value {
            Value::Json(v) => Ok(v),
            Value::Text(s) => serde_json::from_str(&s).map_err(|_| MappingError::parse("json", s)),
            Value::Bool(v) => Ok(JsonValue::Bool(v)),
            Value::Int(v) => Ok(JsonValue::from(v)),
            other => Err(MappingError::mismatch("json", other.type_name())),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
