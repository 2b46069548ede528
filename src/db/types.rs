//! Row decoding for the sqlx-backed engines.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Engine-specific decoders extract the value into a [`Value`]
//!
//! A value that fails to decode in its category is read back as text where
//! possible. A non-null value that still cannot be decoded becomes null and
//! is logged with its column and type. Row-level failures are left to the
//! object mapper.

use crate::error::DbResult;
use crate::models::{Engine, Record, Value};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    Unknown,
}

/// Integer type names, compared against the first token of the type name.
const INTEGER_TYPES: &[&str] = &[
    "int", "int2", "int4", "int8", "integer", "smallint", "bigint", "tinyint", "mediumint",
    "serial", "serial2", "serial4", "serial8", "smallserial", "bigserial",
];

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, engine: Engine) -> TypeCategory {
    let lower = type_name.to_lowercase();
    // "INT UNSIGNED", "tinyint(1)"
    let base = lower
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if engine == Engine::Sqlite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if INTEGER_TYPES.contains(&base) {
        return TypeCategory::Integer;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.starts_with("timestamp") || lower == "datetime" {
        return TypeCategory::Timestamp;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Conversion of an sqlx row into a [`Record`].
pub trait RowToRecord {
    fn to_record(&self) -> DbResult<Record>;
}

impl RowToRecord for MySqlRow {
    fn to_record(&self) -> DbResult<Record> {
        let mut columns = Vec::with_capacity(self.columns().len());
        for (idx, col) in self.columns().iter().enumerate() {
            let raw = self.try_get_raw(idx)?;
            let value = if raw.is_null() {
                Value::Null
            } else {
                let type_name = raw.type_info().name().to_string();
                let category = categorize_type(&type_name, Engine::MySql);
                undecodable_as_null(
                    mysql::decode_column(self, idx, category),
                    idx,
                    &type_name,
                )
            };
            columns.push((col.name().to_string(), value));
        }
        Ok(Record::new(columns))
    }
}

impl RowToRecord for PgRow {
    fn to_record(&self) -> DbResult<Record> {
        let mut columns = Vec::with_capacity(self.columns().len());
        for (idx, col) in self.columns().iter().enumerate() {
            let raw = self.try_get_raw(idx)?;
            let value = if raw.is_null() {
                Value::Null
            } else {
                let type_name = raw.type_info().name().to_string();
                let category = categorize_type(&type_name, Engine::Postgres);
                undecodable_as_null(
                    postgres::decode_column(self, idx, &type_name, category),
                    idx,
                    &type_name,
                )
            };
            columns.push((col.name().to_string(), value));
        }
        Ok(Record::new(columns))
    }
}

impl RowToRecord for SqliteRow {
    fn to_record(&self) -> DbResult<Record> {
        let mut columns = Vec::with_capacity(self.columns().len());
        for (idx, col) in self.columns().iter().enumerate() {
            let raw = self.try_get_raw(idx)?;
            let value = if raw.is_null() {
                Value::Null
            } else {
                // Storage class of this value, not the declared column type
                let type_name = raw.type_info().name().to_string();
                let category = categorize_type(&type_name, Engine::Sqlite);
                undecodable_as_null(
                    sqlite::decode_column(self, idx, &type_name, category),
                    idx,
                    &type_name,
                )
            };
            columns.push((col.name().to_string(), value));
        }
        Ok(Record::new(columns))
    }
}

/// Decoders only see non-null values, so a null result is a decode failure.
fn undecodable_as_null(value: Value, idx: usize, type_name: &str) -> Value {
    if value.is_null() {
        tracing::warn!(
            column = idx,
            type_name = %type_name,
            "Column value could not be decoded, reading it as NULL"
        );
    }
    value
}

// =============================================================================
// Engine-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> Value {
        match row.try_get::<RawDecimal, _>(idx) {
            Ok(v) => Value::Text(v.0),
            Err(e) => {
                tracing::error!(column = idx, error = %e, "Failed to decode DECIMAL");
                Value::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Value::Int(v);
        }
        // Unsigned types
        if let Ok(v) = row.try_get::<u8, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u16, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u64, _>(idx) {
            // Values beyond i64 keep their exact digits as text
            return i64::try_from(v)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(v.to_string()));
        }
        decode_text(row, idx)
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<bool, _>(idx)
            .map(Value::Bool)
            .unwrap_or(Value::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return Value::Float(v);
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return Value::Float(v.into());
        }
        Value::Null
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<Vec<u8>, _>(idx)
            .map(Value::Bytes)
            .unwrap_or(Value::Null)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<serde_json::Value, _>(idx)
            .map(Value::Json)
            .unwrap_or(Value::Null)
    }

    fn decode_timestamp(row: &MySqlRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
            return Value::Timestamp(v);
        }
        if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx) {
            return Value::Timestamp(v.naive_utc());
        }
        Value::Null
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Value {
        match row.try_get::<String, _>(idx) {
            Ok(v) => Value::Text(v),
            Err(_) => row
                .try_get::<Vec<u8>, _>(idx)
                .map(Value::Bytes)
                .unwrap_or(Value::Null),
        }
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, type_name: &str, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            _ => decode_text(row, idx, type_name),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> Value {
        match row.try_get::<RawDecimal, _>(idx) {
            Ok(v) => Value::Text(v.0),
            Err(e) => {
                tracing::error!(column = idx, error = %e, "Failed to decode NUMERIC");
                Value::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Value::Int(v);
        }
        Value::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> Value {
        row.try_get::<bool, _>(idx)
            .map(Value::Bool)
            .unwrap_or(Value::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return Value::Float(v);
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return Value::Float(v.into());
        }
        Value::Null
    }

    fn decode_binary(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Vec<u8>, _>(idx)
            .map(Value::Bytes)
            .unwrap_or(Value::Null)
    }

    fn decode_json(row: &PgRow, idx: usize) -> Value {
        row.try_get::<serde_json::Value, _>(idx)
            .map(Value::Json)
            .unwrap_or(Value::Null)
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> Value {
        row.try_get::<uuid::Uuid, _>(idx)
            .map(Value::Uuid)
            .unwrap_or(Value::Null)
    }

    fn decode_timestamp(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
            return Value::Timestamp(v);
        }
        if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx) {
            return Value::Timestamp(v.naive_utc());
        }
        Value::Null
    }

    fn decode_text(row: &PgRow, idx: usize, type_name: &str) -> Value {
        match row.try_get::<String, _>(idx) {
            Ok(v) => Value::Text(v),
            Err(e) => {
                tracing::debug!(column = idx, type_name = %type_name, error = %e, "No text decoding");
                Value::Null
            }
        }
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, type_name: &str, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            _ => decode_text(row, idx, type_name),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> Value {
        row.try_get::<i64, _>(idx)
            .map(Value::Int)
            .unwrap_or(Value::Null)
    }

    fn decode_boolean(row: &SqliteRow, idx: usize) -> Value {
        row.try_get::<bool, _>(idx)
            .map(Value::Bool)
            .unwrap_or(Value::Null)
    }

    fn decode_float(row: &SqliteRow, idx: usize) -> Value {
        row.try_get::<f64, _>(idx)
            .map(Value::Float)
            .unwrap_or(Value::Null)
    }

    fn decode_binary(row: &SqliteRow, idx: usize) -> Value {
        row.try_get::<Vec<u8>, _>(idx)
            .map(Value::Bytes)
            .unwrap_or(Value::Null)
    }

    fn decode_text(row: &SqliteRow, idx: usize, type_name: &str) -> Value {
        match row.try_get::<String, _>(idx) {
            Ok(v) => Value::Text(v),
            Err(e) => {
                tracing::debug!(column = idx, type_name = %type_name, error = %e, "No text decoding");
                Value::Null
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT", Engine::MySql), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT", Engine::Postgres), TypeCategory::Integer);
        assert_eq!(categorize_type("TINYINT", Engine::MySql), TypeCategory::Integer);
        assert_eq!(categorize_type("INTEGER", Engine::Sqlite), TypeCategory::Integer);
        assert_eq!(categorize_type("INT4", Engine::Postgres), TypeCategory::Integer);
        assert_eq!(categorize_type("INT UNSIGNED", Engine::MySql), TypeCategory::Integer);
        assert_eq!(categorize_type("tinyint(1)", Engine::MySql), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGSERIAL", Engine::Postgres), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_type_names_containing_int() {
        assert_eq!(categorize_type("INTERVAL", Engine::Postgres), TypeCategory::Unknown);
        assert_eq!(categorize_type("POINT", Engine::Postgres), TypeCategory::Unknown);
        assert_eq!(categorize_type("INT4RANGE", Engine::Postgres), TypeCategory::Unknown);
    }

    #[test]
    fn test_undecodable_value_reads_as_null() {
        assert_eq!(undecodable_as_null(Value::Null, 0, "interval"), Value::Null);
        assert_eq!(undecodable_as_null(Value::Int(1), 0, "int8"), Value::Int(1));
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(categorize_type("DECIMAL", Engine::MySql), TypeCategory::Decimal);
        assert_eq!(categorize_type("NUMERIC", Engine::Postgres), TypeCategory::Decimal);
        // SQLite NUMERIC is a float
        assert_eq!(categorize_type("numeric", Engine::Sqlite), TypeCategory::Float);
    }

    #[test]
    fn test_categorize_type_temporal_and_identity() {
        assert_eq!(categorize_type("TIMESTAMPTZ", Engine::Postgres), TypeCategory::Timestamp);
        assert_eq!(categorize_type("DATETIME", Engine::MySql), TypeCategory::Timestamp);
        assert_eq!(categorize_type("UUID", Engine::Postgres), TypeCategory::Uuid);
        assert_eq!(categorize_type("BOOLEAN", Engine::Sqlite), TypeCategory::Boolean);
    }

    #[test]
    fn test_categorize_type_text_and_binary() {
        assert_eq!(categorize_type("VARCHAR", Engine::MySql), TypeCategory::Text);
        assert_eq!(categorize_type("TEXT", Engine::Sqlite), TypeCategory::Text);
        assert_eq!(categorize_type("BYTEA", Engine::Postgres), TypeCategory::Binary);
        assert_eq!(categorize_type("BLOB", Engine::Sqlite), TypeCategory::Binary);
        assert_eq!(categorize_type("json", Engine::Postgres), TypeCategory::Json);
        assert_eq!(categorize_type("INTERVAL", Engine::Postgres), TypeCategory::Unknown);
    }
}
