//! Per-type field-accessor tables.
//!
//! An entity registers its fields once with [`impl_entity!`](crate::impl_entity);
//! the resulting `EntitySchema` is built lazily on first use and shared for
//! the life of the process. Column matching is case-insensitive.

use crate::error::MappingError;
use crate::models::{Record, Value};
use std::collections::HashMap;

/// Name of the key field, matched case-insensitively.
pub const KEY_FIELD: &str = "id";

/// Accessors for one entity field.
pub struct FieldDef<T> {
    pub name: &'static str,
    pub get: fn(&T) -> Value,
    pub set: fn(&mut T, Value) -> Result<(), MappingError>,
}

impl<T> std::fmt::Debug for FieldDef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDef").field("name", &self.name).finish()
    }
}

#[derive(Debug)]
pub struct EntitySchema<T> {
    type_name: &'static str,
    fields: Vec<FieldDef<T>>,
    by_name: HashMap<String, usize>,
    key: Option<usize>,
}

impl<T> EntitySchema<T> {
    pub fn new(type_name: &'static str, fields: Vec<FieldDef<T>>) -> Self {
        let by_name: HashMap<String, usize> = fields
            .iter()
            .enumerate()
            .map(|(idx, field)| (field.name.to_lowercase(), idx))
            .collect();
        let key = by_name.get(KEY_FIELD).copied();
        Self {
            type_name,
            fields,
            by_name,
            key,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Look up a field by column name (case-insensitive).
    pub fn field(&self, column: &str) -> Option<&FieldDef<T>> {
        self.by_name
            .get(&column.to_lowercase())
            .map(|&idx| &self.fields[idx])
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDef<T>] {
        &self.fields
    }

    pub fn key(&self) -> Option<&FieldDef<T>> {
        self.key.map(|idx| &self.fields[idx])
    }
}

/// A struct with a registered field table.
pub trait Entity: Default + Send + Sync + 'static {
    fn schema() -> &'static EntitySchema<Self>;
}

/// Construction of a mapping target from one result row.
///
/// Scalars take the first column; entities match columns to fields by name.
/// `Ok(None)` means the row carried no usable value.
pub trait FromRecord: Sized {
    fn from_record(record: Record) -> Result<Option<Self>, MappingError>;
}

macro_rules! impl_scalar_from_record {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl FromRecord for $ty {
                fn from_record(record: Record) -> Result<Option<Self>, MappingError> {
                    match record.into_first() {
                        None | Some(Value::Null) => Ok(None),
                        Some(value) => <$ty as crate::models::FromValue>::from_value(value).map(Some),
                    }
                }
            }
        )+
    };
}

impl_scalar_from_record!(
    bool,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    Vec<u8>,
    uuid::Uuid,
    chrono::NaiveDateTime,
    chrono::DateTime<chrono::Utc>,
    serde_json::Value,
    Value,
);

/// Register a struct's fields as an [`Entity`] and make it a mapping target.
///
/// The struct must implement `Default`; every listed field must implement
/// `ToValue` and `FromValue`.
///
/// ```ignore
/// #[derive(Debug, Default)]
/// struct Person {
///     id: String,
///     name: String,
/// }
///
/// sqlbridge::impl_entity!(Person { id, name });
/// ```
#[macro_export]
macro_rules! impl_entity {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::mapping::Entity for $ty {
            fn schema() -> &'static $crate::mapping::EntitySchema<Self> {
                static SCHEMA: ::std::sync::OnceLock<$crate::mapping::EntitySchema<$ty>> =
                    ::std::sync::OnceLock::new();
                SCHEMA.get_or_init(|| {
                    $crate::mapping::EntitySchema::new(
                        stringify!($ty),
                        vec![
                            $(
                                $crate::mapping::FieldDef {
                                    name: stringify!($field),
                                    get: |entity: &$ty| {
                                        $crate::models::ToValue::to_value(&entity.$field)
                                    },
                                    set: |entity: &mut $ty, value: $crate::models::Value| {
                                        entity.$field = $crate::models::FromValue::from_value(value)?;
                                        Ok(())
                                    },
                                },
                            )+
                        ],
                    )
                })
            }
        }

        impl $crate::mapping::FromRecord for $ty {
            fn from_record(
                record: $crate::models::Record,
            ) -> ::std::result::Result<::std::option::Option<Self>, $crate::error::MappingError> {
                Ok(Some($crate::mapping::ObjectMapper::map_entity::<$ty>(record)))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Widget {
        id: i64,
        label: String,
    }

    crate::impl_entity!(Widget { id, label });

    #[test]
    fn test_schema_lookup_is_case_insensitive() {
        let schema = Widget::schema();
        assert_eq!(schema.type_name(), "Widget");
        assert_eq!(schema.field("LABEL").map(|f| f.name), Some("label"));
        assert!(schema.field("missing").is_none());
        assert_eq!(schema.key().map(|f| f.name), Some("id"));
    }

    #[test]
    fn test_schema_is_built_once() {
        assert!(std::ptr::eq(Widget::schema(), Widget::schema()));
    }

    #[test]
    fn test_accessors() {
        let schema = Widget::schema();
        let mut widget = Widget::default();
        let label = schema.field("label").unwrap();
        (label.set)(&mut widget, Value::Text("bolt".into())).unwrap();
        assert_eq!((label.get)(&widget), Value::Text("bolt".into()));

        let id = schema.key().unwrap();
        assert!((id.set)(&mut widget, Value::Text("x".into())).is_err());
        assert_eq!(widget.id, 0);
    }

    #[test]
    fn test_scalar_from_first_column() {
        let record = Record::new(vec![
            ("n".to_string(), Value::Int(7)),
            ("other".to_string(), Value::Text("x".into())),
        ]);
        assert_eq!(i32::from_record(record).unwrap(), Some(7));
        assert_eq!(
            String::from_record(Record::new(vec![("n".to_string(), Value::Null)])).unwrap(),
            None
        );
        assert_eq!(i64::from_record(Record::default()).unwrap(), None);
    }
}
