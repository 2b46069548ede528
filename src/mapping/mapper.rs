use crate::mapping::entity::{Entity, FromRecord};
use crate::models::{Param, ParameterList, Record, RowCursor};
use tracing::warn;

/// Structural row/entity mapping.
///
/// Mapping failures never abort a scan: a field that cannot be converted is
/// left at its default, and a row that cannot be converted is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectMapper;

impl ObjectMapper {
    /// Map one row, or `None` if it is empty, null or unconvertible.
    pub fn map_row<T: FromRecord>(record: Record) -> Option<T> {
        match T::from_record(record) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    target_type = std::any::type_name::<T>(),
                    error = %e,
                    "Row could not be mapped"
                );
                None
            }
        }
    }

    /// Map every remaining row of a cursor, skipping rows that fail.
    pub fn map_cursor<T: FromRecord>(cursor: RowCursor) -> Vec<T> {
        let mut mapped = Vec::with_capacity(cursor.remaining());
        for (row, record) in cursor.enumerate() {
            match T::from_record(record) {
                Ok(Some(value)) => mapped.push(value),
                Ok(None) => {}
                Err(e) => warn!(
                    target_type = std::any::type_name::<T>(),
                    row = row,
                    error = %e,
                    "Skipping row that could not be mapped"
                ),
            }
        }
        mapped
    }

    /// Build an entity from a row by case-insensitive column/field matching.
    ///
    /// Unmatched columns are ignored and null columns leave the default.
    pub fn map_entity<T: Entity>(record: Record) -> T {
        let schema = T::schema();
        let mut entity = T::default();
        for (column, value) in record {
            if value.is_null() {
                continue;
            }
            let Some(field) = schema.field(&column) else {
                continue;
            };
            if let Err(e) = (field.set)(&mut entity, value) {
                warn!(
                    entity = schema.type_name(),
                    field = field.name,
                    error = %e,
                    "Field could not be mapped, leaving default"
                );
            }
        }
        entity
    }

    /// One parameter per field, in declaration order. `None` becomes an explicit null.
    pub fn map_entity_to_parameters<T: Entity>(entity: &T) -> ParameterList {
        T::schema()
            .fields()
            .iter()
            .map(|field| Param {
                name: field.name.to_string(),
                value: (field.get)(entity),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;
    use uuid::Uuid;

    #[derive(Debug, Default, PartialEq)]
    struct Account {
        id: Option<Uuid>,
        owner: String,
        active: bool,
        balance: f64,
    }

    crate::impl_entity!(Account {
        id,
        owner,
        active,
        balance
    });

    fn row(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_map_entity_by_name() {
        let id = Uuid::new_v4();
        let account: Account = ObjectMapper::map_entity(row(&[
            ("ID", Value::Text(id.to_string())),
            ("Owner", Value::Text("ana".into())),
            ("ACTIVE", Value::Int(1)),
            ("balance", Value::Float(2.5)),
            ("unrelated", Value::Int(9)),
        ]));
        assert_eq!(
            account,
            Account {
                id: Some(id),
                owner: "ana".into(),
                active: true,
                balance: 2.5,
            }
        );
    }

    #[test]
    fn test_null_and_bad_fields_keep_defaults() {
        let account: Account = ObjectMapper::map_entity(row(&[
            ("owner", Value::Null),
            ("active", Value::Text("maybe".into())),
            ("balance", Value::Float(1.0)),
        ]));
        assert_eq!(account.owner, "");
        assert!(!account.active);
        assert_eq!(account.balance, 1.0);
    }

    #[test]
    fn test_map_cursor_skips_failed_rows() {
        let rows: Vec<Record> = (1..=10)
            .map(|i| {
                let value = if i == 3 {
                    Value::Text("three".into())
                } else {
                    Value::Int(i)
                };
                row(&[("n", value)])
            })
            .collect();

        let mapped: Vec<i64> = ObjectMapper::map_cursor(RowCursor::new(rows));
        assert_eq!(mapped, vec![1, 2, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_map_row_scalar_and_entity() {
        assert_eq!(
            ObjectMapper::map_row::<i64>(row(&[("count", Value::Int(4))])),
            Some(4)
        );
        assert_eq!(
            ObjectMapper::map_row::<i64>(row(&[("count", Value::Bytes(vec![1]))])),
            None
        );
        let account = ObjectMapper::map_row::<Account>(row(&[("owner", Value::Text("b".into()))]));
        assert_eq!(account.map(|a| a.owner), Some("b".to_string()));
    }

    #[test]
    fn test_entity_to_parameters() {
        let account = Account {
            id: None,
            owner: "c".into(),
            active: true,
            balance: 0.0,
        };
        let params = ObjectMapper::map_entity_to_parameters(&account);
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["id", "owner", "active", "balance"]);
        assert_eq!(params.get("id"), Some(&Value::Null));
        assert_eq!(params.get("active"), Some(&Value::Bool(true)));
    }
}
