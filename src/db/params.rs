//! Parameter binding.
//!
//! Command text references parameters as `@name`. The binder rewrites those
//! references into the dialect's native placeholders and produces the value
//! list in the order the engine expects. The `bind_*_value` functions then
//! attach those values to sqlx queries.

use crate::db::dialect::{Dialect, PlaceholderStyle};
use crate::error::{DbError, DbResult};
use crate::mapping::{Entity, ObjectMapper};
use crate::models::{Engine, ParameterList, Value};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo};
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{Encode, MySql, Postgres, Sqlite, Type};
use std::collections::HashMap;

/// A statement ready for a native connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    /// Values in native placeholder order.
    pub values: Vec<Value>,
    /// Source parameter name for each value.
    pub names: Vec<String>,
}

impl BoundStatement {
    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    pub fn is_parameterized(&self) -> bool {
        !self.values.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParameterBinder {
    dialect: Dialect,
}

impl ParameterBinder {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Rewrite `@name` references and collect their values.
    ///
    /// Fails if a referenced parameter is missing or if the list contains the
    /// same name twice. Parameters the text never references are ignored.
    pub fn bind(&self, sql: &str, params: &ParameterList) -> DbResult<BoundStatement> {
        let mut lookup: HashMap<String, &Value> = HashMap::with_capacity(params.len());
        for param in params {
            if lookup
                .insert(param.name.to_lowercase(), &param.value)
                .is_some()
            {
                return Err(DbError::binding(format!(
                    "Parameter '{}' is supplied more than once",
                    param.name
                )));
            }
        }

        let mut bound = BoundStatement {
            sql: String::with_capacity(sql.len()),
            ..BoundStatement::default()
        };
        // Lowercased name -> ordinal, for styles that reuse placeholders
        let mut ordinals: HashMap<String, usize> = HashMap::new();

        // MySQL also accepts backslash escapes inside quoted runs
        let backslash_escapes = self.dialect.engine == Engine::MySql;
        let chars: Vec<char> = sql.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            match c {
                '\'' | '"' | '`' => {
                    let end = skip_quoted(&chars, i, c, backslash_escapes && c != '`');
                    bound.sql.extend(&chars[i..end]);
                    i = end;
                }
                '-' if chars.get(i + 1) == Some(&'-') => {
                    let end = chars[i..]
                        .iter()
                        .position(|&ch| ch == '\n')
                        .map_or(chars.len(), |p| i + p);
                    bound.sql.extend(&chars[i..end]);
                    i = end;
                }
                '/' if chars.get(i + 1) == Some(&'*') => {
                    let end = find_comment_end(&chars, i + 2);
                    bound.sql.extend(&chars[i..end]);
                    i = end;
                }
                // Session/system variables such as @@IDENTITY
                '@' if chars.get(i + 1) == Some(&'@') => {
                    let end = identifier_end(&chars, i + 2);
                    bound.sql.extend(&chars[i..end]);
                    i = end;
                }
                '@' if chars.get(i + 1).is_some_and(|&ch| is_identifier_start(ch)) => {
                    let end = identifier_end(&chars, i + 1);
                    let name: String = chars[i + 1..end].iter().collect();
                    self.push_reference(&mut bound, &mut ordinals, &lookup, name)?;
                    i = end;
                }
                _ => {
                    bound.sql.push(c);
                    i += 1;
                }
            }
        }

        Ok(bound)
    }

    /// Bind an entity's fields as the parameter list.
    pub fn bind_entity<T: Entity>(&self, sql: &str, entity: &T) -> DbResult<BoundStatement> {
        self.bind(sql, &ObjectMapper::map_entity_to_parameters(entity))
    }

    fn push_reference(
        &self,
        bound: &mut BoundStatement,
        ordinals: &mut HashMap<String, usize>,
        lookup: &HashMap<String, &Value>,
        name: String,
    ) -> DbResult<()> {
        let key = name.to_lowercase();
        let value = lookup
            .get(&key)
            .ok_or_else(|| DbError::binding(format!("No value supplied for parameter '@{}'", name)))?;

        match self.dialect.placeholder {
            PlaceholderStyle::Positional => {
                bound.values.push(self.dialect.encode((*value).clone()));
                bound.names.push(name.clone());
                bound
                    .sql
                    .push_str(&self.dialect.placeholder(bound.values.len(), &name));
            }
            PlaceholderStyle::Numbered | PlaceholderStyle::Named => {
                let ordinal = match ordinals.get(&key) {
                    Some(&ordinal) => ordinal,
                    None => {
                        bound.values.push(self.dialect.encode((*value).clone()));
                        bound.names.push(name.clone());
                        ordinals.insert(key, bound.values.len());
                        bound.values.len()
                    }
                };
                let native_name = &bound.names[ordinal - 1];
                let placeholder = self.dialect.placeholder(ordinal, native_name);
                bound.sql.push_str(&placeholder);
            }
        }
        Ok(())
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn identifier_end(chars: &[char], start: usize) -> usize {
    chars[start..]
        .iter()
        .position(|&c| !(c.is_alphanumeric() || c == '_'))
        .map_or(chars.len(), |p| start + p)
}

/// End (exclusive) of a quoted run starting at `start`. Doubled quotes are
/// escapes, as is any character after `\` when `backslash_escapes` is set.
fn skip_quoted(chars: &[char], start: usize, quote: char, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if backslash_escapes && chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

fn find_comment_end(chars: &[char], start: usize) -> usize {
    let mut i = start;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}

/// Bind a value to a MySQL query.
pub(crate) fn bind_mysql_value<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Uuid(v) => query.bind(v.hyphenated().to_string()),
        Value::Timestamp(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Json(v) => query.bind(Json(v)),
    }
}

/// A NULL parameter sent with an unspecified type (OID 0).
///
/// PostgreSQL infers the type from the statement, so the same marker fits
/// bigint, uuid or timestamp columns. A typed `None::<String>` would not.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// Bind a value to a PostgreSQL query.
pub(crate) fn bind_postgres_value<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(UntypedNull),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Uuid(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a value to a SQLite query.
pub(crate) fn bind_sqlite_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Uuid(v) => query.bind(v.hyphenated().to_string()),
        Value::Timestamp(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        // SQLite doesn't have native JSON type, store as string
        Value::Json(v) => query.bind(v.to_string()),
    }
}
