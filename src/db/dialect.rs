//! Per-engine dialect strategies.
//!
//! A `Dialect` is the small set of constants and encoders that separate one
//! SQL engine from another: placeholder syntax, identifier quoting, how an
//! engine-assigned key is read back after an insert, and which value types
//! the engine stores natively.

use crate::models::{Engine, Value};

/// Name of the bound output parameter used by engines that return inserted
/// keys through `RETURNING ... INTO`.
pub const OUTPUT_PARAMETER: &str = "ret_id";

/// Native placeholder syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1, $2, ...`; repeated names reuse their ordinal.
    Numbered,
    /// `?`; one value per occurrence.
    Positional,
    /// `:name`; one value per distinct name.
    Named,
}

/// Identifier quoting convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    DoubleQuote,
    Backtick,
    /// Double quotes around the upper-cased name (unquoted identifiers fold to upper case).
    DoubleQuoteUpper,
}

/// How an engine-assigned key is read back after an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdRetrieval {
    /// `INSERT ... RETURNING id` read as a scalar.
    ReturningClause,
    /// A second statement on the same connection.
    FollowUpRead(&'static str),
    /// `RETURNING id INTO :ret_id` with a bound output parameter.
    OutputParameter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub engine: Engine,
    pub placeholder: PlaceholderStyle,
    pub quote: QuoteStyle,
    pub id_retrieval: IdRetrieval,
    pub native_bool: bool,
    pub native_uuid: bool,
    pub native_json: bool,
    /// A failed statement aborts the surrounding transaction until rolled
    /// back to a savepoint.
    pub savepoint_recovery: bool,
}

impl Dialect {
    pub const fn postgres() -> Self {
        Self {
            engine: Engine::Postgres,
            placeholder: PlaceholderStyle::Numbered,
            quote: QuoteStyle::DoubleQuote,
            id_retrieval: IdRetrieval::ReturningClause,
            native_bool: true,
            native_uuid: true,
            native_json: true,
            savepoint_recovery: true,
        }
    }

    pub const fn mysql() -> Self {
        Self {
            engine: Engine::MySql,
            placeholder: PlaceholderStyle::Positional,
            quote: QuoteStyle::Backtick,
            id_retrieval: IdRetrieval::FollowUpRead("SELECT LAST_INSERT_ID()"),
            native_bool: false,
            native_uuid: false,
            native_json: true,
            savepoint_recovery: false,
        }
    }

    pub const fn oracle() -> Self {
        Self {
            engine: Engine::Oracle,
            placeholder: PlaceholderStyle::Named,
            quote: QuoteStyle::DoubleQuoteUpper,
            id_retrieval: IdRetrieval::OutputParameter,
            native_bool: false,
            native_uuid: false,
            native_json: false,
            savepoint_recovery: false,
        }
    }

    pub const fn sqlite() -> Self {
        Self {
            engine: Engine::Sqlite,
            placeholder: PlaceholderStyle::Positional,
            quote: QuoteStyle::DoubleQuote,
            id_retrieval: IdRetrieval::FollowUpRead("SELECT last_insert_rowid()"),
            native_bool: false,
            native_uuid: false,
            native_json: false,
            savepoint_recovery: false,
        }
    }

    pub const fn odbc() -> Self {
        Self {
            engine: Engine::Odbc,
            placeholder: PlaceholderStyle::Positional,
            quote: QuoteStyle::DoubleQuote,
            id_retrieval: IdRetrieval::FollowUpRead("SELECT @@IDENTITY"),
            native_bool: false,
            native_uuid: false,
            native_json: false,
            savepoint_recovery: false,
        }
    }

    pub const fn for_engine(engine: Engine) -> Self {
        match engine {
            Engine::Postgres => Self::postgres(),
            Engine::MySql => Self::mysql(),
            Engine::Oracle => Self::oracle(),
            Engine::Sqlite => Self::sqlite(),
            Engine::Odbc => Self::odbc(),
        }
    }

    /// Quote an identifier, doubling any embedded quote characters.
    pub fn quote_identifier(&self, name: &str) -> String {
        match self.quote {
            QuoteStyle::DoubleQuote => format!("\"{}\"", name.replace('"', "\"\"")),
            QuoteStyle::Backtick => format!("`{}`", name.replace('`', "``")),
            QuoteStyle::DoubleQuoteUpper => {
                format!("\"{}\"", name.to_uppercase().replace('"', "\"\""))
            }
        }
    }

    /// Native placeholder for the parameter with the given 1-based ordinal.
    pub fn placeholder(&self, ordinal: usize, name: &str) -> String {
        match self.placeholder {
            PlaceholderStyle::Numbered => format!("${}", ordinal),
            PlaceholderStyle::Positional => "?".to_string(),
            PlaceholderStyle::Named => format!(":{}", name),
        }
    }

    /// Apply the engine's storage quirks to a parameter value.
    pub fn encode(&self, value: Value) -> Value {
        match value {
            Value::Bool(v) if !self.native_bool => Value::Int(v as i64),
            Value::Uuid(v) if !self.native_uuid => Value::Text(v.hyphenated().to_string()),
            Value::Json(v) if !self.native_json => Value::Text(v.to_string()),
            other => other,
        }
    }

    /// Default fragment appended to an insert to read back the key column.
    pub fn returning_fragment(&self, key_column: &str) -> Option<String> {
        let quoted = self.quote_identifier(key_column);
        match self.id_retrieval {
            IdRetrieval::ReturningClause => Some(format!(" RETURNING {}", quoted)),
            IdRetrieval::OutputParameter => {
                Some(format!(" RETURNING {} INTO :{}", quoted, OUTPUT_PARAMETER))
            }
            IdRetrieval::FollowUpRead(_) => None,
        }
    }
}
