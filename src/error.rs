//! Error types for the data-access core.
//!
//! This module defines all error types using `thiserror`. Provider operations
//! never surface these to callers; they are converted into neutral return
//! values at the provider boundary and reported to the failure log. Lower
//! layers (binder, native drivers, coordinator) propagate them with `?`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Binding error: {message}")]
    Binding { message: String },

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("{operation} is not supported by the {engine} client")]
    Unsupported { engine: String, operation: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a parameter binding error.
    pub fn binding(message: impl Into<String>) -> Self {
        Self::Binding {
            message: message.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(engine: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            engine: engine.into(),
            operation: operation.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Extra context for failure logs: SQL state and suggestion when known.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Database {
                sql_state: Some(code),
                suggestion,
                ..
            } => Some(format!("SQLSTATE {}; {}", code, suggestion)),
            _ => self.suggestion().map(String::from),
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out acquiring a pooled connection",
                "Increase acquire_timeout or max_connections",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::internal(format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Value conversion failures raised by the object mapper.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("cannot convert {found} value into {expected}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("value {value} is out of range for {expected}")]
    OutOfRange { expected: &'static str, value: String },

    #[error("cannot parse {value:?} as {expected}")]
    Parse { expected: &'static str, value: String },
}

impl MappingError {
    pub fn mismatch(expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch { expected, found }
    }

    pub fn out_of_range(expected: &'static str, value: impl ToString) -> Self {
        Self::OutOfRange {
            expected,
            value: value.to_string(),
        }
    }

    pub fn parse(expected: &'static str, value: impl Into<String>) -> Self {
        Self::Parse {
            expected,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
    }

    #[test]
    fn test_detail_includes_sql_state() {
        let err = DbError::database("division by zero", Some("22012".to_string()), "check");
        let detail = err.detail().unwrap();
        assert!(detail.contains("22012"));
        assert!(detail.contains("check"));
    }

    #[test]
    fn test_detail_absent_for_binding_errors() {
        assert!(DbError::binding("missing @name").detail().is_none());
    }

    #[test]
    fn test_mapping_error_converts() {
        let err: DbError = MappingError::mismatch("bool", "text").into();
        assert!(matches!(err, DbError::Mapping(_)));
        assert_eq!(err.to_string(), "cannot convert text value into bool");
    }

    #[test]
    fn test_unsupported_display() {
        let err = DbError::unsupported("SQLite", "Output parameters");
        assert_eq!(
            err.to_string(),
            "Output parameters is not supported by the SQLite client"
        );
    }
}
