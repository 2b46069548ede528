//! Connection-related data models.
//!
//! This module defines the supported engines and per-connection configuration.

use crate::config::PoolOptions;
use serde::{Deserialize, Serialize};

/// Supported SQL engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgres,
    /// Includes MariaDB
    MySql,
    Oracle,
    Sqlite,
    /// Any engine reached through a generic ODBC driver
    Odbc,
}

impl Engine {
    pub const ALL: [Engine; 5] = [
        Engine::Postgres,
        Engine::MySql,
        Engine::Oracle,
        Engine::Sqlite,
        Engine::Odbc,
    ];

    /// Parse the engine from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySql)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else if lower.starts_with("oracle://") {
            Some(Self::Oracle)
        } else if lower.starts_with("odbc:") || lower.starts_with("driver=") || lower.starts_with("dsn=")
        {
            Some(Self::Odbc)
        } else {
            None
        }
    }

    /// Get the display name for this engine.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::Oracle => "Oracle",
            Self::Sqlite => "SQLite",
            Self::Odbc => "ODBC",
        }
    }

    /// Whether the built-in sqlx driver can serve this engine.
    pub fn has_builtin_driver(&self) -> bool {
        matches!(self, Self::Postgres | Self::MySql | Self::Sqlite)
    }

    /// Get the default port for this engine.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::MySql => Some(3306),
            Self::Oracle => Some(1521),
            Self::Sqlite | Self::Odbc => None,
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Configuration for a database connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub id: String,
    pub engine: Engine,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub connection_string: String,
    /// Connection pool configuration options.
    #[serde(default)]
    pub pool_options: PoolOptions,
}

impl ConnectionConfig {
    /// Create a new connection configuration.
    pub fn new(
        id: impl Into<String>,
        connection_string: impl Into<String>,
        pool_options: PoolOptions,
    ) -> Result<Self, ConnectionConfigError> {
        let id = id.into();
        let connection_string = connection_string.into();

        if id.is_empty() {
            return Err(ConnectionConfigError::EmptyId);
        }
        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConnectionConfigError::InvalidId(id));
        }

        let engine = Engine::from_connection_string(&connection_string)
            .ok_or_else(|| ConnectionConfigError::UnknownEngine(connection_string.clone()))?;

        Ok(Self {
            id,
            engine,
            connection_string,
            pool_options,
        })
    }

    /// Get a display-safe version of the connection string (credentials masked).
    pub fn masked_connection_string(&self) -> String {
        if let Some(at_pos) = self.connection_string.find('@') {
            if let Some(colon_pos) = self.connection_string[..at_pos].rfind(':') {
                let prefix = &self.connection_string[..colon_pos + 1];
                let suffix = &self.connection_string[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        self.connection_string.clone()
    }
}

/// Errors that can occur when creating a connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionConfigError {
    #[error("Connection ID cannot be empty")]
    EmptyId,

    #[error("Connection ID contains invalid characters: {0}")]
    InvalidId(String),

    #[error("Unknown database engine in connection string: {0}")]
    UnknownEngine(String),
}
