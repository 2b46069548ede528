//! sqlbridge
//!
//! Multi-engine data-access core: one provider contract over PostgreSQL,
//! MySQL, Oracle, SQLite and ODBC dialects, structural row/entity mapping,
//! primary-key generation and transactions spanning several connections.

pub mod config;
pub mod db;
pub mod error;
pub mod id;
pub mod mapping;
pub mod models;

pub use config::Config;
pub use db::{
    BlockingDataProvider, DataProvider, Dialect, FailureLog, IdMode, NativeConnection,
    NativeDriver, SqlxDriver, TransactionCoordinator,
};
pub use error::{DbError, DbResult, MappingError};
pub use id::{IdGenerator, KeyType};
pub use mapping::{Entity, FromRecord, ObjectMapper};
pub use models::{Engine, Param, ParameterList, Record, Value};
