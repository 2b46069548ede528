//! Native client seam.
//!
//! Providers talk to engines only through these traits. The crate ships an
//! sqlx-backed driver for PostgreSQL, MySQL and SQLite; Oracle and ODBC
//! clients plug in by implementing the same pair of traits.

use crate::db::params::BoundStatement;
use crate::error::{DbError, DbResult};
use crate::models::{Engine, Record, Value};
use async_trait::async_trait;

/// One open connection to an engine.
///
/// At most one transaction is open at a time. Statements run inside it when
/// it is open and auto-commit otherwise.
#[async_trait]
pub trait NativeConnection: Send {
    fn engine(&self) -> Engine;

    async fn begin(&mut self) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Run a non-query and return the affected row count.
    async fn execute(&mut self, stmt: &BoundStatement) -> DbResult<u64>;

    async fn fetch_all(&mut self, stmt: &BoundStatement) -> DbResult<Vec<Record>>;

    async fn fetch_optional(&mut self, stmt: &BoundStatement) -> DbResult<Option<Record>>;

    /// Run a statement carrying an output parameter and return its value.
    async fn execute_returning(
        &mut self,
        stmt: &BoundStatement,
        output: &str,
    ) -> DbResult<Option<Value>> {
        let _ = (stmt, output);
        Err(DbError::unsupported(
            self.engine().display_name(),
            "Output parameters",
        ))
    }

    /// Release the connection. An open transaction is rolled back.
    async fn close(&mut self) -> DbResult<()>;
}

/// Factory for native connections to one database.
#[async_trait]
pub trait NativeDriver: Send + Sync {
    fn engine(&self) -> Engine;

    async fn connect(&self) -> DbResult<Box<dyn NativeConnection>>;
}
