//! Engine data provider.
//!
//! One provider type serves every engine; the engine-specific parts come
//! from its [`Dialect`]. Each operation exists in two shapes:
//!
//! - connection-owning (`op`): connects through the driver, runs, and closes
//!   the connection on every exit path;
//! - transaction-bound (`op_in`): runs on the coordinator slot at `index`,
//!   opening it with this provider's driver on first use.
//!
//! Operations never return errors. A failure is reported to the failure log,
//! flags the coordinator when one is bound, and yields `None`, `false` or an
//! empty list.

use crate::db::dialect::{Dialect, IdRetrieval, OUTPUT_PARAMETER};
use crate::db::failure_log::{FailureEntry, FailureLog};
use crate::db::native::{NativeConnection, NativeDriver};
use crate::db::params::{BoundStatement, ParameterBinder};
use crate::db::transaction::TransactionCoordinator;
use crate::error::{DbError, DbResult};
use crate::id::{IdGenerator, KeyType};
use crate::mapping::{Entity, FieldDef, FromRecord, ObjectMapper};
use crate::models::{Engine, FromValue, ParameterList, Record, RowCursor, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where an inserted entity's key comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMode {
    /// Generate the key before the insert and write it into the entity.
    PreGenerate,
    /// Let the engine assign the key and read it back.
    EngineAssigned,
}

enum Scope<'t> {
    Owned,
    Bound(&'t mut TransactionCoordinator, usize),
}

/// A connection for the duration of one operation.
enum Lease<'s> {
    Owned(Box<dyn NativeConnection>),
    Slot(&'s mut dyn NativeConnection),
}

impl Lease<'_> {
    fn conn(&mut self) -> &mut dyn NativeConnection {
        match self {
            Lease::Owned(conn) => conn.as_mut(),
            Lease::Slot(conn) => &mut **conn,
        }
    }

    async fn release(self) {
        if let Lease::Owned(mut conn) = self {
            if let Err(e) = conn.close().await {
                warn!(engine = %conn.engine(), error = %e, "Failed to close connection");
            }
        }
    }
}

#[derive(Clone)]
pub struct DataProvider {
    dialect: Dialect,
    binder: ParameterBinder,
    driver: Arc<dyn NativeDriver>,
    failures: FailureLog,
}

impl DataProvider {
    pub fn new(dialect: Dialect, driver: Arc<dyn NativeDriver>, failures: FailureLog) -> Self {
        if dialect.engine != driver.engine() {
            warn!(
                dialect = %dialect.engine,
                driver = %driver.engine(),
                "Dialect and driver engines differ"
            );
        }
        Self {
            dialect,
            binder: ParameterBinder::new(dialect),
            driver,
            failures,
        }
    }

    /// Provider using the standard dialect for `engine`.
    pub fn for_engine(engine: Engine, driver: Arc<dyn NativeDriver>, failures: FailureLog) -> Self {
        Self::new(Dialect::for_engine(engine), driver, failures)
    }

    pub fn engine(&self) -> Engine {
        self.dialect.engine
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn failure_log(&self) -> &FailureLog {
        &self.failures
    }

    // ---- insert ----

    /// Insert `entry` and return its key.
    ///
    /// `prefix` opens the column list (`INSERT INTO person (name`) and
    /// `suffix` opens the values list (`VALUES (@name`); both lists are closed
    /// here, with the key column appended in [`IdMode::PreGenerate`].
    /// `returning_clause` replaces the dialect's default way of reading an
    /// engine-assigned key: the appended `RETURNING` fragment, or the
    /// follow-up read statement.
    pub async fn insert_scalar<T: Entity, G: KeyType>(
        &self,
        prefix: &str,
        suffix: &str,
        entry: &mut T,
        id_mode: IdMode,
        returning_clause: Option<&str>,
    ) -> Option<G> {
        self.insert_scoped(&mut Scope::Owned, prefix, suffix, entry, id_mode, returning_clause)
            .await
    }

    pub async fn insert_scalar_in<T: Entity, G: KeyType>(
        &self,
        tx: &mut TransactionCoordinator,
        index: usize,
        prefix: &str,
        suffix: &str,
        entry: &mut T,
        id_mode: IdMode,
        returning_clause: Option<&str>,
    ) -> Option<G> {
        self.insert_scoped(
            &mut Scope::Bound(tx, index),
            prefix,
            suffix,
            entry,
            id_mode,
            returning_clause,
        )
        .await
    }

    /// Insert every entry on the slot at `index`, in order.
    ///
    /// The result has one element per entry; a failed entry yields `None` at
    /// its position and flags the coordinator. On engines where an error
    /// aborts the surrounding transaction each entry runs under its own
    /// savepoint, so later entries still succeed.
    pub async fn multi_insert_scalar<T: Entity, G: KeyType>(
        &self,
        tx: &mut TransactionCoordinator,
        index: usize,
        prefix: &str,
        suffix: &str,
        entries: &mut [T],
        id_mode: IdMode,
        returning_clause: Option<&str>,
    ) -> Vec<Option<G>> {
        let mut scope = Scope::Bound(tx, index);
        let mut ids = Vec::with_capacity(entries.len());

        for (n, entry) in entries.iter_mut().enumerate() {
            if !self.dialect.savepoint_recovery {
                ids.push(
                    self.insert_scoped(&mut scope, prefix, suffix, entry, id_mode, returning_clause)
                        .await,
                );
                continue;
            }

            let savepoint = format!("sp_{}", n);
            if !self
                .run_control(&mut scope, &format!("SAVEPOINT {}", savepoint))
                .await
            {
                ids.push(None);
                continue;
            }
            let id = self
                .insert_scoped(&mut scope, prefix, suffix, entry, id_mode, returning_clause)
                .await;
            let finish = if id.is_some() {
                format!("RELEASE SAVEPOINT {}", savepoint)
            } else {
                format!("ROLLBACK TO SAVEPOINT {}", savepoint)
            };
            self.run_control(&mut scope, &finish).await;
            ids.push(id);
        }

        ids
    }

    async fn insert_scoped<T: Entity, G: KeyType>(
        &self,
        scope: &mut Scope<'_>,
        prefix: &str,
        suffix: &str,
        entry: &mut T,
        id_mode: IdMode,
        returning_clause: Option<&str>,
    ) -> Option<G> {
        const OP: &str = "insert_scalar";

        let schema = T::schema();
        let Some(key) = schema.key() else {
            let err = DbError::configuration(format!("{} has no id field", schema.type_name()));
            self.fail(scope, OP, prefix, &err);
            return None;
        };

        match id_mode {
            IdMode::PreGenerate => {
                self.insert_pre_generated(scope, key, prefix, suffix, entry)
                    .await
            }
            IdMode::EngineAssigned => {
                let sql = format!("{} {}", close_list(prefix, None), close_list(suffix, None));
                match self
                    .insert_engine_assigned(scope, &sql, entry, key.name, returning_clause)
                    .await
                {
                    Ok(value) => match assign_key::<T, G>(key, entry, value) {
                        Ok(id) => Some(id),
                        Err(e) => {
                            self.fail(scope, OP, &sql, &e);
                            None
                        }
                    },
                    Err(e) => {
                        self.fail(scope, OP, &sql, &e);
                        None
                    }
                }
            }
        }
    }

    async fn insert_pre_generated<T: Entity, G: KeyType>(
        &self,
        scope: &mut Scope<'_>,
        key: &FieldDef<T>,
        prefix: &str,
        suffix: &str,
        entry: &mut T,
    ) -> Option<G> {
        const OP: &str = "insert_scalar";

        let sql = format!(
            "{} {}",
            close_list(prefix, Some(&self.dialect.quote_identifier(key.name))),
            close_list(suffix, Some(&format!("@{}", key.name)))
        );

        let Some(id) = IdGenerator::generate_id::<G>() else {
            let err = DbError::configuration(format!(
                "{} keys are assigned by the engine and cannot be pre-generated",
                std::any::type_name::<G>()
            ));
            self.fail(scope, OP, &sql, &err);
            return None;
        };

        let previous = (key.get)(entry);
        if let Err(e) = (key.set)(entry, id.to_value()) {
            self.fail(scope, OP, &sql, &DbError::from(e));
            return None;
        }

        let result = match self.binder.bind_entity(&sql, entry) {
            Ok(stmt) => self.execute_bound(scope, &stmt).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => Some(id),
            Err(e) => {
                if let Err(restore) = (key.set)(entry, previous) {
                    warn!(
                        entity = T::schema().type_name(),
                        error = %restore,
                        "Could not restore previous id"
                    );
                }
                self.fail(scope, OP, &sql, &e);
                None
            }
        }
    }

    async fn insert_engine_assigned<T: Entity>(
        &self,
        scope: &mut Scope<'_>,
        sql: &str,
        entry: &T,
        key_column: &str,
        returning_clause: Option<&str>,
    ) -> DbResult<Option<Value>> {
        let fragment = returning_clause
            .map(|clause| format!(" {}", clause.trim()))
            .or_else(|| self.dialect.returning_fragment(key_column));

        match self.dialect.id_retrieval {
            IdRetrieval::ReturningClause => {
                let stmt = self
                    .binder
                    .bind_entity(&format!("{}{}", sql, fragment.unwrap_or_default()), entry)?;
                let mut lease = self.lease(scope).await?;
                self.log_statement("insert_scalar", &stmt);
                let row = lease.conn().fetch_optional(&stmt).await;
                lease.release().await;
                Ok(row?.and_then(|record| record.into_first()))
            }
            IdRetrieval::OutputParameter => {
                let stmt = self
                    .binder
                    .bind_entity(&format!("{}{}", sql, fragment.unwrap_or_default()), entry)?;
                let mut lease = self.lease(scope).await?;
                self.log_statement("insert_scalar", &stmt);
                let value = lease.conn().execute_returning(&stmt, OUTPUT_PARAMETER).await;
                lease.release().await;
                value
            }
            IdRetrieval::FollowUpRead(default_read) => {
                let stmt = self.binder.bind_entity(sql, entry)?;
                let read = BoundStatement::raw(returning_clause.unwrap_or(default_read));
                let mut lease = self.lease(scope).await?;
                self.log_statement("insert_scalar", &stmt);
                // Same connection: the last-insert id is per session
                let result = match lease.conn().execute(&stmt).await {
                    Ok(_) => lease.conn().fetch_optional(&read).await,
                    Err(e) => Err(e),
                };
                lease.release().await;
                Ok(result?.and_then(|record| record.into_first()))
            }
        }
    }

    // ---- non-query ----

    /// Bind the entity's fields and run `sql` as a non-query.
    pub async fn execute_entry<T: Entity>(&self, sql: &str, entity: &T) -> bool {
        self.execute_entry_scoped(&mut Scope::Owned, sql, entity).await
    }

    pub async fn execute_entry_in<T: Entity>(
        &self,
        tx: &mut TransactionCoordinator,
        index: usize,
        sql: &str,
        entity: &T,
    ) -> bool {
        self.execute_entry_scoped(&mut Scope::Bound(tx, index), sql, entity)
            .await
    }

    async fn execute_entry_scoped<T: Entity>(
        &self,
        scope: &mut Scope<'_>,
        sql: &str,
        entity: &T,
    ) -> bool {
        let result = match self.binder.bind_entity(sql, entity) {
            Ok(stmt) => self.execute_bound(scope, &stmt).await,
            Err(e) => Err(e),
        };
        self.settle(scope, "execute_entry", sql, result).is_some()
    }

    /// Run a non-query; `true` when it succeeded.
    pub async fn just_execute(&self, sql: &str, params: &ParameterList) -> bool {
        self.just_execute_scoped(&mut Scope::Owned, sql, params).await
    }

    pub async fn just_execute_in(
        &self,
        tx: &mut TransactionCoordinator,
        index: usize,
        sql: &str,
        params: &ParameterList,
    ) -> bool {
        self.just_execute_scoped(&mut Scope::Bound(tx, index), sql, params)
            .await
    }

    async fn just_execute_scoped(
        &self,
        scope: &mut Scope<'_>,
        sql: &str,
        params: &ParameterList,
    ) -> bool {
        let result = match self.binder.bind(sql, params) {
            Ok(stmt) => self.execute_bound(scope, &stmt).await,
            Err(e) => Err(e),
        };
        self.settle(scope, "just_execute", sql, result).is_some()
    }

    // ---- scalar ----

    /// First column of the first row, converted to `G`.
    pub async fn execute_scalar<G: FromValue>(&self, sql: &str, params: &ParameterList) -> Option<G> {
        self.execute_scalar_scoped(&mut Scope::Owned, sql, params).await
    }

    pub async fn execute_scalar_in<G: FromValue>(
        &self,
        tx: &mut TransactionCoordinator,
        index: usize,
        sql: &str,
        params: &ParameterList,
    ) -> Option<G> {
        self.execute_scalar_scoped(&mut Scope::Bound(tx, index), sql, params)
            .await
    }

    async fn execute_scalar_scoped<G: FromValue>(
        &self,
        scope: &mut Scope<'_>,
        sql: &str,
        params: &ParameterList,
    ) -> Option<G> {
        let result = match self.scalar(scope, sql, params).await {
            Ok(Some(value)) => G::from_value(value).map(Some).map_err(DbError::from),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        self.settle(scope, "execute_scalar", sql, result).flatten()
    }

    /// First column of the first row as a raw value; `None` for no row or null.
    pub async fn execute_raw_scalar(&self, sql: &str, params: &ParameterList) -> Option<Value> {
        self.execute_raw_scalar_scoped(&mut Scope::Owned, sql, params)
            .await
    }

    pub async fn execute_raw_scalar_in(
        &self,
        tx: &mut TransactionCoordinator,
        index: usize,
        sql: &str,
        params: &ParameterList,
    ) -> Option<Value> {
        self.execute_raw_scalar_scoped(&mut Scope::Bound(tx, index), sql, params)
            .await
    }

    async fn execute_raw_scalar_scoped(
        &self,
        scope: &mut Scope<'_>,
        sql: &str,
        params: &ParameterList,
    ) -> Option<Value> {
        let result = self.scalar(scope, sql, params).await;
        self.settle(scope, "execute_raw_scalar", sql, result)
            .flatten()
    }

    async fn scalar(
        &self,
        scope: &mut Scope<'_>,
        sql: &str,
        params: &ParameterList,
    ) -> DbResult<Option<Value>> {
        let stmt = self.binder.bind(sql, params)?;
        let record = self.fetch_optional_bound(scope, "execute_scalar", &stmt).await?;
        Ok(record
            .and_then(|record| record.into_first())
            .filter(|value| !value.is_null()))
    }

    // ---- queries ----

    /// Map the first row, if any.
    pub async fn query_first<T: FromRecord>(&self, sql: &str, params: &ParameterList) -> Option<T> {
        self.query_first_scoped(&mut Scope::Owned, sql, params).await
    }

    pub async fn query_first_in<T: FromRecord>(
        &self,
        tx: &mut TransactionCoordinator,
        index: usize,
        sql: &str,
        params: &ParameterList,
    ) -> Option<T> {
        self.query_first_scoped(&mut Scope::Bound(tx, index), sql, params)
            .await
    }

    async fn query_first_scoped<T: FromRecord>(
        &self,
        scope: &mut Scope<'_>,
        sql: &str,
        params: &ParameterList,
    ) -> Option<T> {
        let result = match self.binder.bind(sql, params) {
            Ok(stmt) => self.fetch_optional_bound(scope, "query_first", &stmt).await,
            Err(e) => Err(e),
        };
        self.settle(scope, "query_first", sql, result)
            .flatten()
            .and_then(ObjectMapper::map_row::<T>)
    }

    /// Map every row; rows that fail to map are skipped.
    pub async fn query<T: FromRecord>(&self, sql: &str, params: &ParameterList) -> Vec<T> {
        self.query_scoped(&mut Scope::Owned, sql, params).await
    }

    pub async fn query_in<T: FromRecord>(
        &self,
        tx: &mut TransactionCoordinator,
        index: usize,
        sql: &str,
        params: &ParameterList,
    ) -> Vec<T> {
        self.query_scoped(&mut Scope::Bound(tx, index), sql, params)
            .await
    }

    async fn query_scoped<T: FromRecord>(
        &self,
        scope: &mut Scope<'_>,
        sql: &str,
        params: &ParameterList,
    ) -> Vec<T> {
        let result = match self.binder.bind(sql, params) {
            Ok(stmt) => self.fetch_all_bound(scope, &stmt).await,
            Err(e) => Err(e),
        };
        self.settle(scope, "query", sql, result)
            .map(|rows| ObjectMapper::map_cursor(RowCursor::new(rows)))
            .unwrap_or_default()
    }

    // ---- plumbing ----

    async fn lease<'s>(&self, scope: &'s mut Scope<'_>) -> DbResult<Lease<'s>> {
        match scope {
            Scope::Owned => Ok(Lease::Owned(self.driver.connect().await?)),
            Scope::Bound(tx, index) => {
                let conn = tx.get_connection(*index, self.driver.as_ref()).await?;
                Ok(Lease::Slot(conn))
            }
        }
    }

    async fn execute_bound(&self, scope: &mut Scope<'_>, stmt: &BoundStatement) -> DbResult<u64> {
        let mut lease = self.lease(scope).await?;
        self.log_statement("execute", stmt);
        let result = lease.conn().execute(stmt).await;
        lease.release().await;
        result
    }

    async fn fetch_optional_bound(
        &self,
        scope: &mut Scope<'_>,
        operation: &'static str,
        stmt: &BoundStatement,
    ) -> DbResult<Option<Record>> {
        let mut lease = self.lease(scope).await?;
        self.log_statement(operation, stmt);
        let result = lease.conn().fetch_optional(stmt).await;
        lease.release().await;
        result
    }

    async fn fetch_all_bound(
        &self,
        scope: &mut Scope<'_>,
        stmt: &BoundStatement,
    ) -> DbResult<Vec<Record>> {
        let mut lease = self.lease(scope).await?;
        self.log_statement("query", stmt);
        let result = lease.conn().fetch_all(stmt).await;
        lease.release().await;
        result
    }

    /// Run a parameterless control statement (savepoints), reporting failures.
    async fn run_control(&self, scope: &mut Scope<'_>, sql: &str) -> bool {
        let result = self.execute_bound(scope, &BoundStatement::raw(sql)).await;
        self.settle(scope, "savepoint", sql, result).is_some()
    }

    fn log_statement(&self, operation: &'static str, stmt: &BoundStatement) {
        debug!(
            engine = %self.dialect.engine,
            operation = operation,
            statement = %stmt.sql,
            params = stmt.values.len(),
            "Executing statement"
        );
    }

    /// Turn a result into an option, reporting the error if there is one.
    fn settle<R>(
        &self,
        scope: &Scope<'_>,
        operation: &'static str,
        statement: &str,
        result: DbResult<R>,
    ) -> Option<R> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.fail(scope, operation, statement, &e);
                None
            }
        }
    }

    fn fail(&self, scope: &Scope<'_>, operation: &'static str, statement: &str, error: &DbError) {
        let mut entry = FailureEntry::new(self.dialect.engine, operation, statement, error);
        if let Scope::Bound(tx, index) = scope {
            tx.set_error(true);
            debug!(
                transaction_id = %tx.id(),
                index = *index,
                operation = operation,
                "Operation failed inside transaction"
            );
            entry = entry.in_transaction(tx.id());
        }
        self.failures.report(entry);
    }
}

impl std::fmt::Debug for DataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProvider")
            .field("dialect", &self.dialect)
            .field("driver", &self.driver.engine())
            .finish()
    }
}

/// Close an open parenthesized list, appending `item` when given.
fn close_list(fragment: &str, item: Option<&str>) -> String {
    let trimmed = fragment.trim_end();
    match item {
        Some(item) if trimmed.ends_with('(') => format!("{}{})", trimmed, item),
        Some(item) => format!("{}, {})", trimmed, item),
        None => format!("{})", trimmed),
    }
}

/// Convert an engine-reported key to `G` and write it onto the entry.
fn assign_key<T, G: KeyType>(key: &FieldDef<T>, entry: &mut T, value: Option<Value>) -> DbResult<G> {
    let value = value
        .filter(|v| !v.is_null())
        .ok_or_else(|| DbError::internal("Engine did not report an inserted id"))?;
    let id = G::from_value(value.clone())?;
    (key.set)(entry, value)?;
    Ok(id)
}
