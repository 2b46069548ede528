//! Blocking call shapes.
//!
//! `BlockingDataProvider` mirrors every [`DataProvider`] operation and runs it
//! to completion on an owned tokio runtime. Do not call these from inside an
//! async context; use the provider directly there.

use crate::db::failure_log::FailureLog;
use crate::db::native::NativeDriver;
use crate::db::provider::{DataProvider, IdMode};
use crate::db::transaction::{SlotInfo, TransactionCoordinator, TransactionOutcome};
use crate::error::{DbError, DbResult};
use crate::id::KeyType;
use crate::mapping::{Entity, FromRecord};
use crate::models::{Engine, FromValue, ParameterList, Value};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tracing::warn;

/// Build the runtime shared by blocking providers and transactions.
pub fn blocking_runtime() -> DbResult<Arc<Runtime>> {
    Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("sqlbridge-blocking")
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| DbError::internal(format!("Failed to build runtime: {}", e)))
}

#[derive(Clone)]
pub struct BlockingDataProvider {
    inner: DataProvider,
    runtime: Arc<Runtime>,
}

impl BlockingDataProvider {
    pub fn new(inner: DataProvider, runtime: Arc<Runtime>) -> Self {
        Self { inner, runtime }
    }

    pub fn for_engine(
        engine: Engine,
        driver: Arc<dyn NativeDriver>,
        failures: FailureLog,
        runtime: Arc<Runtime>,
    ) -> Self {
        Self::new(DataProvider::for_engine(engine, driver, failures), runtime)
    }

    pub fn provider(&self) -> &DataProvider {
        &self.inner
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Start a transaction driven from blocking code.
    pub fn begin(&self) -> BlockingTransaction {
        BlockingTransaction {
            inner: Some(TransactionCoordinator::new()),
            runtime: Arc::clone(&self.runtime),
        }
    }

    pub fn insert_scalar<T: Entity, G: KeyType>(
        &self,
        prefix: &str,
        suffix: &str,
        entry: &mut T,
        id_mode: IdMode,
        returning_clause: Option<&str>,
    ) -> Option<G> {
        self.runtime.block_on(
            self.inner
                .insert_scalar(prefix, suffix, entry, id_mode, returning_clause),
        )
    }

    pub fn insert_scalar_in<T: Entity, G: KeyType>(
        &self,
        tx: &mut BlockingTransaction,
        index: usize,
        prefix: &str,
        suffix: &str,
        entry: &mut T,
        id_mode: IdMode,
        returning_clause: Option<&str>,
    ) -> Option<G> {
        let coordinator = tx.coordinator()?;
        self.runtime.block_on(self.inner.insert_scalar_in(
            coordinator,
            index,
            prefix,
            suffix,
            entry,
            id_mode,
            returning_clause,
        ))
    }

    pub fn multi_insert_scalar<T: Entity, G: KeyType>(
        &self,
        tx: &mut BlockingTransaction,
        index: usize,
        prefix: &str,
        suffix: &str,
        entries: &mut [T],
        id_mode: IdMode,
        returning_clause: Option<&str>,
    ) -> Vec<Option<G>> {
        let Some(coordinator) = tx.coordinator() else {
            return entries.iter().map(|_| None).collect();
        };
        self.runtime.block_on(self.inner.multi_insert_scalar(
            coordinator,
            index,
            prefix,
            suffix,
            entries,
            id_mode,
            returning_clause,
        ))
    }

    pub fn execute_entry<T: Entity>(&self, sql: &str, entity: &T) -> bool {
        self.runtime.block_on(self.inner.execute_entry(sql, entity))
    }

    pub fn execute_entry_in<T: Entity>(
        &self,
        tx: &mut BlockingTransaction,
        index: usize,
        sql: &str,
        entity: &T,
    ) -> bool {
        match tx.coordinator() {
            Some(coordinator) => self
                .runtime
                .block_on(self.inner.execute_entry_in(coordinator, index, sql, entity)),
            None => false,
        }
    }

    pub fn just_execute(&self, sql: &str, params: &ParameterList) -> bool {
        self.runtime.block_on(self.inner.just_execute(sql, params))
    }

    pub fn just_execute_in(
        &self,
        tx: &mut BlockingTransaction,
        index: usize,
        sql: &str,
        params: &ParameterList,
    ) -> bool {
        match tx.coordinator() {
            Some(coordinator) => self
                .runtime
                .block_on(self.inner.just_execute_in(coordinator, index, sql, params)),
            None => false,
        }
    }

    pub fn execute_scalar<G: FromValue>(&self, sql: &str, params: &ParameterList) -> Option<G> {
        self.runtime.block_on(self.inner.execute_scalar(sql, params))
    }

    pub fn execute_scalar_in<G: FromValue>(
        &self,
        tx: &mut BlockingTransaction,
        index: usize,
        sql: &str,
        params: &ParameterList,
    ) -> Option<G> {
        let coordinator = tx.coordinator()?;
        self.runtime
            .block_on(self.inner.execute_scalar_in(coordinator, index, sql, params))
    }

    pub fn execute_raw_scalar(&self, sql: &str, params: &ParameterList) -> Option<Value> {
        self.runtime
            .block_on(self.inner.execute_raw_scalar(sql, params))
    }

    pub fn execute_raw_scalar_in(
        &self,
        tx: &mut BlockingTransaction,
        index: usize,
        sql: &str,
        params: &ParameterList,
    ) -> Option<Value> {
        let coordinator = tx.coordinator()?;
        self.runtime
            .block_on(self.inner.execute_raw_scalar_in(coordinator, index, sql, params))
    }

    pub fn query_first<T: FromRecord>(&self, sql: &str, params: &ParameterList) -> Option<T> {
        self.runtime.block_on(self.inner.query_first(sql, params))
    }

    pub fn query_first_in<T: FromRecord>(
        &self,
        tx: &mut BlockingTransaction,
        index: usize,
        sql: &str,
        params: &ParameterList,
    ) -> Option<T> {
        let coordinator = tx.coordinator()?;
        self.runtime
            .block_on(self.inner.query_first_in(coordinator, index, sql, params))
    }

    pub fn query<T: FromRecord>(&self, sql: &str, params: &ParameterList) -> Vec<T> {
        self.runtime.block_on(self.inner.query(sql, params))
    }

    pub fn query_in<T: FromRecord>(
        &self,
        tx: &mut BlockingTransaction,
        index: usize,
        sql: &str,
        params: &ParameterList,
    ) -> Vec<T> {
        match tx.coordinator() {
            Some(coordinator) => self
                .runtime
                .block_on(self.inner.query_in(coordinator, index, sql, params)),
            None => Vec::new(),
        }
    }
}

impl std::fmt::Debug for BlockingDataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingDataProvider")
            .field("inner", &self.inner)
            .finish()
    }
}

/// A transaction coordinator driven from blocking code.
///
/// Dropping it without calling [`BlockingTransaction::dispose`] rolls every
/// slot back and closes the connections, as an undisposed
/// [`TransactionCoordinator`] does.
pub struct BlockingTransaction {
    inner: Option<TransactionCoordinator>,
    runtime: Arc<Runtime>,
}

impl BlockingTransaction {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            inner: Some(TransactionCoordinator::new()),
            runtime,
        }
    }

    fn coordinator(&mut self) -> Option<&mut TransactionCoordinator> {
        self.inner.as_mut()
    }

    pub fn id(&self) -> Option<&str> {
        self.inner.as_ref().map(|tx| tx.id())
    }

    pub fn set_error(&self, failed: bool) {
        if let Some(tx) = &self.inner {
            tx.set_error(failed);
        }
    }

    pub fn has_error(&self) -> bool {
        self.inner.as_ref().is_some_and(|tx| tx.has_error())
    }

    pub fn get_transaction(&self, index: usize) -> Option<SlotInfo> {
        self.inner.as_ref().and_then(|tx| tx.get_transaction(index))
    }

    /// Commit or roll back every slot and close the connections.
    pub fn dispose(mut self) -> Option<TransactionOutcome> {
        let tx = self.inner.take()?;
        Some(self.runtime.block_on(tx.dispose()))
    }
}

impl Drop for BlockingTransaction {
    fn drop(&mut self) {
        if let Some(tx) = self.inner.take() {
            if tx.slot_count() > 0 {
                warn!(
                    transaction_id = %tx.id(),
                    slots = tx.slot_count(),
                    "Blocking transaction dropped without dispose, rolling back"
                );
                tx.set_error(true);
                self.runtime.block_on(tx.dispose());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlx_driver::SqlxDriver;
    use crate::models::ConnectionConfig;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Note {
        id: uuid::Uuid,
        body: String,
    }

    crate::impl_entity!(Note { id, body });

    fn provider(dir: &tempfile::TempDir) -> BlockingDataProvider {
        let runtime = blocking_runtime().unwrap();
        let path = dir.path().join("blocking.db");
        let config = ConnectionConfig::new(
            "blocking",
            format!("sqlite:{}", path.display()),
            Default::default(),
        )
        .unwrap();
        let driver = runtime.block_on(SqlxDriver::from_config(&config)).unwrap();
        let failures = FailureLog::with_tracing(16).unwrap();
        let provider =
            BlockingDataProvider::for_engine(Engine::Sqlite, Arc::new(driver), failures, runtime);
        assert!(provider.just_execute(
            "CREATE TABLE note (id TEXT PRIMARY KEY, body TEXT NOT NULL)",
            &ParameterList::new()
        ));
        provider
    }

    #[test]
    fn test_blocking_insert_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&dir);

        let mut note = Note {
            body: "hello".into(),
            ..Note::default()
        };
        let id: Option<uuid::Uuid> = provider.insert_scalar(
            "INSERT INTO note (body",
            "VALUES (@body",
            &mut note,
            IdMode::PreGenerate,
            None,
        );
        let id = id.unwrap();
        assert_eq!(note.id, id);

        let notes: Vec<Note> = provider.query("SELECT id, body FROM note", &ParameterList::new());
        assert_eq!(notes, vec![note]);
    }

    #[test]
    fn test_blocking_transaction_commits() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&dir);

        let mut tx = provider.begin();
        let mut note = Note {
            body: "in tx".into(),
            ..Note::default()
        };
        let id: Option<uuid::Uuid> = provider.insert_scalar_in(
            &mut tx,
            0,
            "INSERT INTO note (body",
            "VALUES (@body",
            &mut note,
            IdMode::PreGenerate,
            None,
        );
        assert!(id.is_some());
        assert!(tx.get_transaction(0).is_some());

        let outcome = tx.dispose().unwrap();
        assert!(outcome.is_committed());
        let count: Option<i64> =
            provider.execute_scalar("SELECT COUNT(*) FROM note", &ParameterList::new());
        assert_eq!(count, Some(1));
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&dir);

        {
            let mut tx = provider.begin();
            assert!(provider.just_execute_in(
                &mut tx,
                0,
                "INSERT INTO note (id, body) VALUES ('a', 'b')",
                &ParameterList::new()
            ));
            assert!(!tx.has_error());
        }

        let count: Option<i64> =
            provider.execute_scalar("SELECT COUNT(*) FROM note", &ParameterList::new());
        assert_eq!(count, Some(0));
    }
}
