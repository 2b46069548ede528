//! Transaction coordination across several native connections.
//!
//! A `TransactionCoordinator` owns indexed connection slots, each holding
//! one native connection with an open transaction. Slots are opened lazily
//! by the first provider operation bound to their index. All participants
//! share one failure flag: at disposal every slot commits if it is clear and
//! rolls back if it is set.

use crate::db::native::{NativeConnection, NativeDriver};
use crate::error::{DbError, DbResult};
use crate::models::Engine;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No slot opened yet.
    Created,
    InProgress,
    Committed,
    RolledBack,
    /// Closed without any open slot.
    Disposed,
}

struct ConnectionSlot {
    engine: Engine,
    connection: Box<dyn NativeConnection>,
    opened_at: DateTime<Utc>,
}

/// Read-only view of an open slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub index: usize,
    pub engine: Engine,
    pub opened_at: DateTime<Utc>,
}

/// A slot operation that failed during disposal.
#[derive(Debug)]
pub struct SlotFailure {
    pub index: usize,
    pub engine: Engine,
    pub stage: &'static str,
    pub error: DbError,
}

/// Result of disposing a coordinator.
#[derive(Debug)]
pub struct TransactionOutcome {
    pub transaction_id: String,
    pub state: CoordinatorState,
    pub slots: usize,
    pub failures: Vec<SlotFailure>,
}

impl TransactionOutcome {
    /// True when every slot committed and closed cleanly.
    pub fn is_committed(&self) -> bool {
        self.state == CoordinatorState::Committed && self.failures.is_empty()
    }
}

pub struct TransactionCoordinator {
    id: String,
    slots: BTreeMap<usize, ConnectionSlot>,
    failed: AtomicBool,
    state: CoordinatorState,
    started_at: DateTime<Utc>,
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        let id = generate_transaction_id();
        debug!(transaction_id = %id, "Transaction coordinator created");
        Self {
            id,
            slots: BTreeMap::new(),
            failed: AtomicBool::new(false),
            state: CoordinatorState::Created,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Get the connection at `index`, opening it and beginning its
    /// transaction on first use.
    ///
    /// A slot already opened for a different engine is an error.
    pub async fn get_connection(
        &mut self,
        index: usize,
        driver: &dyn NativeDriver,
    ) -> DbResult<&mut dyn NativeConnection> {
        if let Some(slot) = self.slots.get(&index) {
            if slot.engine != driver.engine() {
                return Err(DbError::transaction(
                    format!(
                        "Slot {} belongs to {}, not {}",
                        index,
                        slot.engine,
                        driver.engine()
                    ),
                    &self.id,
                ));
            }
        } else {
            let slot = self.open_slot(index, driver).await?;
            self.slots.insert(index, slot);
            self.state = CoordinatorState::InProgress;
        }

        match self.slots.get_mut(&index) {
            Some(slot) => Ok(slot.connection.as_mut()),
            None => Err(DbError::internal("Connection slot vanished")),
        }
    }

    async fn open_slot(&self, index: usize, driver: &dyn NativeDriver) -> DbResult<ConnectionSlot> {
        let mut connection = driver.connect().await?;
        if let Err(e) = connection.begin().await {
            if let Err(close_err) = connection.close().await {
                warn!(transaction_id = %self.id, index = index, error = %close_err, "Failed to close connection after begin failed");
            }
            return Err(e);
        }

        info!(
            transaction_id = %self.id,
            index = index,
            engine = %driver.engine(),
            "Transaction started"
        );

        Ok(ConnectionSlot {
            engine: driver.engine(),
            connection,
            opened_at: Utc::now(),
        })
    }

    /// Describe the slot at `index`, if open.
    pub fn get_transaction(&self, index: usize) -> Option<SlotInfo> {
        self.slots.get(&index).map(|slot| SlotInfo {
            index,
            engine: slot.engine,
            opened_at: slot.opened_at,
        })
    }

    /// Flag the transaction as failed. The flag never clears; `false` is ignored.
    pub fn set_error(&self, failed: bool) {
        if failed && !self.failed.swap(true, Ordering::SeqCst) {
            warn!(transaction_id = %self.id, "Transaction marked as failed");
        }
    }

    pub fn has_error(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Commit every slot if no participant failed, otherwise roll every slot
    /// back; then close all connections in index order.
    ///
    /// Each slot is finished and closed independently; failures are collected
    /// in the outcome rather than stopping the sweep.
    pub async fn dispose(mut self) -> TransactionOutcome {
        let slots = std::mem::take(&mut self.slots);
        let rollback = self.has_error();
        let mut failures = Vec::new();

        let mut connections: Vec<(usize, ConnectionSlot)> = slots.into_iter().collect();

        for (index, slot) in connections.iter_mut() {
            let (stage, result) = if rollback {
                ("rollback", slot.connection.rollback().await)
            } else {
                ("commit", slot.connection.commit().await)
            };
            if let Err(error) = result {
                warn!(
                    transaction_id = %self.id,
                    index = *index,
                    engine = %slot.engine,
                    stage = stage,
                    error = %error,
                    "Slot did not finish cleanly"
                );
                failures.push(SlotFailure {
                    index: *index,
                    engine: slot.engine,
                    stage,
                    error,
                });
            }
        }

        for (index, slot) in connections.iter_mut() {
            if let Err(error) = slot.connection.close().await {
                warn!(
                    transaction_id = %self.id,
                    index = *index,
                    error = %error,
                    "Failed to close connection"
                );
                failures.push(SlotFailure {
                    index: *index,
                    engine: slot.engine,
                    stage: "close",
                    error,
                });
            }
        }

        self.state = if connections.is_empty() {
            CoordinatorState::Disposed
        } else if rollback {
            CoordinatorState::RolledBack
        } else {
            CoordinatorState::Committed
        };

        info!(
            transaction_id = %self.id,
            state = ?self.state,
            slots = connections.len(),
            failures = failures.len(),
            "Transaction disposed"
        );

        TransactionOutcome {
            transaction_id: self.id.clone(),
            state: self.state,
            slots: connections.len(),
            failures,
        }
    }
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("id", &self.id)
            .field("slots", &self.slots.keys().collect::<Vec<_>>())
            .field("failed", &self.has_error())
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for TransactionCoordinator {
    fn drop(&mut self) {
        if !self.slots.is_empty() {
            // Native transactions roll back when their connections drop
            warn!(
                transaction_id = %self.id,
                slots = self.slots.len(),
                "Transaction coordinator dropped without dispose - consider calling dispose()"
            );
        }
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::params::BoundStatement;
    use crate::models::Record;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Records lifecycle calls into a shared journal.
    struct JournalConnection {
        engine: Engine,
        journal: Arc<Mutex<Vec<String>>>,
        fail_commit: bool,
    }

    #[async_trait]
    impl NativeConnection for JournalConnection {
        fn engine(&self) -> Engine {
            self.engine
        }

        async fn begin(&mut self) -> DbResult<()> {
            self.journal.lock().unwrap().push(format!("begin {}", self.engine));
            Ok(())
        }

        async fn commit(&mut self) -> DbResult<()> {
            self.journal.lock().unwrap().push(format!("commit {}", self.engine));
            if self.fail_commit {
                return Err(DbError::database("commit refused", None, "retry"));
            }
            Ok(())
        }

        async fn rollback(&mut self) -> DbResult<()> {
            self.journal.lock().unwrap().push(format!("rollback {}", self.engine));
            Ok(())
        }

        async fn execute(&mut self, _stmt: &BoundStatement) -> DbResult<u64> {
            Ok(0)
        }

        async fn fetch_all(&mut self, _stmt: &BoundStatement) -> DbResult<Vec<Record>> {
            Ok(Vec::new())
        }

        async fn fetch_optional(&mut self, _stmt: &BoundStatement) -> DbResult<Option<Record>> {
            Ok(None)
        }

        async fn close(&mut self) -> DbResult<()> {
            self.journal.lock().unwrap().push(format!("close {}", self.engine));
            Ok(())
        }
    }

    struct JournalDriver {
        engine: Engine,
        journal: Arc<Mutex<Vec<String>>>,
        fail_commit: bool,
    }

    impl JournalDriver {
        fn new(engine: Engine, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                engine,
                journal: Arc::clone(journal),
                fail_commit: false,
            }
        }
    }

    #[async_trait]
    impl NativeDriver for JournalDriver {
        fn engine(&self) -> Engine {
            self.engine
        }

        async fn connect(&self) -> DbResult<Box<dyn NativeConnection>> {
            Ok(Box::new(JournalConnection {
                engine: self.engine,
                journal: Arc::clone(&self.journal),
                fail_commit: self.fail_commit,
            }))
        }
    }

    #[test]
    fn test_transaction_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 3 + 32); // "tx_" + 32 hex chars
    }

    #[test]
    fn test_error_flag_is_monotonic() {
        let tx = TransactionCoordinator::new();
        assert!(!tx.has_error());
        tx.set_error(false);
        assert!(!tx.has_error());
        tx.set_error(true);
        tx.set_error(false);
        assert!(tx.has_error());
    }

    #[tokio::test]
    async fn test_slots_open_lazily_and_are_stable() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let driver = JournalDriver::new(Engine::Postgres, &journal);
        let mut tx = TransactionCoordinator::new();
        assert_eq!(tx.state(), CoordinatorState::Created);
        assert!(tx.get_transaction(0).is_none());

        tx.get_connection(0, &driver).await.unwrap();
        tx.get_connection(0, &driver).await.unwrap();
        assert_eq!(tx.slot_count(), 1);
        assert_eq!(tx.state(), CoordinatorState::InProgress);
        assert_eq!(tx.get_transaction(0).map(|s| s.engine), Some(Engine::Postgres));
        assert_eq!(journal.lock().unwrap().as_slice(), ["begin PostgreSQL"]);

        tx.dispose().await;
    }

    #[tokio::test]
    async fn test_engine_mismatch_rejected() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let pg = JournalDriver::new(Engine::Postgres, &journal);
        let mysql = JournalDriver::new(Engine::MySql, &journal);
        let mut tx = TransactionCoordinator::new();

        tx.get_connection(0, &pg).await.unwrap();
        let err = tx.get_connection(0, &mysql).await.err().unwrap();
        assert!(matches!(err, DbError::Transaction { .. }));
        tx.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_commits_then_closes_in_index_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let pg = JournalDriver::new(Engine::Postgres, &journal);
        let sqlite = JournalDriver::new(Engine::Sqlite, &journal);
        let mut tx = TransactionCoordinator::new();

        tx.get_connection(2, &sqlite).await.unwrap();
        tx.get_connection(1, &pg).await.unwrap();
        let outcome = tx.dispose().await;

        assert!(outcome.is_committed());
        assert_eq!(outcome.slots, 2);
        assert_eq!(
            journal.lock().unwrap().as_slice(),
            [
                "begin SQLite",
                "begin PostgreSQL",
                "commit PostgreSQL",
                "commit SQLite",
                "close PostgreSQL",
                "close SQLite",
            ]
        );
    }

    #[tokio::test]
    async fn test_dispose_rolls_back_all_when_flagged() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let pg = JournalDriver::new(Engine::Postgres, &journal);
        let mysql = JournalDriver::new(Engine::MySql, &journal);
        let mut tx = TransactionCoordinator::new();

        tx.get_connection(0, &pg).await.unwrap();
        tx.get_connection(1, &mysql).await.unwrap();
        tx.set_error(true);
        let outcome = tx.dispose().await;

        assert_eq!(outcome.state, CoordinatorState::RolledBack);
        let journal = journal.lock().unwrap();
        assert!(journal.contains(&"rollback PostgreSQL".to_string()));
        assert!(journal.contains(&"rollback MySQL".to_string()));
        assert!(!journal.iter().any(|line| line.starts_with("commit")));
    }

    #[tokio::test]
    async fn test_failed_commit_does_not_stop_other_slots() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut failing = JournalDriver::new(Engine::Oracle, &journal);
        failing.fail_commit = true;
        let odbc = JournalDriver::new(Engine::Odbc, &journal);
        let mut tx = TransactionCoordinator::new();

        tx.get_connection(0, &failing).await.unwrap();
        tx.get_connection(1, &odbc).await.unwrap();
        let outcome = tx.dispose().await;

        assert!(!outcome.is_committed());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].index, 0);
        assert_eq!(outcome.failures[0].stage, "commit");
        let journal = journal.lock().unwrap();
        assert!(journal.contains(&"commit ODBC".to_string()));
        assert!(journal.contains(&"close Oracle".to_string()));
        assert!(journal.contains(&"close ODBC".to_string()));
    }

    #[test]
    fn test_empty_coordinator_disposes() {
        let outcome = tokio_test::block_on(TransactionCoordinator::new().dispose());
        assert_eq!(outcome.state, CoordinatorState::Disposed);
        assert_eq!(outcome.slots, 0);
    }
}
