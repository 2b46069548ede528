//! Fire-and-forget failure reporting.
//!
//! Providers report failed operations into a bounded broadcast channel; a
//! dedicated worker thread drains it into a [`FailureSink`]. When the channel
//! is full the oldest entries are overwritten and the worker logs how many
//! it lost. Reporting never blocks, and sink errors or panics stay inside the
//! worker.

use crate::error::{DbError, DbResult};
use crate::models::Engine;
use chrono::{DateTime, Utc};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, warn};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One failed provider operation.
#[derive(Debug, Clone)]
pub struct FailureEntry {
    pub engine: Engine,
    pub operation: &'static str,
    pub statement: String,
    pub message: String,
    pub detail: Option<String>,
    pub transaction_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl FailureEntry {
    pub fn new(
        engine: Engine,
        operation: &'static str,
        statement: impl Into<String>,
        error: &DbError,
    ) -> Self {
        Self {
            engine,
            operation,
            statement: statement.into(),
            message: error.to_string(),
            detail: error.detail(),
            transaction_id: None,
            at: Utc::now(),
        }
    }

    pub fn in_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }
}

/// Destination for failure entries.
pub trait FailureSink: Send + Sync + 'static {
    fn record(&self, entry: &FailureEntry) -> Result<(), BoxError>;
}

/// Default sink: one `error!` event per entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl FailureSink for TracingSink {
    fn record(&self, entry: &FailureEntry) -> Result<(), BoxError> {
        error!(
            engine = %entry.engine,
            operation = entry.operation,
            statement = %entry.statement,
            detail = ?entry.detail,
            transaction_id = ?entry.transaction_id,
            at = %entry.at,
            "{}",
            entry.message
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Handle to the failure-log worker. Cheap to clone; the worker exits once
/// every handle is dropped and the channel is drained.
#[derive(Debug, Clone)]
pub struct FailureLog {
    sender: broadcast::Sender<Arc<FailureEntry>>,
    counters: Arc<Counters>,
}

impl FailureLog {
    /// Start a worker draining into `sink`.
    pub fn start(capacity: usize, sink: impl FailureSink) -> DbResult<Self> {
        if capacity == 0 {
            return Err(DbError::configuration(
                "Failure log capacity must be greater than 0",
            ));
        }

        let (sender, receiver) = broadcast::channel(capacity);
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);

        std::thread::Builder::new()
            .name("sqlbridge-failure-log".to_string())
            .spawn(move || run_worker(receiver, sink, worker_counters))
            .map_err(|e| DbError::internal(format!("Failed to start failure log worker: {}", e)))?;

        debug!(capacity = capacity, "Failure log started");
        Ok(Self { sender, counters })
    }

    /// Start a worker forwarding entries to `tracing`.
    pub fn with_tracing(capacity: usize) -> DbResult<Self> {
        Self::start(capacity, TracingSink)
    }

    /// Queue an entry. Never blocks; overwrites the oldest entry when full.
    pub fn report(&self, entry: FailureEntry) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if let Err(broadcast::error::SendError(entry)) = self.sender.send(Arc::new(entry)) {
            // Worker gone; keep the entry visible
            error!(
                engine = %entry.engine,
                operation = entry.operation,
                statement = %entry.statement,
                "{}",
                entry.message
            );
        }
    }

    /// Entries reported so far.
    pub fn submitted(&self) -> u64 {
        self.counters.submitted.load(Ordering::Relaxed)
    }

    /// Entries handed to the sink so far.
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    /// Entries overwritten before the worker reached them.
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

fn run_worker(
    mut receiver: broadcast::Receiver<Arc<FailureEntry>>,
    sink: impl FailureSink,
    counters: Arc<Counters>,
) {
    loop {
        match receiver.blocking_recv() {
            Ok(entry) => {
                match catch_unwind(AssertUnwindSafe(|| sink.record(&entry))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Failure sink rejected entry"),
                    Err(_) => warn!("Failure sink panicked"),
                }
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(RecvError::Lagged(lost)) => {
                counters.dropped.fetch_add(lost, Ordering::Relaxed);
                warn!(lost = lost, "Failure log full, oldest entries dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Failure log worker stopped");
}
