//! Database access layer.
//!
//! This module provides:
//! - Per-engine dialects and parameter binding
//! - The native client seam and the built-in sqlx driver
//! - The engine data provider, async and blocking
//! - Cross-connection transaction coordination
//! - The fire-and-forget failure log

#[macro_use]
pub mod macros;
pub mod blocking;
pub mod dialect;
pub mod failure_log;
pub mod native;
pub mod params;
pub mod pool;
pub mod provider;
pub mod sqlx_driver;
pub mod transaction;
pub mod types;

pub use blocking::{BlockingDataProvider, BlockingTransaction, blocking_runtime};
pub use dialect::{Dialect, IdRetrieval, OUTPUT_PARAMETER, PlaceholderStyle, QuoteStyle};
pub use failure_log::{BoxError, FailureEntry, FailureLog, FailureSink, TracingSink};
pub use native::{NativeConnection, NativeDriver};
pub use params::{BoundStatement, ParameterBinder};
pub use pool::DbPool;
pub use provider::{DataProvider, IdMode};
pub use sqlx_driver::SqlxDriver;
pub use transaction::{
    CoordinatorState, SlotFailure, SlotInfo, TransactionCoordinator, TransactionOutcome,
};
