//! Data models shared across the crate.
//!
//! This module re-exports all model types used throughout the library.

pub mod connection;
pub mod param;
pub mod record;
pub mod value;

// Re-export commonly used types
pub use connection::{ConnectionConfig, ConnectionConfigError, Engine};
pub use param::{Param, ParameterList};
pub use record::{Record, RowCursor};
pub use value::{FromValue, ToValue, Value};
