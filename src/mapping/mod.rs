//! Structural object mapping.
//!
//! Rows are mapped to typed targets and entities to parameter lists through
//! a per-type field table registered with [`impl_entity!`](crate::impl_entity).

pub mod entity;
pub mod mapper;

pub use entity::{Entity, EntitySchema, FieldDef, FromRecord, KEY_FIELD};
pub use mapper::ObjectMapper;
