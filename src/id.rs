//! Primary-key generation for entities without engine-assigned identity.

use crate::models::{FromValue, ToValue};
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Shape of a key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Supplied by the engine's identity or sequence mechanism.
    Integer,
    Guid,
    Text,
}

/// A type usable as an entity key.
///
/// Only the implementations in this module exist, so requesting an id of any
/// other type fails to compile.
pub trait KeyType: FromValue + ToValue + Send + Sized + 'static {
    const KIND: KeyKind;

    /// A fresh key, or `None` when the engine assigns it.
    fn generate() -> Option<Self> {
        None
    }
}

impl KeyType for i32 {
    const KIND: KeyKind = KeyKind::Integer;
}

impl KeyType for i64 {
    const KIND: KeyKind = KeyKind::Integer;
}

impl KeyType for Uuid {
    const KIND: KeyKind = KeyKind::Guid;

    fn generate() -> Option<Self> {
        Some(Uuid::new_v4())
    }
}

impl KeyType for String {
    const KIND: KeyKind = KeyKind::Text;

    fn generate() -> Option<Self> {
        Some(text_id())
    }
}

/// SHA-256 over a random 128-bit nonce and the current time, hex encoded.
fn text_id() -> String {
    let nonce: u128 = rand::random();
    let now = Utc::now();
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000));

    let mut hasher = Sha256::new();
    hasher.update(nonce.to_le_bytes());
    hasher.update(nanos.to_le_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdGenerator;

impl IdGenerator {
    /// Generate a key of type `G`; integer keys yield `None`.
    pub fn generate_id<G: KeyType>() -> Option<G> {
        G::generate()
    }
}
