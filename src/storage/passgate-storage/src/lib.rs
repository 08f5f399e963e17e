//! # Passgate Storage
//!
//! Storage abstraction layer for persisted login sessions.
//!
//! Provides the two-tier key/value contract the session manager writes to,
//! the well-known keys it uses, and an in-memory implementation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod keys;
pub mod memory;

pub use backend::{ReadySignal, SessionStorage, SessionStorageExt, StorageTier};
pub use error::StorageError;
pub use memory::MemoryStorage;
