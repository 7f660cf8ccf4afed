//! Storage adapters
//!
//! Stateful operators and tables talk to storage only through the
//! `KeyValueStore` trait. `MemoryStore` is the bundled implementation.

pub mod backend;
pub mod memory;

pub use backend::{KeyValueStore, StorageFactory};
pub use memory::{MemoryStore, MemoryStoreFactory, MemoryStoreStats};
