//! Append-only event store boundary.
//!
//! Storage-agnostic: the in-memory store backs tests and the default binary,
//! and a durable backend only has to honour the same `EventStore` contract.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
