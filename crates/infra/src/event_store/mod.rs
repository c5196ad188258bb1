//! Append-only event store boundary.
//!
//! The engine's only shared mutable resource. All coordination between
//! writers goes through the version-conditioned `append`.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
