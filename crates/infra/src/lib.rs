//! Infrastructure layer: event stores, the repository pipeline, configuration
//! and node provisioning.

pub mod config;
pub mod event_store;
pub mod provisioning;
pub mod repository;


pub use config::{ConfigError, DeletedUpdatePolicy, RepositoryConfig, StoreConfig};
pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, StoredEvent, UncommittedEvent,
};
pub use provisioning::NodeProvisioner;
pub use repository::{Repository, RepositoryError};
