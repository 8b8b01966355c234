//! Append-only event log boundary.
//!
//! Commands read the log through [`EventFilter`]s and write to it with one
//! atomic [`EventStore::push`] per command, possibly spanning several streams.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{
    EventFilter, EventSelector, EventStore, EventStoreError, StoredEvent, StreamAppend,
    UncommittedEvent,
};
