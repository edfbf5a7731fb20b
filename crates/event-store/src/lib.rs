//! Event store for event-sourced aggregates.
//!
//! The store is an append-only log keyed by aggregate id. Appends are checked
//! against the caller's expected version so that two writers racing on the
//! same aggregate cannot both succeed.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, MissingField, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt};
