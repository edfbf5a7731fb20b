//! Types shared across the event store, event bus and domain crates.

mod types;

pub use types::{AggregateId, ParseAggregateIdError};

/// Boxed error used where a collaborator's concrete error type is erased,
/// e.g. subscriber handlers and circuit-breaker guarded operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
