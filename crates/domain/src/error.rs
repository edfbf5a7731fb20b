//! Domain error types.

use std::time::Duration;

use common::AggregateId;
use event_bus::EventBusError;
use event_store::{EventStoreError, MissingField};
use resilience::BreakerError;
use thiserror::Error;

use crate::research::ResearchError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A command's precondition does not hold; no events were produced.
    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    /// Includes optimistic-concurrency conflicts; see [`DomainError::is_conflict`].
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// The events were persisted and marked committed, but delivery failed.
    #[error("Events committed but not published: {0}")]
    Publish(#[source] EventBusError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("Invalid history for aggregate {aggregate_id}: {reason}")]
    InvalidHistory {
        aggregate_id: AggregateId,
        reason: String,
    },

    #[error("Invalid event envelope: {0}")]
    InvalidEnvelope(#[from] MissingField),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// True when another writer got to the aggregate first; reload and retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }

    /// Failures that say something about the health of a dependency.
    pub fn is_dependency_failure(&self) -> bool {
        match self {
            DomainError::EventStore(e) => e.is_unavailable(),
            DomainError::Timeout { .. } => true,
            _ => false,
        }
    }
}

impl From<BreakerError<DomainError>> for DomainError {
    fn from(error: BreakerError<DomainError>) -> Self {
        match error {
            BreakerError::Open { name } => DomainError::CircuitOpen(name),
            BreakerError::Inner(inner) => inner,
        }
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
