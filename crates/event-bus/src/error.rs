use common::BoxError;
use resilience::BreakerError;
use thiserror::Error;

/// Errors raised by the bus itself (not by subscribers).
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The bus was closed; it no longer accepts publishes or subscriptions.
    #[error("event bus is closed")]
    Closed,

    /// A broker transport was requested without a broker URL.
    #[error("broker event bus requires a broker URL")]
    MissingBrokerConfig,

    #[error("unknown event bus kind: {0}")]
    UnknownKind(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("event bus operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;

/// A subscriber failed to handle an event.
#[derive(Debug, Error)]
#[error("event handler failed: {source}")]
pub struct HandlerError {
    #[source]
    source: BoxError,
}

impl HandlerError {
    pub fn new(source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl From<BreakerError<EventBusError>> for EventBusError {
    fn from(error: BreakerError<EventBusError>) -> Self {
        match error {
            BreakerError::Open { name } => EventBusError::CircuitOpen(name),
            BreakerError::Inner(inner) => inner,
        }
    }
}
