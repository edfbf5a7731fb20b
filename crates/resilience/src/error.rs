use thiserror::Error;

/// Outcome of a call rejected or failed under a circuit breaker.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker is open (or a half-open trial is already running); the
    /// operation was not attempted.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// The operation ran and failed; the error is passed through untouched.
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// Returns the operation's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}
