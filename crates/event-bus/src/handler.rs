use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use event_store::EventEnvelope;

use crate::error::HandlerError;

/// A subscriber callback.
///
/// Handlers for the durable bus must tolerate duplicates: the event id is
/// stable across redeliveries.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs when the handler fails.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError>;
}

/// Handler backed by an async closure; see [`handler_fn`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        (self.f)(event.clone()).await
    }
}

/// Wraps an async closure as a shareable handler.
///
/// ```ignore
/// bus.subscribe("ProblemCreated", handler_fn("audit", |event| async move {
///     tracing::info!(event_id = %event.event_id, "problem created");
///     Ok(())
/// })).await?;
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}
