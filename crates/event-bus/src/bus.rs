use std::sync::Arc;

use async_trait::async_trait;
use event_store::EventEnvelope;

use crate::Result;
use crate::handler::EventHandler;

/// Delivers committed events to subscribers.
///
/// `publish` preserves the order of `events`. No ordering is promised between
/// events of different aggregates.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, events: &[EventEnvelope]) -> Result<()>;

    /// Registers `handler` for every event whose `event_type` matches,
    /// whatever aggregate produced it.
    async fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> Result<()>;

    /// Stops delivery and releases subscriptions.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    async fn publish(&self, events: &[EventEnvelope]) -> Result<()> {
        (**self).publish(events).await
    }

    async fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        (**self).subscribe(event_type, handler).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
