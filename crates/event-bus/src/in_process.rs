use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use event_store::EventEnvelope;
use futures_util::FutureExt;
use tokio::sync::RwLock;

use crate::bus::EventBus;
use crate::error::{EventBusError, HandlerError, Result};
use crate::handler::EventHandler;

type Handlers = HashMap<String, Vec<Arc<dyn EventHandler>>>;

/// Delivers events by calling subscribed handlers directly.
///
/// Delivery is best effort: a failing, panicking or slow handler is logged
/// and counted, the remaining handlers still run, and `publish` succeeds
/// regardless. There is no retry and nothing survives a restart.
pub struct InProcessEventBus {
    handlers: RwLock<Handlers>,
    handler_timeout: Duration,
    closed: AtomicBool,
}

impl Default for InProcessEventBus {
    fn default() -> Self {
        Self {
            handlers: RwLock::default(),
            handler_timeout: Self::DEFAULT_HANDLER_TIMEOUT,
            closed: AtomicBool::new(false),
        }
    }
}

impl InProcessEventBus {
    pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds each handler call. A handler that overruns counts as failed.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Number of handlers registered for `event_type`.
    pub async fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(event_type)
            .map_or(0, Vec::len)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventBusError::Closed);
        }
        Ok(())
    }

    async fn dispatch(&self, event: &EventEnvelope) {
        // Snapshot so handlers may subscribe or publish without deadlocking.
        let handlers = match self.handlers.read().await.get(&event.event_type) {
            Some(handlers) => handlers.clone(),
            None => return,
        };

        for handler in handlers {
            let call = AssertUnwindSafe(handler.handle(event)).catch_unwind();
            let outcome = match tokio::time::timeout(self.handler_timeout, call).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(HandlerError::new("handler panicked")),
                Err(_) => Err(HandlerError::new(format!(
                    "handler timed out after {:?}",
                    self.handler_timeout
                ))),
            };

            if let Err(error) = outcome {
                metrics::counter!(
                    "event_bus_handler_failures_total",
                    "event_type" => event.event_type.clone()
                )
                .increment(1);
                tracing::warn!(
                    handler = handler.name(),
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    aggregate_id = %event.aggregate_id,
                    %error,
                    "event handler failed"
                );
            }
        }
    }
}

#[async_trait]
impl EventBus for InProcessEventBus {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn publish(&self, events: &[EventEnvelope]) -> Result<()> {
        self.ensure_open()?;

        for event in events {
            self.dispatch(event).await;
            metrics::counter!(
                "event_bus_events_published_total",
                "event_type" => event.event_type.clone()
            )
            .increment(1);
        }
        Ok(())
    }

    async fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        self.ensure_open()?;

        tracing::debug!(event_type, handler = handler.name(), "subscribed");
        self.handlers
            .write()
            .await
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.handlers.write().await.clear();
            tracing::info!("in-process event bus closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use event_store::{AggregateId, Version};
    use std::sync::Mutex;

    fn event(event_type: &str, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("ResearchDomain")
            .event_type(event_type)
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    fn recorder(seen: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Arc<dyn EventHandler> {
        let seen = seen.clone();
        handler_fn(tag, move |event| {
            let seen = seen.clone();
            async move {
                seen.lock()
                    .unwrap()
                    .push(format!("{tag}:{}", event.version));
                Ok::<_, HandlerError>(())
            }
        })
    }

    #[tokio::test]
    async fn delivers_only_to_matching_event_type() {
        let bus = InProcessEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("ProblemCreated", recorder(&seen, "created"))
            .await
            .unwrap();
        bus.subscribe("ProblemDeactivated", recorder(&seen, "deactivated"))
            .await
            .unwrap();

        bus.publish(&[event("ProblemCreated", 1), event("ContributionsUpdated", 2)])
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["created:1"]);
    }

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let bus = InProcessEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("ContributionsUpdated", recorder(&seen, "h"))
            .await
            .unwrap();

        let events: Vec<_> = (1..=4).map(|v| event("ContributionsUpdated", v)).collect();
        bus.publish(&events).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["h:1", "h:2", "h:3", "h:4"]);
    }

    struct Panics;

    #[async_trait]
    impl EventHandler for Panics {
        async fn handle(&self, _event: &EventEnvelope) -> std::result::Result<(), HandlerError> {
            panic!("handler bug")
        }
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_the_others() {
        let bus = InProcessEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(
            "ProblemCreated",
            handler_fn("fails", |_| async { Err::<(), _>(HandlerError::new("projection down")) }),
        )
        .await
        .unwrap();
        bus.subscribe("ProblemCreated", recorder(&seen, "ok"))
            .await
            .unwrap();

        bus.publish(&[event("ProblemCreated", 1), event("ProblemCreated", 2)])
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["ok:1", "ok:2"]);
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated() {
        let bus = InProcessEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("ProblemCreated", Arc::new(Panics))
            .await
            .unwrap();
        bus.subscribe("ProblemCreated", recorder(&seen, "after"))
            .await
            .unwrap();

        bus.publish(&[event("ProblemCreated", 1)]).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["after:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out_without_dropping_later_deliveries() {
        let bus = InProcessEventBus::new().with_handler_timeout(Duration::from_secs(1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(
            "ProblemCreated",
            handler_fn("slow", |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, HandlerError>(())
            }),
        )
        .await
        .unwrap();
        bus.subscribe("ProblemCreated", recorder(&seen, "created"))
            .await
            .unwrap();
        bus.subscribe("ContributionsUpdated", recorder(&seen, "updated"))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        bus.publish(&[event("ProblemCreated", 1), event("ContributionsUpdated", 2)])
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["created:1", "updated:2"]);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn closed_bus_rejects_publish_and_subscribe() {
        let bus = InProcessEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("ProblemCreated", recorder(&seen, "h"))
            .await
            .unwrap();

        bus.close().await.unwrap();
        assert_eq!(bus.handler_count("ProblemCreated").await, 0);
        assert!(matches!(
            bus.publish(&[event("ProblemCreated", 1)]).await,
            Err(EventBusError::Closed)
        ));
        assert!(matches!(
            bus.subscribe("ProblemCreated", recorder(&seen, "late")).await,
            Err(EventBusError::Closed)
        ));
        // Closing twice is fine.
        bus.close().await.unwrap();
    }
}
