//! Durable event bus on NATS JetStream.
//!
//! One stream captures `{prefix}.>`. Each `subscribe` call creates (or
//! resumes) a durable pull consumer for one event type and drives it from a
//! spawned task. Messages are acked only after the handler succeeds; failures
//! are copied to a dead-letter subject and terminated so they are never
//! redelivered.

use std::fmt::Display;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_nats::jetstream::{
    self, AckKind,
    consumer::{AckPolicy, PullConsumer},
    stream::Stream,
};
use async_trait::async_trait;
use bytes::Bytes;
use event_store::EventEnvelope;
use futures_util::StreamExt;
use resilience::CircuitBreaker;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::error::{EventBusError, HandlerError, Result};
use crate::handler::EventHandler;
use crate::routing;

/// Connection-independent settings for [`BrokerEventBus`].
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub stream_name: String,
    pub subject_prefix: String,
    /// Upper bound for every broker round trip.
    pub io_timeout: Duration,
    /// Upper bound for one handler call; an overrun is dead-lettered.
    pub handler_timeout: Duration,
    /// Window in which JetStream drops republished event ids.
    pub duplicate_window: Duration,
}

const REOPEN_DELAY: Duration = Duration::from_secs(1);

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            stream_name: "THINKRANK_EVENTS".to_string(),
            subject_prefix: "thinkrank".to_string(),
            io_timeout: Duration::from_secs(5),
            handler_timeout: Duration::from_secs(30),
            duplicate_window: Duration::from_secs(120),
        }
    }
}

pub struct BrokerEventBus {
    jetstream: jetstream::Context,
    stream: Stream,
    options: BrokerOptions,
    breaker: Option<Arc<CircuitBreaker>>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl BrokerEventBus {
    /// Connects to `url` and makes sure the event stream exists.
    pub async fn connect(url: &str, options: BrokerOptions) -> Result<Self> {
        let timeout = options.io_timeout;
        let client = within(timeout, async_nats::connect(url)).await?;
        let jetstream = jetstream::new(client);

        let stream = within(
            timeout,
            jetstream.get_or_create_stream(jetstream::stream::Config {
                name: options.stream_name.clone(),
                subjects: vec![format!("{}.>", options.subject_prefix)],
                storage: jetstream::stream::StorageType::File,
                duplicate_window: options.duplicate_window,
                ..Default::default()
            }),
        )
        .await?;

        tracing::info!(
            url,
            stream = %options.stream_name,
            prefix = %options.subject_prefix,
            "connected broker event bus"
        );

        Ok(Self {
            jetstream,
            stream,
            options,
            breaker: None,
            consumers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Guards publishes with `breaker`.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn options(&self) -> &BrokerOptions {
        &self.options
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventBusError::Closed);
        }
        Ok(())
    }

    async fn publish_one(&self, event: &EventEnvelope) -> Result<()> {
        let subject = routing::routing_key(
            &self.options.subject_prefix,
            &event.aggregate_type,
            &event.event_type,
        );
        let payload = Bytes::from(serde_json::to_vec(event)?);

        let mut headers = async_nats::HeaderMap::new();
        let message_id = event.event_id.to_string();
        headers.insert(async_nats::header::NATS_MESSAGE_ID, message_id.as_str());

        let timeout = self.options.io_timeout;
        let ack = within(
            timeout,
            self.jetstream.publish_with_headers(subject, headers, payload),
        )
        .await?;
        // The event is durable once the stream acknowledges it.
        within(timeout, ack).await?;
        Ok(())
    }
}

#[async_trait]
impl EventBus for BrokerEventBus {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn publish(&self, events: &[EventEnvelope]) -> Result<()> {
        self.ensure_open()?;

        for event in events {
            match &self.breaker {
                Some(breaker) => {
                    breaker
                        .execute_classified(
                            || self.publish_one(event),
                            |e| !matches!(e, EventBusError::Serialization(_)),
                        )
                        .await?
                }
                None => self.publish_one(event).await?,
            }
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

        let prefix = &self.options.subject_prefix;
        let durable = routing::durable_name(prefix, event_type);
        let timeout = self.options.io_timeout;

        let consumer = within(
            timeout,
            self.stream.get_or_create_consumer(
                &durable,
                jetstream::consumer::pull::Config {
                    durable_name: Some(durable.clone()),
                    filter_subject: routing::subscription_filter(prefix, event_type),
                    ack_policy: AckPolicy::Explicit,
                    // Covers the handler plus the dead-letter round trips.
                    ack_wait: self.options.handler_timeout + timeout * 3,
                    ..Default::default()
                },
            ),
        )
        .await?;
        let messages = within(timeout, consumer.messages()).await?;

        let delivery = Delivery {
            jetstream: self.jetstream.clone(),
            prefix: prefix.clone(),
            consumer: durable.clone(),
            handler,
            io_timeout: timeout,
            handler_timeout: self.options.handler_timeout,
        };
        let task = tokio::spawn(delivery.run(consumer, messages));
        self.consumers.lock().await.push(task);

        tracing::info!(event_type, consumer = %durable, "subscribed durable consumer");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut consumers = self.consumers.lock().await;
        for task in consumers.drain(..) {
            task.abort();
        }
        tracing::info!(stream = %self.options.stream_name, "broker event bus closed");
        Ok(())
    }
}

impl Drop for BrokerEventBus {
    fn drop(&mut self) {
        for task in self.consumers.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// What to do with a delivered message once its handler has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Ack,
    DeadLetter,
}

impl Settlement {
    fn for_outcome(outcome: &std::result::Result<(), HandlerError>) -> Self {
        match outcome {
            Ok(()) => Settlement::Ack,
            Err(_) => Settlement::DeadLetter,
        }
    }
}

/// Consumer task state for one subscription.
struct Delivery {
    jetstream: jetstream::Context,
    prefix: String,
    consumer: String,
    handler: Arc<dyn EventHandler>,
    io_timeout: Duration,
    handler_timeout: Duration,
}

impl Delivery {
    /// Drives the subscription until the task is aborted, reopening the
    /// message stream whenever it ends.
    async fn run(self, consumer: PullConsumer, mut messages: jetstream::consumer::pull::Stream) {
        loop {
            while let Some(message) = messages.next().await {
                match message {
                    Ok(message) => self.deliver(message).await,
                    Err(error) => {
                        tracing::warn!(consumer = %self.consumer, %error, "error receiving message");
                        tokio::time::sleep(REOPEN_DELAY).await;
                    }
                }
            }
            tracing::warn!(consumer = %self.consumer, "message stream ended, reopening");
            messages = retry_until_ok(&self.consumer, || {
                within(self.io_timeout, consumer.messages())
            })
            .await;
        }
    }

    async fn deliver(&self, message: jetstream::Message) {
        let subject = message.subject.to_string();
        let outcome = match serde_json::from_slice::<EventEnvelope>(&message.payload) {
            Ok(event) => {
                match tokio::time::timeout(self.handler_timeout, self.handler.handle(&event)).await {
                    Ok(result) => result,
                    Err(_) => Err(HandlerError::new(format!(
                        "handler timed out after {:?}",
                        self.handler_timeout
                    ))),
                }
            }
            Err(error) => Err(HandlerError::new(error)),
        };

        match Settlement::for_outcome(&outcome) {
            Settlement::Ack => {
                if let Err(error) = message.ack().await {
                    tracing::warn!(consumer = %self.consumer, %subject, %error, "failed to ack message");
                }
            }
            Settlement::DeadLetter => {
                let error = outcome.err().map(|e| e.to_string()).unwrap_or_default();
                metrics::counter!("event_bus_handler_failures_total", "consumer" => self.consumer.clone())
                    .increment(1);
                tracing::warn!(
                    consumer = %self.consumer,
                    handler = self.handler.name(),
                    %subject,
                    %error,
                    "event handler failed, dead-lettering message"
                );
                self.dead_letter(message, &subject).await;
            }
        }
    }

    async fn dead_letter(&self, message: jetstream::Message, subject: &str) {
        let dead_letter = routing::dead_letter_for(&self.prefix, subject);

        let copied = match within(
            self.io_timeout,
            self.jetstream
                .publish(dead_letter.clone(), message.payload.clone()),
        )
        .await
        {
            Ok(ack) => within(self.io_timeout, ack).await.map(|_| ()),
            Err(e) => Err(e),
        };

        if let Err(error) = &copied {
            tracing::error!(%dead_letter, %error, "failed to publish dead letter");
        }
        let kind = settle_dead_letter(&copied);
        if let Err(error) = message.ack_with(kind).await {
            tracing::warn!(consumer = %self.consumer, %subject, %error, "failed to settle message");
        }
    }
}

/// Terminates a failed message only once its dead-letter copy is durable;
/// otherwise it is handed back for redelivery.
fn settle_dead_letter(copied: &Result<()>) -> AckKind {
    match copied {
        Ok(()) => AckKind::Term,
        Err(_) => AckKind::Nak(None),
    }
}

/// Repeats `attempt` until it succeeds, pausing between failures.
async fn retry_until_ok<T, F, Fut>(consumer: &str, mut attempt: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        match attempt().await {
            Ok(value) => return value,
            Err(error) => {
                tracing::warn!(consumer, %error, "failed to reopen message stream");
                tokio::time::sleep(REOPEN_DELAY).await;
            }
        }
    }
}

/// Bounds a broker round trip by `timeout` and flattens its error.
async fn within<F, T, E>(timeout: Duration, operation: F) -> Result<T>
where
    F: IntoFuture<Output = std::result::Result<T, E>>,
    E: Display,
{
    tokio::time::timeout(timeout, operation)
        .await
        .map_err(|_| EventBusError::Timeout(timeout))?
        .map_err(|e| EventBusError::Broker(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_success_is_acked() {
        assert_eq!(Settlement::for_outcome(&Ok(())), Settlement::Ack);
        assert_eq!(
            Settlement::for_outcome(&Err(HandlerError::new("boom"))),
            Settlement::DeadLetter
        );
    }

    #[test]
    fn failed_dead_letter_copy_is_redelivered() {
        assert!(matches!(settle_dead_letter(&Ok(())), AckKind::Term));
        assert!(matches!(
            settle_dead_letter(&Err(EventBusError::Timeout(Duration::from_secs(5)))),
            AckKind::Nak(None)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn reopening_retries_until_the_stream_is_back() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let value = retry_until_ok("thinkrank-ProblemCreated", || async {
            match attempts.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(EventBusError::Broker("no responders".to_string())),
                _ => Ok("stream"),
            }
        })
        .await;

        assert_eq!(value, "stream");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= REOPEN_DELAY * 2);
    }

    #[test]
    fn default_options() {
        let options = BrokerOptions::default();
        assert_eq!(options.subject_prefix, "thinkrank");
        assert_eq!(options.io_timeout, Duration::from_secs(5));
        assert_eq!(options.handler_timeout, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_round_trip_times_out() {
        let result = within(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, String>(())
        })
        .await;
        assert!(matches!(result, Err(EventBusError::Timeout(_))));
    }

    #[tokio::test]
    async fn broker_errors_are_flattened() {
        let result = within(Duration::from_secs(1), async {
            Err::<(), _>("connection refused")
        })
        .await;
        match result {
            Err(EventBusError::Broker(message)) => assert_eq!(message, "connection refused"),
            other => panic!("expected broker error, got {other:?}"),
        }
    }
}
