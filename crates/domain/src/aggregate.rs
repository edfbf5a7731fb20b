//! Event-sourced aggregate root and the event record it produces.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{EventEnvelope, EventId, Version};
use serde_json::Value;

use crate::error::{DomainError, Result};

/// The closed set of event kinds an aggregate produces.
///
/// Implementations are sum types with one variant per event type. Decoding an
/// event type the implementation does not know must succeed (typically into an
/// `Unrecognized` variant) so that old code can replay newer histories.
pub trait EventData: Clone + Send + Sync + Sized {
    /// Name stored alongside the payload and used for routing.
    fn event_type(&self) -> &str;

    fn to_payload(&self) -> serde_json::Result<Value>;

    fn from_payload(event_type: &str, payload: Value) -> serde_json::Result<Self>;
}

/// State projected from an aggregate's event stream.
pub trait Aggregate: Default + Send + Sync {
    type Event: EventData;

    /// Stored with every event; also the middle token of broker subjects.
    fn aggregate_type() -> &'static str;

    /// Folds one event into the projection.
    ///
    /// Must be total and free of side effects: events are facts, so this
    /// cannot fail.
    fn apply(&mut self, event: &DomainEvent<Self::Event>);
}

/// An immutable, versioned fact about one aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent<E> {
    id: EventId,
    aggregate_id: AggregateId,
    aggregate_type: String,
    version: Version,
    timestamp: DateTime<Utc>,
    metadata: HashMap<String, Value>,
    data: E,
}

impl<E: EventData> DomainEvent<E> {
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        timestamp: DateTime<Utc>,
        data: E,
    ) -> Self {
        Self {
            id: EventId::new(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            timestamp,
            metadata: HashMap::new(),
            data,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        self.data.event_type()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    pub fn data(&self) -> &E {
        &self.data
    }

    /// Serialized form for the store and the bus.
    pub fn to_envelope(&self) -> Result<EventEnvelope> {
        let envelope = EventEnvelope::builder()
            .event_id(self.id)
            .event_type(self.event_type())
            .aggregate_id(self.aggregate_id)
            .aggregate_type(self.aggregate_type.clone())
            .version(self.version)
            .timestamp(self.timestamp)
            .payload_raw(self.data.to_payload()?)
            .metadata_map(self.metadata.clone())
            .build()?;
        Ok(envelope)
    }

    pub fn from_envelope(envelope: EventEnvelope) -> Result<Self> {
        let data = E::from_payload(&envelope.event_type, envelope.payload)?;
        Ok(Self {
            id: envelope.event_id,
            aggregate_id: envelope.aggregate_id,
            aggregate_type: envelope.aggregate_type,
            version: envelope.version,
            timestamp: envelope.timestamp,
            metadata: envelope.metadata,
            data,
        })
    }
}

/// Owns an aggregate's projection, version and uncommitted events.
///
/// A root is loaded, mutated by command methods and saved by exactly one
/// command invocation; it is never shared.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    id: AggregateId,
    version: Version,
    state: A,
    uncommitted: Vec<DomainEvent<A::Event>>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// An empty aggregate at version 0.
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            version: Version::initial(),
            state: A::default(),
            uncommitted: Vec::new(),
        }
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    /// Number of events applied, committed or not.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn into_state(self) -> A {
        self.state
    }

    /// Version the store must still be at for the uncommitted events to be
    /// appended.
    pub fn expected_version(&self) -> Version {
        Version::new(self.version.as_i64() - self.uncommitted.len() as i64)
    }

    /// Replays persisted events without buffering them.
    ///
    /// The events must belong to this aggregate and continue its stream
    /// exactly: versions `version + 1, version + 2, ...`. Otherwise nothing is
    /// applied and `InvalidHistory` is returned.
    pub fn load_from_history(
        &mut self,
        events: impl IntoIterator<Item = DomainEvent<A::Event>>,
    ) -> Result<()> {
        if !self.uncommitted.is_empty() {
            return Err(self.invalid_history("aggregate has uncommitted events".to_string()));
        }

        let events: Vec<_> = events.into_iter().collect();
        let mut expected = self.version;
        for event in &events {
            if event.aggregate_id() != self.id {
                return Err(self.invalid_history(format!(
                    "event {} belongs to aggregate {}",
                    event.id(),
                    event.aggregate_id()
                )));
            }
            expected = expected.next();
            if event.version() != expected {
                return Err(self.invalid_history(format!(
                    "expected version {expected}, found {}",
                    event.version()
                )));
            }
        }

        for event in &events {
            self.state.apply(event);
        }
        self.version = expected;
        Ok(())
    }

    /// Records a new event stamped now.
    pub fn apply_event(&mut self, data: A::Event) -> Version {
        self.apply_event_at(data, Utc::now())
    }

    /// Records a new event: applies it to the projection and buffers it
    /// until [`mark_events_as_committed`](Self::mark_events_as_committed).
    ///
    /// Applying the same event twice corrupts state; callers must not.
    pub fn apply_event_at(&mut self, data: A::Event, timestamp: DateTime<Utc>) -> Version {
        let version = self.version.next();
        let event = DomainEvent::new(self.id, A::aggregate_type(), version, timestamp, data);

        self.state.apply(&event);
        self.version = version;
        self.uncommitted.push(event);
        version
    }

    pub fn uncommitted_events(&self) -> &[DomainEvent<A::Event>] {
        &self.uncommitted
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Clears the buffer. Call only once the events are durable.
    pub fn mark_events_as_committed(&mut self) {
        self.uncommitted.clear();
    }

    fn invalid_history(&self, reason: String) -> DomainError {
        DomainError::InvalidHistory {
            aggregate_id: self.id,
            reason,
        }
    }
}
