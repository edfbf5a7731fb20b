use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, Result, Version,
    store::{AppendOptions, EventStore, check_expected_version, validate_events_for_append},
};

#[derive(Default)]
struct Log {
    /// Every event in append order.
    events: Vec<EventEnvelope>,
    /// Per-aggregate positions into `events`, in version order.
    streams: HashMap<AggregateId, Vec<usize>>,
}

impl Log {
    fn version_of(&self, aggregate_id: AggregateId) -> Version {
        self.streams
            .get(&aggregate_id)
            .and_then(|positions| positions.last())
            .map(|&pos| self.events[pos].version)
            .unwrap_or(Version::initial())
    }

    fn stream(&self, aggregate_id: AggregateId) -> impl Iterator<Item = &EventEnvelope> {
        self.streams
            .get(&aggregate_id)
            .into_iter()
            .flatten()
            .map(|&pos| &self.events[pos])
    }
}

/// In-memory event store.
///
/// Used by tests and by the service when no database is configured. The
/// version check and the append happen under one write lock.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events across all aggregates.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }

    pub async fn clear(&self) {
        let mut log = self.log.write().await;
        log.events.clear();
        log.streams.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let mut log = self.log.write().await;

        let current = log.version_of(aggregate_id);
        check_expected_version(&events, current, &options)?;

        let new_version = current.advance(events.len());
        let count = events.len();
        let start = log.events.len();
        log.events.extend(events);
        log.streams
            .entry(aggregate_id)
            .or_default()
            .extend(start..start + count);

        metrics::counter!("event_store_events_appended_total").increment(count as u64);
        tracing::debug!(%aggregate_id, %new_version, count, "appended events");

        Ok(new_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log.stream(aggregate_id).cloned().collect())
    }

    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log
            .stream(aggregate_id)
            .filter(|e| e.version >= from_version)
            .cloned()
            .collect())
    }

    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        let mut events: Vec<_> = log
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let log = self.log.read().await;
        let version = log.version_of(aggregate_id);
        Ok((!version.is_initial()).then_some(version))
    }
}
