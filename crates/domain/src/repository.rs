//! Loading and saving event-sourced aggregates.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::AggregateId;
use event_bus::EventBus;
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};
use resilience::CircuitBreaker;

use crate::aggregate::{Aggregate, AggregateRoot, DomainEvent};
use crate::error::{DomainError, Result};

#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Upper bound for each event store call. The bus bounds its own
    /// deliveries.
    pub io_timeout: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(5),
        }
    }
}

/// Rebuilds aggregates from the store and persists their new events.
///
/// Saved events are published on the bus after they are durable, in the order
/// the aggregate produced them.
pub struct Repository<A, S, B> {
    store: S,
    bus: B,
    config: RepositoryConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A, S, B> Repository<A, S, B>
where
    A: Aggregate,
    S: EventStore,
    B: EventBus,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            config: RepositoryConfig::default(),
            breaker: None,
            _aggregate: PhantomData,
        }
    }

    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Routes store calls through `breaker`. Concurrency conflicts do not
    /// count as failures.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Loads an aggregate by replaying its history; `None` if it has no events.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn get_by_id(&self, id: AggregateId) -> Result<Option<AggregateRoot<A>>> {
        let envelopes = self
            .guarded("load events", || self.store.get_events_for_aggregate(id))
            .await?;
        if envelopes.is_empty() {
            return Ok(None);
        }

        let events = envelopes
            .into_iter()
            .map(DomainEvent::from_envelope)
            .collect::<Result<Vec<_>>>()?;

        let mut root = AggregateRoot::new(id);
        root.load_from_history(events)?;
        tracing::debug!(version = %root.version(), "aggregate loaded");
        Ok(Some(root))
    }

    /// Persists the root's uncommitted events, publishes them and marks them
    /// committed. Returns the aggregate's new version.
    ///
    /// The append is rejected with a conflict when the store has moved past
    /// [`AggregateRoot::expected_version`]. If the append fails the buffer is
    /// left untouched and nothing is published. If only publishing fails the
    /// events are still marked committed and `DomainError::Publish` is
    /// returned.
    #[tracing::instrument(
        skip(self, root),
        fields(aggregate_type = A::aggregate_type(), aggregate_id = %root.id())
    )]
    pub async fn save(&self, root: &mut AggregateRoot<A>) -> Result<Version> {
        if !root.has_uncommitted_events() {
            return Ok(root.version());
        }

        let started = Instant::now();
        let envelopes = root
            .uncommitted_events()
            .iter()
            .map(DomainEvent::to_envelope)
            .collect::<Result<Vec<_>>>()?;
        let expected = root.expected_version();

        let appended = self
            .guarded("append events", || {
                self.store
                    .append(envelopes.clone(), AppendOptions::expect_version(expected))
            })
            .await;
        let version = match appended {
            Ok(version) => version,
            Err(error) => {
                if error.is_conflict() {
                    metrics::counter!("repository_conflicts_total", "aggregate_type" => A::aggregate_type())
                        .increment(1);
                    tracing::warn!(%expected, %error, "concurrent modification");
                }
                return Err(error);
            }
        };

        metrics::counter!("repository_events_saved_total", "aggregate_type" => A::aggregate_type())
            .increment(envelopes.len() as u64);

        let published = self.publish(&envelopes).await;
        root.mark_events_as_committed();
        metrics::histogram!("repository_save_duration_seconds", "aggregate_type" => A::aggregate_type())
            .record(started.elapsed().as_secs_f64());

        tracing::debug!(%version, count = envelopes.len(), "events saved");
        published.map(|()| version)
    }

    async fn publish(&self, envelopes: &[EventEnvelope]) -> Result<()> {
        self.bus.publish(envelopes).await.map_err(|error| {
            tracing::error!(%error, count = envelopes.len(), "failed to publish committed events");
            DomainError::Publish(error)
        })
    }

    /// Runs a store call under the I/O timeout and, if configured, the
    /// circuit breaker.
    async fn guarded<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = event_store::Result<T>>,
    {
        let timeout = self.config.io_timeout;
        let bounded = || async move {
            match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result.map_err(DomainError::from),
                Err(_) => Err(DomainError::Timeout { operation, timeout }),
            }
        };

        match &self.breaker {
            Some(breaker) => Ok(breaker
                .execute_classified(bounded, DomainError::is_dependency_failure)
                .await?),
            None => bounded().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{CreateProblem, ResearchDomain};
    use event_bus::InProcessEventBus;
    use event_store::InMemoryEventStore;

    type TestRepository = Repository<ResearchDomain, InMemoryEventStore, InProcessEventBus>;

    fn repository() -> TestRepository {
        Repository::new(InMemoryEventStore::new(), InProcessEventBus::new())
    }

    #[tokio::test]
    async fn missing_aggregate_loads_as_none() {
        let repo = repository();
        assert!(repo.get_by_id(AggregateId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_without_changes_is_a_no_op() {
        let repo = repository();
        let mut root = AggregateRoot::<ResearchDomain>::new(AggregateId::new());

        assert_eq!(repo.save(&mut root).await.unwrap(), Version::initial());
        assert_eq!(repo.store().event_count().await, 0);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let repo = repository();
        let id = AggregateId::new();
        let mut root = AggregateRoot::<ResearchDomain>::new(id);
        root.create_problem(CreateProblem::new("protein_folding", "Fold", 4).with_id("p1"))
            .unwrap();

        assert_eq!(repo.save(&mut root).await.unwrap(), Version::first());
        assert!(!root.has_uncommitted_events());

        let loaded = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(loaded.version(), Version::first());
        assert_eq!(loaded.state(), root.state());
    }
}
