//! Process wiring for the research domain service.
//!
//! Builds the event store, event bus, circuit breakers and
//! [`ResearchService`] from a [`Config`].

pub mod audit;
pub mod config;

use std::sync::Arc;

use domain::{Repository, ResearchEvent, ResearchService};
use event_bus::{EventBus, EventBusError, EventHandler, connect_bus};
use event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore};
use resilience::CircuitBreaker;
use thiserror::Error;

pub use audit::AuditLog;
pub use config::{Config, ConfigError, LogFormat};

pub type SharedStore = Arc<dyn EventStore>;
pub type SharedBus = Arc<dyn EventBus>;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("event store: {0}")]
    Store(#[from] EventStoreError),

    #[error("event bus: {0}")]
    Bus(#[from] EventBusError),
}

/// Running application state.
pub struct App {
    pub research: ResearchService<SharedStore, SharedBus>,
    pub bus: SharedBus,
    pub store_breaker: Arc<CircuitBreaker>,
    pub audit: Arc<AuditLog>,
}

impl App {
    pub async fn build(config: &Config) -> Result<Self, StartupError> {
        let store = build_store(config).await?;
        let bus = connect_bus(&config.bus).await?;

        let audit = Arc::new(AuditLog::new());
        for event_type in ResearchEvent::TYPES {
            let handler: Arc<dyn EventHandler> = audit.clone();
            bus.subscribe(event_type, handler).await?;
        }

        let store_breaker = Arc::new(CircuitBreaker::new("event-store", config.breaker.clone()));
        let repository = Repository::new(store, bus.clone())
            .with_config(config.repository.clone())
            .with_breaker(store_breaker.clone());

        Ok(Self {
            research: ResearchService::new(repository),
            bus,
            store_breaker,
            audit,
        })
    }

    /// Logs breaker state and the audit count.
    pub fn report_health(&self) {
        let breaker = self.store_breaker.snapshot();
        tracing::info!(
            breaker = %breaker.name,
            state = ?breaker.state,
            failures = breaker.failure_count,
            rejections = breaker.total_rejections,
            audited = self.audit.seen(),
            "health"
        );
    }

    pub async fn shutdown(&self) -> Result<(), StartupError> {
        self.bus.close().await?;
        tracing::info!("event bus closed");
        Ok(())
    }
}

async fn build_store(config: &Config) -> Result<SharedStore, StartupError> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresEventStore::connect(url).await?;
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL event store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory event store");
            Ok(Arc::new(InMemoryEventStore::new()))
        }
    }
}
