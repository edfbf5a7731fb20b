use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use resilience::{CircuitBreaker, CircuitBreakerConfig};

use crate::broker::{BrokerEventBus, BrokerOptions};
use crate::bus::EventBus;
use crate::error::{EventBusError, Result};
use crate::in_process::InProcessEventBus;

/// Which transport [`connect_bus`] builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BusKind {
    #[default]
    InProcess,
    Broker,
}

impl FromStr for BusKind {
    type Err = EventBusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in_process" | "in-process" | "memory" => Ok(BusKind::InProcess),
            "broker" | "nats" => Ok(BusKind::Broker),
            other => Err(EventBusError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub kind: BusKind,
    /// Required for [`BusKind::Broker`].
    pub broker_url: Option<String>,
    pub stream_name: String,
    pub subject_prefix: String,
    pub io_timeout: Duration,
    /// Upper bound for one subscriber call, on either transport.
    pub handler_timeout: Duration,
    /// Breaker guarding broker publishes.
    pub breaker: CircuitBreakerConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        let broker = BrokerOptions::default();
        Self {
            kind: BusKind::default(),
            broker_url: None,
            stream_name: broker.stream_name,
            subject_prefix: broker.subject_prefix,
            io_timeout: broker.io_timeout,
            handler_timeout: broker.handler_timeout,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl BusConfig {
    fn broker_options(&self) -> BrokerOptions {
        BrokerOptions {
            stream_name: self.stream_name.clone(),
            subject_prefix: self.subject_prefix.clone(),
            io_timeout: self.io_timeout,
            handler_timeout: self.handler_timeout,
            ..BrokerOptions::default()
        }
    }
}

/// Builds the event bus described by `config`.
///
/// A broker bus without a URL is rejected before any connection attempt.
pub async fn connect_bus(config: &BusConfig) -> Result<Arc<dyn EventBus>> {
    match config.kind {
        BusKind::InProcess => {
            tracing::info!("using in-process event bus");
            Ok(Arc::new(
                InProcessEventBus::new().with_handler_timeout(config.handler_timeout),
            ))
        }
        BusKind::Broker => {
            let url = config
                .broker_url
                .as_deref()
                .filter(|url| !url.trim().is_empty())
                .ok_or(EventBusError::MissingBrokerConfig)?;
            let breaker = Arc::new(CircuitBreaker::new("broker", config.breaker.clone()));
            let bus = BrokerEventBus::connect(url, config.broker_options())
                .await?
                .with_breaker(breaker);
            Ok(Arc::new(bus))
        }
    }
}
