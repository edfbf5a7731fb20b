//! Event bus: hands committed events to interested subscribers.
//!
//! Two transports share the [`EventBus`] contract:
//! - [`InProcessEventBus`] calls handlers directly, best effort, no retry.
//! - [`BrokerEventBus`] publishes to NATS JetStream; subscriptions are durable
//!   consumers and failed deliveries are dead-lettered.
//!
//! [`connect_bus`] picks one from a [`BusConfig`].

pub mod broker;
pub mod bus;
pub mod config;
pub mod error;
pub mod handler;
pub mod in_process;
pub mod routing;

pub use broker::{BrokerEventBus, BrokerOptions};
pub use bus::EventBus;
pub use config::{BusConfig, BusKind, connect_bus};
pub use error::{EventBusError, HandlerError, Result};
pub use handler::{EventHandler, handler_fn};
pub use in_process::InProcessEventBus;
