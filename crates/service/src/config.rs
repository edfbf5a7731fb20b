//! Environment-based configuration for the service process.

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use domain::RepositoryConfig;
use event_bus::{BusConfig, BusKind};
use resilience::CircuitBreakerConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Output format of the `fmt` tracing layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err("expected `text` or `json`".to_string()),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directive string for `EnvFilter`.
    pub log_filter: String,
    pub log_format: LogFormat,
    /// PostgreSQL connection string; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub bus: BusConfig,
    /// Breaker guarding event store calls.
    pub breaker: CircuitBreakerConfig,
    pub repository: RepositoryConfig,
    /// Address of the Prometheus scrape endpoint.
    pub metrics_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_format: LogFormat::default(),
            database_url: None,
            bus: BusConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            repository: RepositoryConfig::default(),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset or blank.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Config::default();

        let failure_threshold = parse(&var, "BREAKER_FAILURE_THRESHOLD")?
            .unwrap_or(defaults.breaker.failure_threshold);
        if failure_threshold == 0 {
            return Err(invalid("BREAKER_FAILURE_THRESHOLD", "0", "must be at least 1"));
        }
        let breaker = CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout: parse(&var, "BREAKER_RECOVERY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.breaker.recovery_timeout),
        };

        let io_timeout = match parse::<u64, _>(&var, "IO_TIMEOUT_MS")? {
            Some(0) => return Err(invalid("IO_TIMEOUT_MS", "0", "must be positive")),
            Some(ms) => Duration::from_millis(ms),
            None => defaults.repository.io_timeout,
        };

        let handler_timeout = match parse::<u64, _>(&var, "HANDLER_TIMEOUT_MS")? {
            Some(0) => return Err(invalid("HANDLER_TIMEOUT_MS", "0", "must be positive")),
            Some(ms) => Duration::from_millis(ms),
            None => defaults.bus.handler_timeout,
        };

        let bus = BusConfig {
            kind: parse(&var, "EVENT_BUS")?.unwrap_or(BusKind::default()),
            broker_url: var("BROKER_URL"),
            stream_name: var("BROKER_STREAM").unwrap_or(defaults.bus.stream_name),
            subject_prefix: var("BROKER_SUBJECT_PREFIX").unwrap_or(defaults.bus.subject_prefix),
            io_timeout,
            handler_timeout,
            breaker: breaker.clone(),
        };

        Ok(Self {
            log_filter: var("RUST_LOG").unwrap_or(defaults.log_filter),
            log_format: parse(&var, "LOG_FORMAT")?.unwrap_or(defaults.log_format),
            database_url: var("DATABASE_URL"),
            bus,
            breaker,
            repository: RepositoryConfig { io_timeout },
            metrics_addr: parse(&var, "METRICS_ADDR")?.unwrap_or(defaults.metrics_addr),
        })
    }
}

fn parse<T, F>(var: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|value| {
            value
                .parse()
                .map_err(|e: T::Err| invalid(key, &value, e.to_string()))
        })
        .transpose()
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.bus.kind, BusKind::InProcess);
        assert_eq!(config.bus.stream_name, "THINKRANK_EVENTS");
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.recovery_timeout, Duration::from_secs(30));
        assert_eq!(config.repository.io_timeout, Duration::from_secs(5));
        assert_eq!(config.bus.handler_timeout, Duration::from_secs(30));
        assert_eq!(config.metrics_addr.port(), 9000);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("RUST_LOG", "domain=debug"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/thinkrank"),
            ("EVENT_BUS", "broker"),
            ("BROKER_URL", "nats://localhost:4222"),
            ("BROKER_STREAM", "RESEARCH"),
            ("BROKER_SUBJECT_PREFIX", "research"),
            ("BREAKER_FAILURE_THRESHOLD", "2"),
            ("BREAKER_RECOVERY_SECS", "10"),
            ("IO_TIMEOUT_MS", "250"),
            ("HANDLER_TIMEOUT_MS", "1500"),
            ("METRICS_ADDR", "127.0.0.1:9102"),
        ])
        .unwrap();

        assert_eq!(config.log_filter, "domain=debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/thinkrank")
        );
        assert_eq!(config.bus.kind, BusKind::Broker);
        assert_eq!(config.bus.broker_url.as_deref(), Some("nats://localhost:4222"));
        assert_eq!(config.bus.stream_name, "RESEARCH");
        assert_eq!(config.bus.subject_prefix, "research");
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.recovery_timeout, Duration::from_secs(10));
        assert_eq!(config.repository.io_timeout, Duration::from_millis(250));
        assert_eq!(config.bus.handler_timeout, Duration::from_millis(1500));
        assert_eq!(config.metrics_addr, "127.0.0.1:9102".parse().unwrap());
    }

    #[test]
    fn test_bus_shares_breaker_and_timeout() {
        let config = load(&[("BREAKER_FAILURE_THRESHOLD", "7"), ("IO_TIMEOUT_MS", "900")]).unwrap();
        assert_eq!(config.bus.breaker.failure_threshold, 7);
        assert_eq!(config.bus.io_timeout, Duration::from_millis(900));
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = load(&[("DATABASE_URL", "  "), ("EVENT_BUS", "")]).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.bus.kind, BusKind::InProcess);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            ("EVENT_BUS", "kafka"),
            ("LOG_FORMAT", "xml"),
            ("BREAKER_FAILURE_THRESHOLD", "many"),
            ("BREAKER_FAILURE_THRESHOLD", "0"),
            ("IO_TIMEOUT_MS", "0"),
            ("HANDLER_TIMEOUT_MS", "0"),
            ("METRICS_ADDR", "localhost"),
        ];
        for (key, value) in cases {
            match load(&[(key, value)]) {
                Err(ConfigError::Invalid { key: k, .. }) => assert_eq!(k, key),
                Ok(_) => panic!("{key}={value} should be rejected"),
            }
        }
    }
}
