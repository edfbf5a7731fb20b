use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use domain::{DomainEvent, ResearchEvent};
use event_bus::{EventHandler, HandlerError};
use event_store::EventEnvelope;

/// Subscriber that writes one structured log line per research event.
#[derive(Debug, Default)]
pub struct AuditLog {
    seen: AtomicU64,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events handled since startup.
    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventHandler for AuditLog {
    fn name(&self) -> &str {
        "audit"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let event = DomainEvent::<ResearchEvent>::from_envelope(envelope.clone())
            .map_err(HandlerError::new)?;

        self.seen.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("research_events_audited_total", "event_type" => envelope.event_type.clone())
            .increment(1);
        tracing::info!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            domain_id = %envelope.aggregate_id,
            version = %envelope.version,
            problem_id = event.data().problem_id().map(|id| id.as_str()),
            "research event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;
    use event_store::Version;

    #[tokio::test]
    async fn counts_decodable_events() {
        let audit = AuditLog::new();
        let envelope = EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("ResearchDomain")
            .event_type("ContributionsUpdated")
            .version(Version::first())
            .payload_raw(serde_json::json!({"problem_id": "p-1", "total_contributions": 3}))
            .build()
            .unwrap();

        audit.handle(&envelope).await.unwrap();
        assert_eq!(audit.seen(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_handler_error() {
        let audit = AuditLog::new();
        let envelope = EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("ResearchDomain")
            .event_type("ProblemCreated")
            .version(Version::first())
            .payload_raw(serde_json::json!({"title": 42}))
            .build()
            .unwrap();

        assert!(audit.handle(&envelope).await.is_err());
        assert_eq!(audit.seen(), 0);
    }
}
