//! Factory and cross-transport behaviour that needs no running broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use event_bus::{
    BusConfig, BusKind, EventBus, EventBusError, HandlerError, connect_bus, handler_fn,
};
use event_store::{AggregateId, EventEnvelope, Version};

fn created(aggregate_id: AggregateId) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("ResearchDomain")
        .event_type("ProblemCreated")
        .version(Version::first())
        .payload_raw(serde_json::json!({"problem_id": "p-1"}))
        .build()
        .unwrap()
}

#[tokio::test]
async fn broker_without_url_is_rejected_before_connecting() {
    let config = BusConfig {
        kind: BusKind::Broker,
        broker_url: None,
        ..BusConfig::default()
    };
    assert!(matches!(
        connect_bus(&config).await,
        Err(EventBusError::MissingBrokerConfig)
    ));

    let blank = BusConfig {
        kind: BusKind::Broker,
        broker_url: Some("  ".to_string()),
        ..BusConfig::default()
    };
    assert!(matches!(
        connect_bus(&blank).await,
        Err(EventBusError::MissingBrokerConfig)
    ));
}

#[tokio::test]
async fn default_config_builds_a_working_in_process_bus() {
    let bus = connect_bus(&BusConfig::default()).await.unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let failing = handler_fn("failing", |_| async {
        Err::<(), _>(HandlerError::new("read model unavailable"))
    });
    let counting = {
        let calls = calls.clone();
        handler_fn("counting", move |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(())
            }
        })
    };
    bus.subscribe("ProblemCreated", failing).await.unwrap();
    bus.subscribe("ProblemCreated", counting).await.unwrap();

    bus.publish(&[created(AggregateId::new())]).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    bus.close().await.unwrap();
    assert!(matches!(
        bus.publish(&[created(AggregateId::new())]).await,
        Err(EventBusError::Closed)
    ));
}

#[tokio::test(start_paused = true)]
async fn configured_handler_timeout_bounds_in_process_handlers() {
    let config = BusConfig {
        handler_timeout: Duration::from_millis(200),
        ..BusConfig::default()
    };
    let bus = connect_bus(&config).await.unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let stuck = handler_fn("stuck", |_| async {
        std::future::pending::<()>().await;
        Ok::<_, HandlerError>(())
    });
    let counting = {
        let calls = calls.clone();
        handler_fn("counting", move |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(())
            }
        })
    };
    bus.subscribe("ProblemCreated", stuck).await.unwrap();
    bus.subscribe("ProblemCreated", counting).await.unwrap();

    bus.publish(&[created(AggregateId::new()), created(AggregateId::new())])
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
