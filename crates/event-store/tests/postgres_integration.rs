//! PostgreSQL integration tests
//!
//! Tests share one PostgreSQL container and truncate the table between runs,
//! so they are serialized. Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration
//! ```

use std::sync::Arc;

use event_store::{
    AggregateId, AppendOptions, EventEnvelope, EventStore, EventStoreError, EventStoreExt,
    PostgresEventStore, Version,
};
use serial_test::serial;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let store = PostgresEventStore::connect(&connection_string).await.unwrap();
            store.run_migrations().await.unwrap();
            store.pool().close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;
    let store = PostgresEventStore::connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events")
        .execute(store.pool())
        .await
        .unwrap();

    store
}

fn create_test_event(
    aggregate_id: AggregateId,
    version: Version,
    event_type: &str,
) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("ResearchDomain")
        .event_type(event_type)
        .version(version)
        .payload_raw(serde_json::json!({"problem_id": "p-1"}))
        .build()
        .unwrap()
}

#[tokio::test]
#[serial]
async fn append_and_read_back_in_version_order() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let events = vec![
        create_test_event(aggregate_id, Version::new(1), "ProblemCreated"),
        create_test_event(aggregate_id, Version::new(2), "ContributionsUpdated"),
        create_test_event(aggregate_id, Version::new(3), "ProblemDeactivated"),
    ];
    let version = store
        .append(events, AppendOptions::expect_new())
        .await
        .unwrap();
    assert_eq!(version, Version::new(3));

    let stored = store.get_events_for_aggregate(aggregate_id).await.unwrap();
    let types: Vec<_> = stored.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        ["ProblemCreated", "ContributionsUpdated", "ProblemDeactivated"]
    );
}

#[tokio::test]
#[serial]
async fn stale_writer_gets_a_conflict() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append(
            vec![create_test_event(aggregate_id, Version::first(), "ProblemCreated")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let result = store
        .append(
            vec![create_test_event(aggregate_id, Version::first(), "ProblemCreated")],
            AppendOptions::expect_new(),
        )
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));
}

#[tokio::test]
#[serial]
async fn racing_writers_exactly_one_commits() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let (a, b) = tokio::join!(
        store.append(
            vec![create_test_event(aggregate_id, Version::first(), "A")],
            AppendOptions::expect_new(),
        ),
        store.append(
            vec![create_test_event(aggregate_id, Version::first(), "B")],
            AppendOptions::expect_new(),
        ),
    );

    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert_eq!(
        store.get_aggregate_version(aggregate_id).await.unwrap(),
        Some(Version::first())
    );
}

#[tokio::test]
#[serial]
async fn read_from_version_and_by_type() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();
    let other = AggregateId::new();

    store
        .append(
            (1..=3)
                .map(|v| create_test_event(aggregate_id, Version::new(v), "ContributionsUpdated"))
                .collect(),
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();
    store
        .append(
            vec![create_test_event(other, Version::first(), "ProblemCreated")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let tail = store
        .get_events_for_aggregate_from_version(aggregate_id, Version::new(2))
        .await
        .unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].version, Version::new(2));

    let created = store.get_events_by_type("ProblemCreated").await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].aggregate_id, other);

    assert!(store.aggregate_exists(other).await.unwrap());
    assert!(!store.aggregate_exists(AggregateId::new()).await.unwrap());
}

#[tokio::test]
#[serial]
async fn metadata_and_event_id_survive_storage() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let event = EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("ResearchDomain")
        .event_type("ProblemCreated")
        .version(Version::first())
        .payload_raw(serde_json::json!({"title": "Protein folding"}))
        .metadata("correlation_id", serde_json::json!("req-42"))
        .build()
        .unwrap();
    let event_id = event.event_id;

    store
        .append_event(event, AppendOptions::expect_new())
        .await
        .unwrap();

    let stored = store.get_events_for_aggregate(aggregate_id).await.unwrap();
    assert_eq!(stored[0].event_id, event_id);
    assert_eq!(
        stored[0].metadata.get("correlation_id"),
        Some(&serde_json::json!("req-42"))
    );
    assert_eq!(stored[0].payload["title"], "Protein folding");
}
