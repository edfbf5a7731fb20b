use common::AggregateId;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{
    CreateProblem, DomainEvent, ProblemId, Repository, ResearchAggregate, ResearchEvent,
    ResearchService,
};
use event_bus::InProcessEventBus;
use event_store::{AppendOptions, EventEnvelope, EventStore, InMemoryEventStore};

/// History of one created problem followed by `updates` contribution updates.
fn history(aggregate_id: AggregateId, updates: u64) -> Vec<EventEnvelope> {
    let mut root = ResearchAggregate::new(aggregate_id);
    let problem_id = root
        .create_problem(CreateProblem::new("protein_folding", "Bench", 5).with_id("p-bench"))
        .unwrap();
    for total in 1..=updates {
        root.update_contributions(&problem_id, total).unwrap();
    }
    root.uncommitted_events()
        .iter()
        .map(|e| e.to_envelope().unwrap())
        .collect()
}

fn bench_create_problem(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("domain/create_problem", |b| {
        b.iter(|| {
            rt.block_on(async {
                let repo = Repository::new(InMemoryEventStore::new(), InProcessEventBus::new());
                let service = ResearchService::new(repo);
                service
                    .create_problem(
                        AggregateId::new(),
                        CreateProblem::new("protein_folding", "Bench", 5),
                    )
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_update_contributions(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let repo = Repository::new(InMemoryEventStore::new(), InProcessEventBus::new());
    let service = ResearchService::new(repo);
    let domain_id = AggregateId::new();
    let problem_id = ProblemId::new("p-bench");
    rt.block_on(async {
        service
            .create_problem(
                domain_id,
                CreateProblem::new("protein_folding", "Bench", 5).with_id("p-bench"),
            )
            .await
            .unwrap()
    });

    let mut total = 0;
    c.bench_function("domain/update_contributions", |b| {
        b.iter(|| {
            total += 1;
            rt.block_on(async {
                service
                    .update_contributions(domain_id, &problem_id, total)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_replay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("domain/replay");

    for updates in [50u64, 100, 500] {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();
        rt.block_on(async {
            store
                .append(history(aggregate_id, updates), AppendOptions::new())
                .await
                .unwrap()
        });

        group.bench_with_input(BenchmarkId::from_parameter(updates + 1), &updates, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let envelopes = store.get_events_for_aggregate(aggregate_id).await.unwrap();
                    let events = envelopes
                        .into_iter()
                        .map(|e| DomainEvent::<ResearchEvent>::from_envelope(e).unwrap());
                    let mut root = ResearchAggregate::new(aggregate_id);
                    root.load_from_history(events).unwrap();
                });
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_create_problem,
    bench_update_contributions,
    bench_replay,
);
criterion_main!(benches);
