//! Research service: command entry points with reload-and-retry on conflict.

use common::AggregateId;
use event_bus::EventBus;
use event_store::EventStore;

use crate::error::Result;
use crate::repository::Repository;

use super::{
    CreateProblem, GameProblemId, ProblemId, ResearchAggregate, ResearchDomain, ResearchError,
    ResearchProblem, TransformToGame,
};

/// Runs research commands against one aggregate per research domain id.
///
/// Each command loads the aggregate, applies the command and saves. When the
/// save loses an optimistic-concurrency race the whole cycle is repeated
/// against fresh state, up to `max_conflict_retries` times.
pub struct ResearchService<S, B> {
    repository: Repository<ResearchDomain, S, B>,
    max_conflict_retries: u32,
}

impl<S: EventStore, B: EventBus> ResearchService<S, B> {
    pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

    pub fn new(repository: Repository<ResearchDomain, S, B>) -> Self {
        Self {
            repository,
            max_conflict_retries: Self::DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn repository(&self) -> &Repository<ResearchDomain, S, B> {
        &self.repository
    }

    #[tracing::instrument(skip(self, cmd), fields(problem_id = %cmd.problem_id))]
    pub async fn create_problem(
        &self,
        domain_id: AggregateId,
        cmd: CreateProblem,
    ) -> Result<ProblemId> {
        self.execute(domain_id, |root| root.create_problem(cmd.clone()))
            .await
    }

    #[tracing::instrument(skip(self, cmd), fields(problem_id = %cmd.problem_id))]
    pub async fn transform_to_game(
        &self,
        domain_id: AggregateId,
        cmd: TransformToGame,
    ) -> Result<GameProblemId> {
        self.execute(domain_id, |root| root.transform_to_game(cmd.clone()))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_contributions(
        &self,
        domain_id: AggregateId,
        problem_id: &ProblemId,
        total_contributions: u64,
    ) -> Result<()> {
        self.execute(domain_id, |root| {
            root.update_contributions(problem_id, total_contributions)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn deactivate_problem(
        &self,
        domain_id: AggregateId,
        problem_id: &ProblemId,
        reason: &str,
    ) -> Result<()> {
        self.execute(domain_id, |root| root.deactivate_problem(problem_id, reason))
            .await
    }

    /// Loads a research domain. Returns None if it has no events.
    #[tracing::instrument(skip(self))]
    pub async fn get_domain(&self, domain_id: AggregateId) -> Result<Option<ResearchDomain>> {
        Ok(self
            .repository
            .get_by_id(domain_id)
            .await?
            .map(ResearchAggregate::into_state))
    }

    pub async fn get_problem(
        &self,
        domain_id: AggregateId,
        problem_id: &ProblemId,
    ) -> Result<Option<ResearchProblem>> {
        Ok(self
            .get_domain(domain_id)
            .await?
            .and_then(|domain| domain.get_problem(problem_id).cloned()))
    }

    async fn execute<T, F>(&self, domain_id: AggregateId, command: F) -> Result<T>
    where
        F: Fn(&mut ResearchAggregate) -> std::result::Result<T, ResearchError>,
    {
        let mut attempt = 0;
        loop {
            let mut root = self
                .repository
                .get_by_id(domain_id)
                .await?
                .unwrap_or_else(|| ResearchAggregate::new(domain_id));

            let output = command(&mut root)?;

            match self.repository.save(&mut root).await {
                Ok(_) => return Ok(output),
                Err(error) if error.is_conflict() && attempt < self.max_conflict_retries => {
                    attempt += 1;
                    tracing::info!(attempt, %domain_id, "conflict on save, retrying with fresh state");
                }
                Err(error) => return Err(error),
            }
        }
    }
}
