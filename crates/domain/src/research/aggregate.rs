//! Research domain aggregate: the projection and its command methods.

use chrono::{DateTime, Utc};

use crate::aggregate::{Aggregate, AggregateRoot, DomainEvent};

use super::catalog::{GameTransformation, ProblemTable, ResearchProblem};
use super::events::{
    ContributionsUpdatedData, ProblemCreatedData, ProblemDeactivatedData, ProblemTransformedData,
    ResearchEvent,
};
use super::{
    CreateProblem, DifficultyLevel, GameProblemId, ProblemId, ProblemType, ResearchError,
    TransformToGame,
};

/// Research problems and the games built from them, projected from events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResearchDomain {
    table: ProblemTable,
}

/// A loaded research domain ready to take commands.
pub type ResearchAggregate = AggregateRoot<ResearchDomain>;

impl Aggregate for ResearchDomain {
    type Event = ResearchEvent;

    fn aggregate_type() -> &'static str {
        "ResearchDomain"
    }

    fn apply(&mut self, event: &DomainEvent<ResearchEvent>) {
        let at = event.timestamp();
        match event.data() {
            ResearchEvent::ProblemCreated(data) => self.apply_problem_created(data, at),
            ResearchEvent::ContributionsUpdated(data) => {
                if let Some(problem) = self.table.get_mut(&data.problem_id) {
                    problem.total_contributions = data.total_contributions;
                    problem.updated_at = at;
                }
            }
            ResearchEvent::ProblemDeactivated(data) => {
                if let Some(problem) = self.table.get_mut(&data.problem_id) {
                    problem.active = false;
                    problem.updated_at = at;
                }
            }
            ResearchEvent::ProblemTransformed(data) => self.apply_problem_transformed(data, at),
            ResearchEvent::Unrecognized { .. } => {}
        }
    }
}

impl ResearchDomain {
    fn apply_problem_created(&mut self, data: &ProblemCreatedData, at: DateTime<Utc>) {
        self.table.insert_problem(ResearchProblem {
            id: data.problem_id.clone(),
            problem_type: data.problem_type.clone(),
            title: data.title.clone(),
            difficulty_level: data.difficulty_level,
            validation_criteria: data.validation_criteria.clone(),
            tags: data.tags.clone(),
            active: true,
            total_contributions: 0,
            created_at: at,
            updated_at: at,
        });
    }

    fn apply_problem_transformed(&mut self, data: &ProblemTransformedData, at: DateTime<Utc>) {
        self.table.insert_transformation(GameTransformation {
            id: data.game_problem_id.clone(),
            research_problem_id: data.research_problem_id.clone(),
            game_type: data.game_type.clone(),
            difficulty_level: data.difficulty_level,
            mechanics_config: data.mechanics_config.clone(),
            reward_config: data.reward_config.clone(),
            created_at: at,
        });
    }

    fn require_problem(&self, id: &ProblemId) -> Result<&ResearchProblem, ResearchError> {
        self.table
            .get(id)
            .ok_or_else(|| ResearchError::ProblemNotFound(id.clone()))
    }

    fn require_active(&self, id: &ProblemId) -> Result<&ResearchProblem, ResearchError> {
        let problem = self.require_problem(id)?;
        if !problem.active {
            return Err(ResearchError::ProblemInactive(id.clone()));
        }
        Ok(problem)
    }
}

// Query methods
impl ResearchDomain {
    pub fn get_problem(&self, id: &ProblemId) -> Option<&ResearchProblem> {
        self.table.get(id)
    }

    /// Active problems in creation order.
    pub fn get_active_problems(&self) -> Vec<&ResearchProblem> {
        self.table.problems().filter(|p| p.active).collect()
    }

    pub fn get_problems_by_type(&self, problem_type: &ProblemType) -> Vec<&ResearchProblem> {
        self.table
            .problems()
            .filter(|p| &p.problem_type == problem_type)
            .collect()
    }

    pub fn get_game_transformation(&self, id: &GameProblemId) -> Option<&GameTransformation> {
        self.table.transformation(id)
    }

    pub fn get_transformations_for_problem(&self, id: &ProblemId) -> Vec<&GameTransformation> {
        self.table.transformations_for(id).collect()
    }

    pub fn problem_count(&self) -> usize {
        self.table.len()
    }

    pub fn table(&self) -> &ProblemTable {
        &self.table
    }
}

// Command methods. Each validates against the current projection and, on
// success, records exactly one event.
impl AggregateRoot<ResearchDomain> {
    pub fn create_problem(&mut self, cmd: CreateProblem) -> Result<ProblemId, ResearchError> {
        if cmd.problem_id.is_empty() {
            return Err(ResearchError::EmptyProblemId);
        }
        if self.state().table().contains(&cmd.problem_id) {
            return Err(ResearchError::ProblemAlreadyExists(cmd.problem_id));
        }
        let title = cmd.title.trim();
        if title.is_empty() {
            return Err(ResearchError::EmptyTitle);
        }
        let difficulty_level = DifficultyLevel::new(cmd.difficulty_level)?;

        let problem_id = cmd.problem_id;
        self.apply_event(ResearchEvent::ProblemCreated(ProblemCreatedData {
            problem_id: problem_id.clone(),
            problem_type: cmd.problem_type,
            title: title.to_string(),
            difficulty_level,
            validation_criteria: cmd.validation_criteria,
            tags: cmd.tags,
        }));
        Ok(problem_id)
    }

    /// Returns the id of the new game, `game_{problem_id}_{epoch_millis}`.
    pub fn transform_to_game(&mut self, cmd: TransformToGame) -> Result<GameProblemId, ResearchError> {
        self.transform_to_game_at(cmd, Utc::now())
    }

    fn transform_to_game_at(
        &mut self,
        cmd: TransformToGame,
        now: DateTime<Utc>,
    ) -> Result<GameProblemId, ResearchError> {
        self.state().require_active(&cmd.problem_id)?;
        let difficulty_level = DifficultyLevel::new(cmd.difficulty_level)?;

        let game_problem_id = GameProblemId::new(&cmd.problem_id, now);
        if self.state().get_game_transformation(&game_problem_id).is_some() {
            return Err(ResearchError::GameAlreadyExists(game_problem_id));
        }
        self.apply_event_at(
            ResearchEvent::ProblemTransformed(ProblemTransformedData {
                game_problem_id: game_problem_id.clone(),
                research_problem_id: cmd.problem_id,
                game_type: cmd.game_type,
                difficulty_level,
                mechanics_config: cmd.mechanics_config,
                reward_config: cmd.reward_config,
            }),
            now,
        );
        Ok(game_problem_id)
    }

    /// Sets the problem's contribution total to `total_contributions`.
    pub fn update_contributions(
        &mut self,
        problem_id: &ProblemId,
        total_contributions: u64,
    ) -> Result<(), ResearchError> {
        self.state().require_problem(problem_id)?;

        self.apply_event(ResearchEvent::ContributionsUpdated(ContributionsUpdatedData {
            problem_id: problem_id.clone(),
            total_contributions,
        }));
        Ok(())
    }

    pub fn deactivate_problem(
        &mut self,
        problem_id: &ProblemId,
        reason: impl Into<String>,
    ) -> Result<(), ResearchError> {
        self.state().require_active(problem_id)?;

        self.apply_event(ResearchEvent::ProblemDeactivated(ProblemDeactivatedData {
            problem_id: problem_id.clone(),
            reason: reason.into(),
        }));
        Ok(())
    }
}
