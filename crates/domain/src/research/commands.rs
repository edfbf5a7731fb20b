//! Research domain commands.

use serde_json::Value;

use super::{GameType, ProblemId, ProblemType};

/// Command to register a new research problem.
#[derive(Debug, Clone)]
pub struct CreateProblem {
    pub problem_id: ProblemId,
    pub problem_type: ProblemType,
    pub title: String,
    /// Validated to 1..=10 when the command runs.
    pub difficulty_level: u8,
    pub validation_criteria: Value,
    pub tags: Vec<String>,
}

impl CreateProblem {
    /// Creates the command with a generated problem id.
    pub fn new(problem_type: impl Into<String>, title: impl Into<String>, difficulty_level: u8) -> Self {
        Self {
            problem_id: ProblemId::generate(),
            problem_type: ProblemType::new(problem_type),
            title: title.into(),
            difficulty_level,
            validation_criteria: Value::Object(Default::default()),
            tags: Vec::new(),
        }
    }

    pub fn with_id(mut self, problem_id: impl Into<String>) -> Self {
        self.problem_id = ProblemId::new(problem_id);
        self
    }

    pub fn with_validation_criteria(mut self, criteria: Value) -> Self {
        self.validation_criteria = criteria;
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Command to turn a research problem into a playable game.
#[derive(Debug, Clone)]
pub struct TransformToGame {
    pub problem_id: ProblemId,
    pub game_type: GameType,
    pub difficulty_level: u8,
    pub mechanics_config: Value,
    pub reward_config: Value,
}

impl TransformToGame {
    pub fn new(
        problem_id: impl Into<String>,
        game_type: impl Into<String>,
        difficulty_level: u8,
    ) -> Self {
        Self {
            problem_id: ProblemId::new(problem_id),
            game_type: GameType::new(game_type),
            difficulty_level,
            mechanics_config: Value::Object(Default::default()),
            reward_config: Value::Object(Default::default()),
        }
    }

    pub fn with_mechanics(mut self, mechanics_config: Value) -> Self {
        self.mechanics_config = mechanics_config;
        self
    }

    pub fn with_rewards(mut self, reward_config: Value) -> Self {
        self.reward_config = reward_config;
        self
    }
}
