//! Arena storage for the research projection.
//!
//! Problems and game transformations live in growable tables addressed by
//! slot numbers handed out in insertion order. String ids map to slots
//! through separate indexes, so identity is independent of storage layout.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{DifficultyLevel, GameProblemId, GameType, ProblemId, ProblemType};

/// Position of a problem in its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProblemSlot(u32);

/// Position of a game transformation in its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransformationSlot(u32);

#[derive(Debug, Clone, PartialEq)]
pub struct ResearchProblem {
    pub id: ProblemId,
    pub problem_type: ProblemType,
    pub title: String,
    pub difficulty_level: DifficultyLevel,
    pub validation_criteria: Value,
    pub tags: Vec<String>,
    pub active: bool,
    pub total_contributions: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameTransformation {
    pub id: GameProblemId,
    pub research_problem_id: ProblemId,
    pub game_type: GameType,
    pub difficulty_level: DifficultyLevel,
    pub mechanics_config: Value,
    pub reward_config: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProblemTable {
    problems: Vec<ResearchProblem>,
    problem_index: HashMap<ProblemId, ProblemSlot>,
    transformations: Vec<GameTransformation>,
    transformation_index: HashMap<GameProblemId, TransformationSlot>,
    /// Parallel to `problems`: transformations built from each problem.
    transformations_by_problem: Vec<Vec<TransformationSlot>>,
}

impl ProblemTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `problem`, replacing any problem with the same id in place.
    pub fn insert_problem(&mut self, problem: ResearchProblem) -> ProblemSlot {
        if let Some(&slot) = self.problem_index.get(&problem.id) {
            self.problems[slot.0 as usize] = problem;
            return slot;
        }

        let slot = ProblemSlot(self.problems.len() as u32);
        self.problem_index.insert(problem.id.clone(), slot);
        self.problems.push(problem);
        self.transformations_by_problem.push(Vec::new());
        slot
    }

    pub fn slot_of(&self, id: &ProblemId) -> Option<ProblemSlot> {
        self.problem_index.get(id).copied()
    }

    pub fn problem(&self, slot: ProblemSlot) -> Option<&ResearchProblem> {
        self.problems.get(slot.0 as usize)
    }

    pub fn get(&self, id: &ProblemId) -> Option<&ResearchProblem> {
        self.slot_of(id).and_then(|slot| self.problem(slot))
    }

    pub fn get_mut(&mut self, id: &ProblemId) -> Option<&mut ResearchProblem> {
        let slot = self.slot_of(id)?;
        self.problems.get_mut(slot.0 as usize)
    }

    pub fn contains(&self, id: &ProblemId) -> bool {
        self.problem_index.contains_key(id)
    }

    /// Problems in creation order.
    pub fn problems(&self) -> impl Iterator<Item = &ResearchProblem> {
        self.problems.iter()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Stores `transformation` and links it to its research problem when
    /// that problem is known. A repeated id replaces the earlier entry.
    pub fn insert_transformation(&mut self, transformation: GameTransformation) -> TransformationSlot {
        if let Some(&slot) = self.transformation_index.get(&transformation.id) {
            self.transformations[slot.0 as usize] = transformation;
            return slot;
        }

        let slot = TransformationSlot(self.transformations.len() as u32);
        if let Some(problem) = self.slot_of(&transformation.research_problem_id) {
            self.transformations_by_problem[problem.0 as usize].push(slot);
        }
        self.transformation_index
            .insert(transformation.id.clone(), slot);
        self.transformations.push(transformation);
        slot
    }

    pub fn transformation(&self, id: &GameProblemId) -> Option<&GameTransformation> {
        let slot = self.transformation_index.get(id)?;
        self.transformations.get(slot.0 as usize)
    }

    /// Transformations of one problem, oldest first.
    pub fn transformations_for(
        &self,
        id: &ProblemId,
    ) -> impl Iterator<Item = &GameTransformation> {
        self.slot_of(id)
            .and_then(|slot| self.transformations_by_problem.get(slot.0 as usize))
            .into_iter()
            .flatten()
            .filter_map(|slot| self.transformations.get(slot.0 as usize))
    }
}
