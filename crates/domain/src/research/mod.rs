//! Research problems and their transformation into games.

mod aggregate;
mod catalog;
mod commands;
pub mod events;
mod service;
mod value_objects;

pub use aggregate::{ResearchAggregate, ResearchDomain};
pub use catalog::{GameTransformation, ProblemSlot, ProblemTable, ResearchProblem, TransformationSlot};
pub use commands::{CreateProblem, TransformToGame};
pub use events::{
    ContributionsUpdatedData, ProblemCreatedData, ProblemDeactivatedData, ProblemTransformedData,
    ResearchEvent,
};
pub use service::ResearchService;
pub use value_objects::{DifficultyLevel, GameProblemId, GameType, ProblemId, ProblemType};

use thiserror::Error;

/// Rejections of research commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResearchError {
    #[error("Problem ID is required")]
    EmptyProblemId,

    #[error("Research problem already exists: {0}")]
    ProblemAlreadyExists(ProblemId),

    #[error("Problem title is required")]
    EmptyTitle,

    #[error("Invalid difficulty level: {0} (must be between 1 and 10)")]
    InvalidDifficulty(u8),

    #[error("Research problem not found: {0}")]
    ProblemNotFound(ProblemId),

    #[error("Research problem is inactive: {0}")]
    ProblemInactive(ProblemId),

    /// Two transformations of one problem landed on the same millisecond.
    #[error("Game transformation already exists: {0}")]
    GameAlreadyExists(GameProblemId),
}
