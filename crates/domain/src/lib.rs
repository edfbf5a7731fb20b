//! Domain layer for the research platform.
//!
//! This crate provides:
//! - [`AggregateRoot`] and the [`Aggregate`] / [`EventData`] traits for
//!   event-sourced state
//! - [`Repository`], which loads aggregates from an event store and publishes
//!   saved events on an event bus
//! - the research domain: problems, game transformations and
//!   [`ResearchService`]

pub mod aggregate;
pub mod error;
pub mod repository;
pub mod research;

pub use aggregate::{Aggregate, AggregateRoot, DomainEvent, EventData};
pub use error::{DomainError, Result};
pub use repository::{Repository, RepositoryConfig};
pub use research::{
    CreateProblem, DifficultyLevel, GameProblemId, GameTransformation, GameType, ProblemId,
    ProblemType, ResearchAggregate, ResearchDomain, ResearchError, ResearchEvent, ResearchProblem,
    ResearchService, TransformToGame,
};
