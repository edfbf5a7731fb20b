//! Research domain events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::EventData;

use super::{DifficultyLevel, GameProblemId, GameType, ProblemId, ProblemType};

pub const PROBLEM_CREATED: &str = "ProblemCreated";
pub const CONTRIBUTIONS_UPDATED: &str = "ContributionsUpdated";
pub const PROBLEM_DEACTIVATED: &str = "ProblemDeactivated";
pub const PROBLEM_TRANSFORMED: &str = "ProblemTransformed";

/// Events that can occur on the research domain aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum ResearchEvent {
    ProblemCreated(ProblemCreatedData),
    ContributionsUpdated(ContributionsUpdatedData),
    ProblemDeactivated(ProblemDeactivatedData),
    ProblemTransformed(ProblemTransformedData),
    /// An event type this build does not know. Kept verbatim, never applied.
    Unrecognized { event_type: String, payload: Value },
}

impl ResearchEvent {
    /// Every event type this build produces.
    pub const TYPES: [&'static str; 4] = [
        PROBLEM_CREATED,
        CONTRIBUTIONS_UPDATED,
        PROBLEM_DEACTIVATED,
        PROBLEM_TRANSFORMED,
    ];

    /// The problem the event is about, if any.
    pub fn problem_id(&self) -> Option<&ProblemId> {
        match self {
            ResearchEvent::ProblemCreated(data) => Some(&data.problem_id),
            ResearchEvent::ContributionsUpdated(data) => Some(&data.problem_id),
            ResearchEvent::ProblemDeactivated(data) => Some(&data.problem_id),
            ResearchEvent::ProblemTransformed(data) => Some(&data.research_problem_id),
            ResearchEvent::Unrecognized { .. } => None,
        }
    }
}

impl EventData for ResearchEvent {
    fn event_type(&self) -> &str {
        match self {
            ResearchEvent::ProblemCreated(_) => PROBLEM_CREATED,
            ResearchEvent::ContributionsUpdated(_) => CONTRIBUTIONS_UPDATED,
            ResearchEvent::ProblemDeactivated(_) => PROBLEM_DEACTIVATED,
            ResearchEvent::ProblemTransformed(_) => PROBLEM_TRANSFORMED,
            ResearchEvent::Unrecognized { event_type, .. } => event_type,
        }
    }

    fn to_payload(&self) -> serde_json::Result<Value> {
        match self {
            ResearchEvent::ProblemCreated(data) => serde_json::to_value(data),
            ResearchEvent::ContributionsUpdated(data) => serde_json::to_value(data),
            ResearchEvent::ProblemDeactivated(data) => serde_json::to_value(data),
            ResearchEvent::ProblemTransformed(data) => serde_json::to_value(data),
            ResearchEvent::Unrecognized { payload, .. } => Ok(payload.clone()),
        }
    }

    fn from_payload(event_type: &str, payload: Value) -> serde_json::Result<Self> {
        match event_type {
            PROBLEM_CREATED => serde_json::from_value(payload).map(ResearchEvent::ProblemCreated),
            CONTRIBUTIONS_UPDATED => {
                serde_json::from_value(payload).map(ResearchEvent::ContributionsUpdated)
            }
            PROBLEM_DEACTIVATED => {
                serde_json::from_value(payload).map(ResearchEvent::ProblemDeactivated)
            }
            PROBLEM_TRANSFORMED => {
                serde_json::from_value(payload).map(ResearchEvent::ProblemTransformed)
            }
            other => Ok(ResearchEvent::Unrecognized {
                event_type: other.to_string(),
                payload,
            }),
        }
    }
}

/// Data for ProblemCreated event. The creation time is the event timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemCreatedData {
    pub problem_id: ProblemId,
    pub problem_type: ProblemType,
    pub title: String,
    pub difficulty_level: DifficultyLevel,
    #[serde(default)]
    pub validation_criteria: Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Data for ContributionsUpdated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionsUpdatedData {
    pub problem_id: ProblemId,
    /// New running total, not a delta.
    pub total_contributions: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDeactivatedData {
    pub problem_id: ProblemId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemTransformedData {
    pub game_problem_id: GameProblemId,
    pub research_problem_id: ProblemId,
    pub game_type: GameType,
    pub difficulty_level: DifficultyLevel,
    #[serde(default)]
    pub mechanics_config: Value,
    #[serde(default)]
    pub reward_config: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trip_by_event_type() {
        let event = ResearchEvent::ContributionsUpdated(ContributionsUpdatedData {
            problem_id: ProblemId::new("p1"),
            total_contributions: 5,
        });
        let payload = event.to_payload().unwrap();
        assert_eq!(
            payload,
            serde_json::json!({"problem_id": "p1", "total_contributions": 5})
        );

        let decoded = ResearchEvent::from_payload(event.event_type(), payload).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn unknown_types_decode_as_unrecognized() {
        let payload = serde_json::json!({"problem_id": "p1", "score": 9});
        let event = ResearchEvent::from_payload("ProblemScored", payload.clone()).unwrap();

        assert_eq!(event.event_type(), "ProblemScored");
        assert_eq!(event.to_payload().unwrap(), payload);
        assert_eq!(event.problem_id(), None);
    }

    #[test]
    fn known_type_with_bad_payload_is_an_error() {
        let result = ResearchEvent::from_payload(PROBLEM_DEACTIVATED, serde_json::json!({}));
        assert!(result.is_err());
    }
}
