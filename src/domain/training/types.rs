use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Model families retrained by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Analytical,
    Chatbot,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::Analytical, ModelType::Chatbot];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Analytical => "analytical",
            ModelType::Chatbot => "chatbot",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "analytical" => Ok(ModelType::Analytical),
            "chatbot" => Ok(ModelType::Chatbot),
            _ => anyhow::bail!(
                "Invalid model type: {}. Must be 'analytical' or 'chatbot'",
                s
            ),
        }
    }
}

/// Lifecycle stage of a training run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStage {
    Idle,
    Collecting,
    EngineeringFeatures,
    Training,
    Validating,
    Deploying,
    Completed,
    Failed,
    Cancelled,
}

impl TrainingStage {
    /// Working stages in execution order
    pub const PIPELINE: [TrainingStage; 5] = [
        TrainingStage::Collecting,
        TrainingStage::EngineeringFeatures,
        TrainingStage::Training,
        TrainingStage::Validating,
        TrainingStage::Deploying,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrainingStage::Completed | TrainingStage::Failed | TrainingStage::Cancelled
        )
    }

    pub fn pipeline_index(&self) -> Option<usize> {
        Self::PIPELINE.iter().position(|s| s == self)
    }

    /// The only stage that may follow this one on the success path
    pub fn successor(&self) -> Option<TrainingStage> {
        match self {
            TrainingStage::Idle => Some(TrainingStage::Collecting),
            TrainingStage::Collecting => Some(TrainingStage::EngineeringFeatures),
            TrainingStage::EngineeringFeatures => Some(TrainingStage::Training),
            TrainingStage::Training => Some(TrainingStage::Validating),
            TrainingStage::Validating => Some(TrainingStage::Deploying),
            TrainingStage::Deploying => Some(TrainingStage::Completed),
            TrainingStage::Completed | TrainingStage::Failed | TrainingStage::Cancelled => None,
        }
    }

    pub fn can_transition_to(&self, next: TrainingStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TrainingStage::Failed | TrainingStage::Cancelled => true,
            other => self.successor() == Some(other),
        }
    }
}

impl fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrainingStage::Idle => "idle",
            TrainingStage::Collecting => "collecting",
            TrainingStage::EngineeringFeatures => "engineering",
            TrainingStage::Training => "training",
            TrainingStage::Validating => "validating",
            TrainingStage::Deploying => "deploying",
            TrainingStage::Completed => "completed",
            TrainingStage::Failed => "failed",
            TrainingStage::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerReason {
    Scheduled, // Periodic retraining
    Manual,    // Operator forced
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::Scheduled => write!(f, "Scheduled"),
            TriggerReason::Manual => write!(f, "Manual"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_advance_strictly_in_order() {
        let mut stage = TrainingStage::Idle;
        let mut visited = Vec::new();
        while let Some(next) = stage.successor() {
            assert!(stage.can_transition_to(next));
            visited.push(next);
            stage = next;
        }
        assert_eq!(visited.len(), 6);
        assert_eq!(stage, TrainingStage::Completed);
    }

    #[test]
    fn test_stage_skipping_is_rejected() {
        assert!(!TrainingStage::Collecting.can_transition_to(TrainingStage::Training));
        assert!(!TrainingStage::Validating.can_transition_to(TrainingStage::Collecting));
        assert!(TrainingStage::Training.can_transition_to(TrainingStage::Failed));
        assert!(TrainingStage::Idle.can_transition_to(TrainingStage::Cancelled));
        assert!(!TrainingStage::Completed.can_transition_to(TrainingStage::Failed));
    }

    #[test]
    fn test_model_type_parsing() {
        assert_eq!(
            "Analytical".parse::<ModelType>().unwrap(),
            ModelType::Analytical
        );
        assert_eq!("chatbot".parse::<ModelType>().unwrap(), ModelType::Chatbot);
        assert!("sentiment".parse::<ModelType>().is_err());
    }
}
