//! Goal/task tracking state machine.

pub mod manager;
pub mod types;

pub use manager::{DecisionUpdate, GoalManager, GoalManagerConfig, GoalStack, GoalStackStats};
pub use types::{
    Artifact, ArtifactAction, Blocker, Decision, Goal, GoalCheckpoint, GoalPriority, GoalStatus,
    Subtask, SubtaskStatus,
};
