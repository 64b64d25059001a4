//! Goal-stack data model.
//!
//! Wire format uses camelCase keys and ISO-8601 timestamps; chrono's serde
//! support restores them as real date values on deserialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Active,
    Paused,
    Completed,
    Abandoned,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub status: SubtaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Subtask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            status: SubtaskStatus::Pending,
            completed_at: None,
        }
    }
}

/// A recorded choice. Mutable until locked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub id: String,
    pub description: String,
    pub rationale: String,
    pub alternatives: Vec<String>,
    pub locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactAction {
    Created,
    Modified,
    Deleted,
}

/// Append-only record of a file the goal touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    pub action: ArtifactAction,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blocker {
    pub id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl Blocker {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Goal-level milestone marker. Distinct from conversation snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalCheckpoint {
    pub id: String,
    pub description: String,
    pub state: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl GoalCheckpoint {
    pub fn new(
        description: impl Into<String>,
        state: Value,
        assistant_summary: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            state,
            assistant_summary,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub description: String,
    pub priority: GoalPriority,
    pub status: GoalStatus,
    pub subtasks: Vec<Subtask>,
    pub checkpoints: Vec<GoalCheckpoint>,
    pub decisions: Vec<Decision>,
    pub artifacts: Vec<Artifact>,
    pub blockers: Vec<Blocker>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock seconds from creation to completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_effort: Option<i64>,
}

impl Goal {
    pub fn new(description: impl Into<String>, priority: GoalPriority) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            priority,
            status: GoalStatus::Active,
            subtasks: Vec::new(),
            checkpoints: Vec::new(),
            decisions: Vec::new(),
            artifacts: Vec::new(),
            blockers: Vec::new(),
            created_at: Utc::now(),
            paused_at: None,
            completed_at: None,
            actual_effort: None,
        }
    }

    /// Percentage of completed subtasks, rounded. 0 with no subtasks.
    pub fn progress(&self) -> u8 {
        if self.subtasks.is_empty() {
            return 0;
        }
        let completed = self
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Completed)
            .count();
        ((completed as f64 / self.subtasks.len() as f64) * 100.0).round() as u8
    }

    pub fn has_unresolved_blockers(&self) -> bool {
        self.blockers.iter().any(|b| !b.is_resolved())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_rounds_per_subtask_count() {
        let mut goal = Goal::new("ship feature", GoalPriority::Medium);
        assert_eq!(goal.progress(), 0);

        for desc in ["a", "b", "c"] {
            goal.subtasks.push(Subtask::new(desc));
        }
        let expected = [0u8, 33, 67, 100];
        for (done, want) in expected.iter().enumerate() {
            for (i, subtask) in goal.subtasks.iter_mut().enumerate() {
                subtask.status = if i < done {
                    SubtaskStatus::Completed
                } else {
                    SubtaskStatus::Pending
                };
            }
            assert_eq!(goal.progress(), *want, "{done}/3 subtasks");
        }
    }

    #[test]
    fn subtask_status_wire_shape_is_kebab_case() {
        let json = serde_json::to_value(SubtaskStatus::InProgress).unwrap();
        assert_eq!(json, "in-progress");
    }

    #[test]
    fn goal_wire_shape_uses_camel_case_and_iso_dates() {
        let goal = Goal::new("ship feature", GoalPriority::High);
        let json = serde_json::to_value(&goal).unwrap();
        assert_eq!(json["priority"], "high");
        assert_eq!(json["status"], "active");
        assert!(json["createdAt"].as_str().unwrap().contains('T'));
        assert!(json.get("pausedAt").is_none());
    }

    #[test]
    fn blocker_resolution_state() {
        let mut blocker = Blocker {
            id: "b1".into(),
            description: "waiting on review".into(),
            kind: "external".into(),
            resolved_at: None,
            resolution: None,
        };
        assert!(!blocker.is_resolved());
        blocker.resolved_at = Some(Utc::now());
        assert!(blocker.is_resolved());
    }
}
