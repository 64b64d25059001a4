//! Goal-stack state machine.
//!
//! Single logical writer, no internal locking. Per-goal transitions:
//! active<->paused (resume), active->completed, active->abandoned (both
//! terminal), active<->blocked via blocker add/resolve. At most one goal is
//! active at a time; every operation that activates a goal pauses whichever
//! goal was active before it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::types::{
    Artifact, ArtifactAction, Blocker, Decision, Goal, GoalCheckpoint, GoalPriority, GoalStatus,
    Subtask, SubtaskStatus,
};

/// Retention bounds. Host-supplied, read-only after construction.
#[derive(Debug, Clone, Copy)]
pub struct GoalManagerConfig {
    pub max_completed_goals: usize,
    pub max_checkpoints_per_goal: usize,
}

impl Default for GoalManagerConfig {
    fn default() -> Self {
        Self {
            max_completed_goals: 10,
            max_checkpoints_per_goal: 20,
        }
    }
}

/// Partial decision edit. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct DecisionUpdate {
    pub description: Option<String>,
    pub rationale: Option<String>,
    pub alternatives: Option<Vec<String>>,
}

/// Aggregate view of the stack.
#[derive(Debug, Clone, Serialize)]
pub struct GoalStack {
    pub active: Option<Goal>,
    pub paused: Vec<Goal>,
    pub stats: GoalStackStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GoalStackStats {
    pub total: usize,
    pub paused: usize,
    pub completed: usize,
    pub abandoned: usize,
    pub blocked: usize,
}

/// Persisted wire shape.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoalManagerState {
    goals: Vec<Goal>,
    active_goal_id: Option<String>,
}

pub struct GoalManager {
    goals: Vec<Goal>,
    active_goal_id: Option<String>,
    config: GoalManagerConfig,
}

impl Default for GoalManager {
    fn default() -> Self {
        Self::new(GoalManagerConfig::default())
    }
}

impl GoalManager {
    pub fn new(config: GoalManagerConfig) -> Self {
        Self {
            goals: Vec::new(),
            active_goal_id: None,
            config,
        }
    }

    /// Create a goal and make it active. Whatever was active before is
    /// paused. Seed subtasks start as pending.
    pub fn create_goal(
        &mut self,
        description: impl Into<String>,
        priority: GoalPriority,
        subtask_descriptions: Vec<String>,
    ) -> Goal {
        let mut goal = Goal::new(description, priority);
        goal.subtasks = subtask_descriptions.into_iter().map(Subtask::new).collect();

        self.pause_active_except(&goal.id);
        self.active_goal_id = Some(goal.id.clone());
        tracing::info!(goal_id = %goal.id, priority = ?goal.priority, "created goal");
        self.goals.push(goal.clone());
        goal
    }

    /// Terminal. Stamps completion time and effort, clears the active
    /// pointer if it pointed here, and prunes the oldest completed goals
    /// beyond the retention bound.
    pub fn complete_goal(&mut self, id: &str, note: Option<&str>) -> Result<()> {
        let max_completed = self.config.max_completed_goals;
        let goal = self.goal_mut(id)?;
        let now = Utc::now();
        goal.status = GoalStatus::Completed;
        goal.completed_at = Some(now);
        goal.actual_effort = Some((now - goal.created_at).num_seconds());
        if let Some(note) = note {
            goal.checkpoints.push(GoalCheckpoint::new(
                format!("completed: {note}"),
                Value::Null,
                None,
            ));
        }
        tracing::info!(goal_id = %id, "completed goal");

        if self.active_goal_id.as_deref() == Some(id) {
            self.active_goal_id = None;
        }
        self.prune_completed(max_completed);
        Ok(())
    }

    pub fn pause_goal(&mut self, id: &str) -> Result<()> {
        let goal = self.goal_mut(id)?;
        goal.status = GoalStatus::Paused;
        goal.paused_at = Some(Utc::now());
        if self.active_goal_id.as_deref() == Some(id) {
            self.active_goal_id = None;
        }
        Ok(())
    }

    /// Make a paused goal active again, pausing whatever else was active.
    /// A goal with unresolved blockers comes back as blocked instead.
    pub fn resume_goal(&mut self, id: &str) -> Result<()> {
        // Validate first so an unknown id does not pause the current goal.
        let blocked = self.goal(id)?.has_unresolved_blockers();
        self.pause_active_except(id);
        let goal = self.goal_mut(id)?;
        goal.status = if blocked {
            GoalStatus::Blocked
        } else {
            GoalStatus::Active
        };
        self.active_goal_id = Some(id.to_string());
        Ok(())
    }

    /// Terminal. Records the reason as a closing checkpoint.
    pub fn abandon_goal(&mut self, id: &str, reason: &str) -> Result<()> {
        let goal = self.goal_mut(id)?;
        goal.status = GoalStatus::Abandoned;
        goal.checkpoints.push(GoalCheckpoint::new(
            format!("abandoned: {reason}"),
            Value::Null,
            None,
        ));
        tracing::info!(goal_id = %id, reason, "abandoned goal");
        if self.active_goal_id.as_deref() == Some(id) {
            self.active_goal_id = None;
        }
        Ok(())
    }

    pub fn add_subtask(&mut self, goal_id: &str, description: impl Into<String>) -> Result<String> {
        let subtask = Subtask::new(description);
        let id = subtask.id.clone();
        self.goal_mut(goal_id)?.subtasks.push(subtask);
        Ok(id)
    }

    pub fn complete_subtask(&mut self, goal_id: &str, subtask_id: &str) -> Result<()> {
        let subtask = self.subtask_mut(goal_id, subtask_id)?;
        subtask.status = SubtaskStatus::Completed;
        subtask.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn update_subtask_status(
        &mut self,
        goal_id: &str,
        subtask_id: &str,
        status: SubtaskStatus,
    ) -> Result<()> {
        let subtask = self.subtask_mut(goal_id, subtask_id)?;
        subtask.status = status;
        subtask.completed_at = match status {
            SubtaskStatus::Completed => Some(Utc::now()),
            _ => None,
        };
        Ok(())
    }

    pub fn goal_progress(&self, id: &str) -> Result<u8> {
        Ok(self.goal(id)?.progress())
    }

    /// Append a checkpoint, evicting the oldest once the per-goal bound is
    /// reached.
    pub fn create_checkpoint(
        &mut self,
        goal_id: &str,
        description: impl Into<String>,
        state: Value,
        assistant_summary: Option<String>,
    ) -> Result<String> {
        let max = self.config.max_checkpoints_per_goal;
        let goal = self.goal_mut(goal_id)?;
        let checkpoint = GoalCheckpoint::new(description, state, assistant_summary);
        let id = checkpoint.id.clone();
        goal.checkpoints.push(checkpoint);
        if goal.checkpoints.len() > max {
            let excess = goal.checkpoints.len() - max;
            goal.checkpoints.drain(..excess);
        }
        Ok(id)
    }

    pub fn get_checkpoint(&self, goal_id: &str, checkpoint_id: &str) -> Result<&GoalCheckpoint> {
        self.goal(goal_id)?
            .checkpoints
            .iter()
            .find(|c| c.id == checkpoint_id)
            .ok_or_else(|| Error::CheckpointNotFound(checkpoint_id.to_string()))
    }

    pub fn record_decision(
        &mut self,
        goal_id: &str,
        description: impl Into<String>,
        rationale: impl Into<String>,
        alternatives: Vec<String>,
    ) -> Result<String> {
        let decision = Decision {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            rationale: rationale.into(),
            alternatives,
            locked: false,
        };
        let id = decision.id.clone();
        self.goal_mut(goal_id)?.decisions.push(decision);
        Ok(id)
    }

    pub fn lock_decision(&mut self, goal_id: &str, decision_id: &str) -> Result<()> {
        self.decision_mut(goal_id, decision_id)?.locked = true;
        Ok(())
    }

    /// Apply a partial edit. Locked decisions are left untouched without
    /// error; the lock is the record that the choice is final.
    pub fn update_decision(
        &mut self,
        goal_id: &str,
        decision_id: &str,
        update: DecisionUpdate,
    ) -> Result<()> {
        let decision = self.decision_mut(goal_id, decision_id)?;
        if decision.locked {
            tracing::debug!(decision_id, "ignored edit to locked decision");
            return Ok(());
        }
        if let Some(description) = update.description {
            decision.description = description;
        }
        if let Some(rationale) = update.rationale {
            decision.rationale = rationale;
        }
        if let Some(alternatives) = update.alternatives {
            decision.alternatives = alternatives;
        }
        Ok(())
    }

    /// Append-only.
    pub fn record_artifact(
        &mut self,
        goal_id: &str,
        kind: impl Into<String>,
        path: impl Into<String>,
        action: ArtifactAction,
        description: impl Into<String>,
    ) -> Result<String> {
        let artifact = Artifact {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            path: path.into(),
            action,
            description: description.into(),
        };
        let id = artifact.id.clone();
        self.goal_mut(goal_id)?.artifacts.push(artifact);
        Ok(id)
    }

    /// Append a blocker and force the goal to blocked.
    pub fn add_blocker(
        &mut self,
        goal_id: &str,
        description: impl Into<String>,
        kind: impl Into<String>,
    ) -> Result<String> {
        let goal = self.goal_mut(goal_id)?;
        let blocker = Blocker {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            kind: kind.into(),
            resolved_at: None,
            resolution: None,
        };
        let id = blocker.id.clone();
        goal.blockers.push(blocker);
        goal.status = GoalStatus::Blocked;
        tracing::debug!(goal_id, blocker_id = %id, "goal blocked");
        Ok(id)
    }

    /// Stamp a resolution. Once no unresolved blockers remain the goal
    /// returns to active, pausing any other goal that went active in the
    /// meantime.
    pub fn resolve_blocker(
        &mut self,
        goal_id: &str,
        blocker_id: &str,
        resolution: impl Into<String>,
    ) -> Result<()> {
        let unblocked = {
            let goal = self.goal_mut(goal_id)?;
            let blocker = goal
                .blockers
                .iter_mut()
                .find(|b| b.id == blocker_id)
                .ok_or_else(|| Error::BlockerNotFound(blocker_id.to_string()))?;
            blocker.resolved_at = Some(Utc::now());
            blocker.resolution = Some(resolution.into());
            !goal.has_unresolved_blockers()
        };

        if unblocked {
            self.pause_active_except(goal_id);
            self.goal_mut(goal_id)?.status = GoalStatus::Active;
            self.active_goal_id = Some(goal_id.to_string());
            tracing::debug!(goal_id, "goal unblocked");
        }
        Ok(())
    }

    pub fn get_active_goal(&self) -> Option<&Goal> {
        let id = self.active_goal_id.as_deref()?;
        self.goals
            .iter()
            .find(|g| g.id == id && g.status == GoalStatus::Active)
    }

    pub fn get_goal_by_id(&self, id: &str) -> Result<&Goal> {
        self.goal(id)
    }

    pub fn get_completed_goals(&self) -> Vec<&Goal> {
        self.by_status(GoalStatus::Completed)
    }

    pub fn get_paused_goals(&self) -> Vec<&Goal> {
        self.by_status(GoalStatus::Paused)
    }

    pub fn get_goal_stack(&self) -> GoalStack {
        let count = |status| self.by_status(status).len();
        GoalStack {
            active: self.get_active_goal().cloned(),
            paused: self.by_status(GoalStatus::Paused).into_iter().cloned().collect(),
            stats: GoalStackStats {
                total: self.goals.len(),
                paused: count(GoalStatus::Paused),
                completed: count(GoalStatus::Completed),
                abandoned: count(GoalStatus::Abandoned),
                blocked: count(GoalStatus::Blocked),
            },
        }
    }

    /// Serialize all goals plus the active pointer.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&GoalManagerState {
            goals: self.goals.clone(),
            active_goal_id: self.active_goal_id.clone(),
        })?)
    }

    /// Restore a stack persisted with [`GoalManager::to_json`].
    pub fn from_json(json: &str, config: GoalManagerConfig) -> Result<Self> {
        let state: GoalManagerState = serde_json::from_str(json)?;
        Ok(Self {
            goals: state.goals,
            active_goal_id: state.active_goal_id,
            config,
        })
    }

    fn goal(&self, id: &str) -> Result<&Goal> {
        self.goals
            .iter()
            .find(|g| g.id == id)
            .ok_or_else(|| Error::GoalNotFound(id.to_string()))
    }

    fn goal_mut(&mut self, id: &str) -> Result<&mut Goal> {
        self.goals
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| Error::GoalNotFound(id.to_string()))
    }

    fn subtask_mut(&mut self, goal_id: &str, subtask_id: &str) -> Result<&mut Subtask> {
        self.goal_mut(goal_id)?
            .subtasks
            .iter_mut()
            .find(|s| s.id == subtask_id)
            .ok_or_else(|| Error::SubtaskNotFound(subtask_id.to_string()))
    }

    fn decision_mut(&mut self, goal_id: &str, decision_id: &str) -> Result<&mut Decision> {
        self.goal_mut(goal_id)?
            .decisions
            .iter_mut()
            .find(|d| d.id == decision_id)
            .ok_or_else(|| Error::DecisionNotFound(decision_id.to_string()))
    }

    fn by_status(&self, status: GoalStatus) -> Vec<&Goal> {
        self.goals.iter().filter(|g| g.status == status).collect()
    }

    fn pause_active_except(&mut self, keep_id: &str) {
        let now = Utc::now();
        for goal in &mut self.goals {
            if goal.status == GoalStatus::Active && goal.id != keep_id {
                goal.status = GoalStatus::Paused;
                goal.paused_at = Some(now);
            }
        }
    }

    fn prune_completed(&mut self, max_completed: usize) {
        while self
            .goals
            .iter()
            .filter(|g| g.status == GoalStatus::Completed)
            .count()
            > max_completed
        {
            let oldest = self
                .goals
                .iter()
                .enumerate()
                .filter(|(_, g)| g.status == GoalStatus::Completed)
                .min_by_key(|(_, g)| g.completed_at);
            let Some((index, _)) = oldest else {
                break;
            };
            let pruned = self.goals.remove(index);
            tracing::debug!(goal_id = %pruned.id, "pruned completed goal");
        }
    }
}
