//! DAG run control-state machine (`spec.md` §4.3).
//!
//! A running DAG is driven by an explicit command queue rather than a
//! free-running loop, the same "status plus valid transition table" shape
//! the teacher uses for `TaskStatus` (`domain/models/task.rs`), generalized
//! from a single task's lifecycle to a whole DAG run's.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    Idle,
    Running,
    AwaitingHil,
    AwaitingAil,
    Paused,
    Aborting,
    Completed,
    Failed,
}

impl Default for ControlState {
    fn default() -> Self {
        Self::Idle
    }
}

impl ControlState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::AwaitingHil => "awaiting_hil",
            Self::AwaitingAil => "awaiting_ail",
            Self::Paused => "paused",
            Self::Aborting => "aborting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether control should currently rest with the caller (a human or
    /// agent must act before execution resumes).
    #[must_use]
    pub fn is_awaiting_external_input(&self) -> bool {
        matches!(self, Self::AwaitingHil | Self::AwaitingAil | Self::Paused)
    }

    /// States this state may transition to directly (`spec.md` §4.3).
    #[must_use]
    pub fn valid_transitions(&self) -> &'static [ControlState] {
        match self {
            Self::Idle => &[Self::Running, Self::Aborting],
            Self::Running => &[
                Self::AwaitingHil,
                Self::AwaitingAil,
                Self::Paused,
                Self::Aborting,
                Self::Completed,
                Self::Failed,
            ],
            Self::AwaitingHil => &[Self::Running, Self::Aborting],
            Self::AwaitingAil => &[Self::Running, Self::Aborting],
            Self::Paused => &[Self::Running, Self::Aborting],
            Self::Aborting => &[Self::Failed, Self::Completed],
            Self::Completed | Self::Failed => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(&self, next: ControlState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// A command accepted into the run's control queue, driving the
/// coroutine-style state machine (`spec.md` §9 "explicit command queue").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlCommand {
    Continue,
    Abort,
    Pause,
    Resume,
    ApprovalResponse { task_id: uuid::Uuid, approved: bool },
    Replan { replacement_tasks: Vec<super::dag::Task> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_cannot_jump_directly_to_completed() {
        assert!(!ControlState::Idle.can_transition_to(ControlState::Completed));
    }

    #[test]
    fn running_can_pause_and_resume() {
        assert!(ControlState::Running.can_transition_to(ControlState::Paused));
        assert!(ControlState::Paused.can_transition_to(ControlState::Running));
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        assert!(ControlState::Completed.valid_transitions().is_empty());
        assert!(ControlState::Failed.valid_transitions().is_empty());
        assert!(ControlState::Completed.is_terminal());
    }

    #[test]
    fn awaiting_states_are_reported_as_awaiting_external_input() {
        assert!(ControlState::AwaitingHil.is_awaiting_external_input());
        assert!(ControlState::AwaitingAil.is_awaiting_external_input());
        assert!(!ControlState::Running.is_awaiting_external_input());
    }
}
