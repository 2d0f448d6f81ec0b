use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{Phase, Session, Step, MAX_SESSION_SECONDS, MAX_STEPS};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch carries no fields")]
    Empty,
    #[error("step index {0} out of range")]
    IndexOutOfRange(u32),
    #[error("time remaining {0} exceeds {MAX_SESSION_SECONDS}")]
    TimeOutOfRange(u32),
    #[error("total duration {0} outside 1..={MAX_SESSION_SECONDS}")]
    TotalOutOfRange(u32),
    #[error("too many steps ({0}, limit {MAX_STEPS})")]
    TooManySteps(usize),
    #[error("step {0:?} has zero duration")]
    ZeroStepDuration(String),
    #[error("step {0:?} duration exceeds {MAX_SESSION_SECONDS}")]
    StepTooLong(String),
}

/// Partial update to a session row. Only these fields may be written from
/// a device; anything else in the body fails deserialization outright.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionPatch {
    #[serde(rename = "state", skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(rename = "current_step_index", skip_serializing_if = "Option::is_none")]
    pub active_step_index: Option<u32>,
    #[serde(rename = "time_remaining", skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<u32>,
    #[serde(rename = "total_duration", skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,
}

impl SessionPatch {
    pub fn phase_change(phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            ..Self::default()
        }
    }

    /// Phase plus progression fields, written together at step boundaries.
    pub fn progression(phase: Phase, active_step_index: u32, time_remaining: u32) -> Self {
        Self {
            phase: Some(phase),
            active_step_index: Some(active_step_index),
            time_remaining: Some(time_remaining),
            ..Self::default()
        }
    }

    /// Bounded-cadence time checkpoint.
    pub fn checkpoint(time_remaining: u32) -> Self {
        Self {
            time_remaining: Some(time_remaining),
            ..Self::default()
        }
    }

    /// Wholesale step replacement with the recomputed totals.
    pub fn configuration(steps: Vec<Step>, total_duration: u32, time_remaining: u32) -> Self {
        Self {
            steps: Some(steps),
            total_duration: Some(total_duration),
            time_remaining: Some(time_remaining),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.phase.is_none()
            && self.active_step_index.is_none()
            && self.time_remaining.is_none()
            && self.total_duration.is_none()
            && self.steps.is_none()
    }

    /// All-or-nothing range validation. A patch that fails here must leave
    /// the stored row untouched.
    pub fn validate(&self) -> Result<(), PatchError> {
        if self.is_empty() {
            return Err(PatchError::Empty);
        }
        if let Some(index) = self.active_step_index {
            if index as usize >= MAX_STEPS {
                return Err(PatchError::IndexOutOfRange(index));
            }
        }
        if let Some(time) = self.time_remaining {
            if time > MAX_SESSION_SECONDS {
                return Err(PatchError::TimeOutOfRange(time));
            }
        }
        if let Some(total) = self.total_duration {
            if total == 0 || total > MAX_SESSION_SECONDS {
                return Err(PatchError::TotalOutOfRange(total));
            }
        }
        if let Some(steps) = &self.steps {
            if steps.len() > MAX_STEPS {
                return Err(PatchError::TooManySteps(steps.len()));
            }
            for step in steps {
                if step.duration_seconds == 0 {
                    return Err(PatchError::ZeroStepDuration(step.id.clone()));
                }
                if step.duration_seconds > MAX_SESSION_SECONDS {
                    return Err(PatchError::StepTooLong(step.id.clone()));
                }
            }
        }
        Ok(())
    }

    /// Apply onto a row. Replacing `steps` recomputes the total from the
    /// active entries, overriding any total carried alongside.
    pub fn apply_to(&self, session: &mut Session) {
        if let Some(phase) = self.phase {
            session.phase = phase;
        }
        if let Some(index) = self.active_step_index {
            session.active_step_index = index;
        }
        if let Some(time) = self.time_remaining {
            session.time_remaining_seconds = time;
        }
        if let Some(total) = self.total_duration {
            session.total_duration_seconds = total;
        }
        if let Some(steps) = &self.steps {
            session.steps = steps.clone();
            session.total_duration_seconds = session.active_total_duration();
        }
    }
}
