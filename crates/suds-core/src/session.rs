use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Upper bound on any configured duration, in seconds.
pub const MAX_SESSION_SECONDS: u32 = 3600;
/// Duration used when a create request carries none (or an invalid one).
pub const DEFAULT_SESSION_SECONDS: u32 = 600;
/// Upper bound on the number of steps a session may carry.
pub const MAX_STEPS: usize = 16;

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Waiting,
    Ready,
    Running,
    Paused,
    Finished,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Waiting => "waiting",
            Phase::Ready => "ready",
            Phase::Running => "running",
            Phase::Paused => "paused",
            Phase::Finished => "finished",
        }
    }

    /// True while the countdown is meaningful (running or frozen mid-run).
    pub fn is_live(&self) -> bool {
        matches!(self, Phase::Running | Phase::Paused)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timed segment of a session. Inactive steps are skipped entirely:
/// they contribute nothing to totals and are never transitioned into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub label: String,
    #[serde(rename = "duration")]
    pub duration_seconds: u32,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Step {
    pub fn new(id: &str, label: &str, duration_seconds: u32) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            duration_seconds,
            active: true,
            icon: None,
            color: None,
        }
    }

    fn themed(id: &str, label: &str, duration_seconds: u32, color: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            duration_seconds,
            active: true,
            icon: Some(id.to_string()),
            color: Some(color.to_string()),
        }
    }
}

/// The stock four-step plan.
pub fn default_plan() -> Vec<Step> {
    vec![
        Step::themed("rinse", "Rinse", 90, "#0EA5E9"),
        Step::themed("shampoo", "Shampoo", 150, "#8B5CF6"),
        Step::themed("soap", "Soap", 210, "#F43F5E"),
        Step::themed("final", "Final rinse", 150, "#10B981"),
    ]
}

/// Distribute a total across the stock plan: 15% rinse, 25% shampoo,
/// 35% soap, remainder final rinse. Each share is at least one second
/// and the remainder absorbs rounding, so the plan always sums to
/// exactly `total_seconds`.
pub fn plan_for_total(total_seconds: u32) -> Vec<Step> {
    if total_seconds < 4 {
        // Too short to split four ways.
        return vec![Step::themed(
            "rinse",
            "Rinse",
            total_seconds.max(1),
            "#0EA5E9",
        )];
    }
    let rinse = (total_seconds * 15 / 100).max(1);
    let shampoo = (total_seconds * 25 / 100).max(1);
    let soap = (total_seconds * 35 / 100).max(1);
    let last = total_seconds - rinse - shampoo - soap;
    vec![
        Step::themed("rinse", "Rinse", rinse, "#0EA5E9"),
        Step::themed("shampoo", "Shampoo", shampoo, "#8B5CF6"),
        Step::themed("soap", "Soap", soap, "#F43F5E"),
        Step::themed("final", "Final rinse", last, "#10B981"),
    ]
}

/// The shared session row. Wire field names match the stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    #[serde(rename = "session_code")]
    pub code: String,
    #[serde(rename = "state")]
    pub phase: Phase,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(rename = "current_step_index")]
    pub active_step_index: u32,
    #[serde(rename = "time_remaining")]
    pub time_remaining_seconds: u32,
    #[serde(rename = "total_duration")]
    pub total_duration_seconds: u32,
    #[serde(rename = "last_update", default)]
    pub last_update_ms: u64,
    pub created_at: u64,
}

impl Session {
    pub fn new(code: String, total_duration_seconds: u32) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        Self {
            id: Uuid::new_v4(),
            code,
            phase: Phase::Setup,
            steps: Vec::new(),
            active_step_index: 0,
            time_remaining_seconds: total_duration_seconds,
            total_duration_seconds,
            last_update_ms: now_millis(),
            created_at,
        }
    }

    pub fn active_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.active)
    }

    pub fn active_step_count(&self) -> u32 {
        self.active_steps().count() as u32
    }

    /// The `index`-th step counting active steps only.
    pub fn nth_active(&self, index: u32) -> Option<&Step> {
        self.active_steps().nth(index as usize)
    }

    pub fn active_total_duration(&self) -> u32 {
        self.active_steps().map(|s| s.duration_seconds).sum()
    }

    /// Advance the update marker. Strictly increasing even when the clock
    /// stands still or steps backwards, so consumers can order events.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_update_ms = now_ms.max(self.last_update_ms + 1);
    }

    pub fn is_expired(&self, now_secs: u64, ttl_seconds: u64) -> bool {
        now_secs.saturating_sub(self.created_at) > ttl_seconds
    }
}

/// Milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportional_plan_sums_to_total() {
        for total in [4, 5, 7, 60, 300, 600, 601, 3599, 3600] {
            let plan = plan_for_total(total);
            let sum: u32 = plan.iter().map(|s| s.duration_seconds).sum();
            assert_eq!(sum, total, "plan for {total} must sum exactly");
            assert!(plan.iter().all(|s| s.duration_seconds >= 1));
        }
    }

    #[test]
    fn tiny_totals_collapse_to_one_step() {
        let plan = plan_for_total(3);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].duration_seconds, 3);
    }

    #[test]
    fn default_plan_is_ten_minutes() {
        let plan = default_plan();
        assert_eq!(plan.len(), 4);
        assert!(plan.iter().all(|s| s.active));
        let sum: u32 = plan.iter().map(|s| s.duration_seconds).sum();
        assert_eq!(sum, 600);
    }

    #[test]
    fn inactive_steps_are_skipped() {
        let mut session = Session::new("WXYZ".into(), 600);
        session.steps = default_plan();
        session.steps[1].active = false;

        assert_eq!(session.active_step_count(), 3);
        assert_eq!(session.active_total_duration(), 450);
        assert_eq!(session.nth_active(1).map(|s| s.id.as_str()), Some("soap"));
        assert!(session.nth_active(3).is_none());
    }

    #[test]
    fn touch_is_strictly_increasing() {
        let mut session = Session::new("WXYZ".into(), 600);
        let first = session.last_update_ms;

        // Stalled clock still advances the marker.
        session.touch(first);
        assert!(session.last_update_ms > first);

        // Backwards clock too.
        let second = session.last_update_ms;
        session.touch(first.saturating_sub(5000));
        assert!(session.last_update_ms > second);
    }

    #[test]
    fn row_round_trips_with_wire_names() {
        let mut session = Session::new("AB23".into(), 300);
        session.steps = plan_for_total(300);

        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("session_code").is_some());
        assert!(json.get("state").is_some());
        assert!(json.get("current_step_index").is_some());
        assert!(json.get("time_remaining").is_some());
        assert!(json.get("total_duration").is_some());
        assert!(json.get("last_update").is_some());

        let back: Session = serde_json::from_value(json).unwrap();
        assert_eq!(back, session);
    }
}
