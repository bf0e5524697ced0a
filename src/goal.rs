use serde::{Deserialize, Serialize};

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalKind {
    /// Target in kilometers
    Distance,
    /// Target in minutes of tracking time
    Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub kind: GoalKind,
    pub target: f64,
}

impl Goal {
    pub fn distance_km(target: f64) -> Self {
        Goal {
            kind: GoalKind::Distance,
            target,
        }
    }

    pub fn duration_min(target: f64) -> Self {
        Goal {
            kind: GoalKind::Duration,
            target,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self.kind {
            GoalKind::Distance => "km",
            GoalKind::Duration => "min",
        }
    }
}

/// Raised once per session when the goal is first reached
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalAchievement {
    pub goal: Goal,
    /// Progress value that crossed the target, in the goal's unit
    pub value: f64,
    pub timestamp_ms: i64,
}

/// Current progress toward the session goal in the goal's own unit
pub fn progress_value(goal: &Goal, session: &Session, now_ms: i64) -> f64 {
    match goal.kind {
        GoalKind::Distance => session.total_distance_m / 1000.0,
        GoalKind::Duration => {
            let elapsed =
                (now_ms - session.start_timestamp_ms - session.closed_paused_ms()).max(0);
            elapsed as f64 / 60_000.0
        }
    }
}

/// Check the goal after an accepted sample
///
/// Only evaluates while tracking and before the goal is achieved; flips
/// `goal_achieved` at most once and never resets it.
pub fn evaluate(session: &mut Session, now_ms: i64) -> Option<GoalAchievement> {
    if session.goal_achieved || !session.is_tracking() {
        return None;
    }
    let goal = session.goal?;

    let value = progress_value(&goal, session, now_ms);
    if value >= goal.target {
        session.goal_achieved = true;
        log::info!(
            "Goal reached for {}: {:.2} {} (target {:.2})",
            session.id,
            value,
            goal.unit(),
            goal.target
        );
        Some(GoalAchievement {
            goal,
            value,
            timestamp_ms: now_ms,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(goal: Goal) -> Session {
        let mut session = Session::new(0, Some(goal));
        session.start(0).unwrap();
        session
    }

    #[test]
    fn test_distance_goal_fires_once() {
        let mut session = session_with(Goal::distance_km(5.0));
        session.total_distance_m = 4_990.0;
        assert!(evaluate(&mut session, 1_000).is_none());

        session.total_distance_m = 5_020.0;
        let achieved = evaluate(&mut session, 2_000).expect("goal should fire");
        assert!((achieved.value - 5.02).abs() < 1e-9);
        assert!(session.goal_achieved);

        session.total_distance_m = 6_000.0;
        assert!(evaluate(&mut session, 3_000).is_none());
        assert!(session.goal_achieved);
    }

    #[test]
    fn test_duration_goal_excludes_closed_pauses() {
        let mut session = session_with(Goal::duration_min(10.0));
        session.pause(5 * 60_000).unwrap();
        session.resume(8 * 60_000).unwrap();

        // 12 minutes of wall time, 3 of them paused
        assert!(evaluate(&mut session, 12 * 60_000).is_none());
        let achieved = evaluate(&mut session, 13 * 60_000).unwrap();
        assert!((achieved.value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_not_evaluated_while_paused_or_without_goal() {
        let mut session = session_with(Goal::distance_km(1.0));
        session.total_distance_m = 2_000.0;
        session.pause(10).unwrap();
        assert!(evaluate(&mut session, 20).is_none());
        assert!(!session.goal_achieved);

        let mut no_goal = Session::new(0, None);
        no_goal.start(0).unwrap();
        no_goal.total_distance_m = 1e6;
        assert!(evaluate(&mut no_goal, 10).is_none());
    }
}
