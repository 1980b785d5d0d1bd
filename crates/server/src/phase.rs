//! Pure phase state machine
//!
//! A live session advances icebreaker → focus → debrief → completed.
//! The server owns the clock: one tick per second per session, no
//! client-local timers. All logic here is synchronous and unit-testable;
//! the driver task in `session.rs` turns phase changes into broadcasts.

use deskmate_protocol::{AgreedConfig, Phase};

/// Interval of the server-side session clock
pub const PHASE_TICK_SECS: u64 = 1;

/// Per-phase duration when the server runs with `--quick-phases`
pub const QUICK_PHASE_SECS: u64 = 10;

/// Durations for each phase of one session, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePlan {
    pub icebreaker_secs: u64,
    pub focus_secs: u64,
    pub debrief_secs: u64,
}

impl PhasePlan {
    /// Derive the plan from the negotiated configuration.
    pub fn from_config(config: &AgreedConfig) -> Self {
        Self {
            icebreaker_secs: u64::from(config.pre_talk_min) * 60,
            focus_secs: u64::from(config.duration_min) * 60,
            debrief_secs: u64::from(config.post_talk_min) * 60,
        }
    }

    /// Short fixed phases for manual testing.
    pub fn quick() -> Self {
        Self {
            icebreaker_secs: QUICK_PHASE_SECS,
            focus_secs: QUICK_PHASE_SECS,
            debrief_secs: QUICK_PHASE_SECS,
        }
    }

    fn duration_of(&self, phase: Phase) -> u64 {
        match phase {
            Phase::Icebreaker => self.icebreaker_secs,
            Phase::Focus => self.focus_secs,
            Phase::Debrief => self.debrief_secs,
            Phase::Completed => 0,
        }
    }
}

/// The phase that follows `phase`, or `None` once completed.
pub fn next_phase(phase: Phase) -> Option<Phase> {
    match phase {
        Phase::Icebreaker => Some(Phase::Focus),
        Phase::Focus => Some(Phase::Debrief),
        Phase::Debrief => Some(Phase::Completed),
        Phase::Completed => None,
    }
}

/// Effective microphone state for a participant.
///
/// The focus phase forces the mic off regardless of the stored
/// preference; every other phase follows the preference.
pub fn effective_mic(phase: Phase, preference: bool) -> bool {
    match phase {
        Phase::Focus => false,
        _ => preference,
    }
}

/// Countdown state for one session's phase progression
#[derive(Debug, Clone)]
pub struct PhaseTimer {
    plan: PhasePlan,
    phase: Phase,
    remaining_secs: u64,
}

impl PhaseTimer {
    /// Start at the first phase with a nonzero duration.
    pub fn new(plan: PhasePlan) -> Self {
        let mut timer = Self {
            plan,
            phase: Phase::Icebreaker,
            remaining_secs: plan.icebreaker_secs,
        };
        timer.skip_empty();
        timer
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    /// Advance the clock by one second. Returns the new phase if the
    /// tick crossed a phase boundary.
    pub fn tick(&mut self) -> Option<Phase> {
        if self.phase == Phase::Completed {
            return None;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs > 0 {
            return None;
        }
        self.advance();
        Some(self.phase)
    }

    fn advance(&mut self) {
        if let Some(next) = next_phase(self.phase) {
            self.phase = next;
            self.remaining_secs = self.plan.duration_of(next);
            self.skip_empty();
        }
    }

    /// Zero-duration phases are entered and left in the same instant.
    fn skip_empty(&mut self) {
        while self.phase != Phase::Completed && self.remaining_secs == 0 {
            if let Some(next) = next_phase(self.phase) {
                self.phase = next;
                self.remaining_secs = self.plan.duration_of(next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskmate_protocol::WorkMode;

    fn config(duration: u32, pre: u32, post: u32) -> AgreedConfig {
        AgreedConfig {
            work_mode: WorkMode::Silent,
            duration_min: duration,
            pre_talk_min: pre,
            post_talk_min: post,
        }
    }

    /// Run the timer to completion, recording each phase boundary.
    fn drain(timer: &mut PhaseTimer, max_ticks: u64) -> Vec<Phase> {
        let mut changes = Vec::new();
        for _ in 0..max_ticks {
            if let Some(phase) = timer.tick() {
                changes.push(phase);
            }
            if timer.is_completed() {
                break;
            }
        }
        changes
    }

    #[test]
    fn plan_follows_agreed_config() {
        let plan = PhasePlan::from_config(&config(30, 4, 6));
        assert_eq!(plan.icebreaker_secs, 240);
        assert_eq!(plan.focus_secs, 1800);
        assert_eq!(plan.debrief_secs, 360);
    }

    #[test]
    fn phases_advance_in_fixed_order() {
        let mut timer = PhaseTimer::new(PhasePlan {
            icebreaker_secs: 2,
            focus_secs: 3,
            debrief_secs: 1,
        });
        assert_eq!(timer.phase(), Phase::Icebreaker);
        assert_eq!(timer.remaining_secs(), 2);

        let changes = drain(&mut timer, 10);
        assert_eq!(changes, vec![Phase::Focus, Phase::Debrief, Phase::Completed]);
        assert!(timer.is_completed());
    }

    #[test]
    fn tick_within_a_phase_reports_no_change() {
        let mut timer = PhaseTimer::new(PhasePlan::quick());
        assert_eq!(timer.tick(), None);
        assert_eq!(timer.phase(), Phase::Icebreaker);
        assert_eq!(timer.remaining_secs(), QUICK_PHASE_SECS - 1);
    }

    #[test]
    fn zero_duration_icebreaker_starts_in_focus() {
        let mut timer = PhaseTimer::new(PhasePlan {
            icebreaker_secs: 0,
            focus_secs: 2,
            debrief_secs: 0,
        });
        assert_eq!(timer.phase(), Phase::Focus);

        let changes = drain(&mut timer, 5);
        // Debrief is empty, so focus ends straight into completed.
        assert_eq!(changes, vec![Phase::Completed]);
    }

    #[test]
    fn all_zero_plan_is_completed_immediately() {
        let timer = PhaseTimer::new(PhasePlan {
            icebreaker_secs: 0,
            focus_secs: 0,
            debrief_secs: 0,
        });
        assert!(timer.is_completed());
    }

    #[test]
    fn ticking_a_completed_timer_is_a_no_op() {
        let mut timer = PhaseTimer::new(PhasePlan {
            icebreaker_secs: 0,
            focus_secs: 0,
            debrief_secs: 0,
        });
        assert_eq!(timer.tick(), None);
        assert_eq!(timer.phase(), Phase::Completed);
    }

    #[test]
    fn focus_forces_mic_off_and_restores_after() {
        assert!(effective_mic(Phase::Icebreaker, true));
        assert!(!effective_mic(Phase::Icebreaker, false));
        // Forced off during focus regardless of preference
        assert!(!effective_mic(Phase::Focus, true));
        assert!(!effective_mic(Phase::Focus, false));
        // Preference restored afterwards
        assert!(effective_mic(Phase::Debrief, true));
        assert!(!effective_mic(Phase::Debrief, false));
    }
}
