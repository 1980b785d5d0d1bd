//! Preference negotiation
//!
//! Both participants submit a `PreferenceSet`; the server computes the
//! agreed configuration once with fixed, deterministic merge rules and
//! broadcasts it, so the two sides can never diverge. A 15 second
//! deadline auto-submits randomized preferences for any side that has
//! not acted, so negotiation always terminates.

use rand::Rng;

use deskmate_protocol::{
    AgreedConfig, PreferenceSet, WorkMode, ALLOWED_DURATIONS, MAX_TALK_MIN,
};

/// Seconds a participant has to submit before the auto-submission fires
pub const NEGOTIATION_TIMEOUT_SECS: u64 = 15;

/// Mode used when the two sides disagree
pub const DEFAULT_WORK_MODE: WorkMode = WorkMode::Silent;

/// Merge two submitted preference sets into the agreed configuration.
///
/// Duration is the minimum of the two sides, talk minutes are the
/// rounded-up average, and the mode is the common value when both sides
/// agree, otherwise the fixed default.
pub fn merge(a: &PreferenceSet, b: &PreferenceSet) -> AgreedConfig {
    AgreedConfig {
        work_mode: if a.work_mode == b.work_mode {
            a.work_mode
        } else {
            DEFAULT_WORK_MODE
        },
        duration_min: a.duration_min.min(b.duration_min),
        pre_talk_min: ceil_avg(a.pre_talk_min, b.pre_talk_min),
        post_talk_min: ceil_avg(a.post_talk_min, b.post_talk_min),
    }
}

fn ceil_avg(x: u32, y: u32) -> u32 {
    (x + y).div_ceil(2)
}

/// Reject out-of-range submissions before they reach the merge.
pub fn validate(prefs: &PreferenceSet) -> Result<(), &'static str> {
    if !deskmate_protocol::is_allowed_duration(prefs.duration_min) {
        return Err("duration_min must be one of 25, 30, 45, 50, 60");
    }
    if prefs.pre_talk_min > MAX_TALK_MIN || prefs.post_talk_min > MAX_TALK_MIN {
        return Err("talk minutes must be 15 or less");
    }
    Ok(())
}

/// Randomized submission used when the negotiation deadline expires.
pub fn random_preferences<R: Rng>(rng: &mut R) -> PreferenceSet {
    let duration_min = ALLOWED_DURATIONS[rng.gen_range(0..ALLOWED_DURATIONS.len())];
    let work_mode = if rng.gen_bool(0.5) {
        WorkMode::Silent
    } else {
        WorkMode::Casual
    };
    PreferenceSet {
        work_mode,
        duration_min,
        pre_talk_min: rng.gen_range(1..=5),
        post_talk_min: rng.gen_range(1..=5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs(mode: WorkMode, duration: u32, pre: u32, post: u32) -> PreferenceSet {
        PreferenceSet {
            work_mode: mode,
            duration_min: duration,
            pre_talk_min: pre,
            post_talk_min: post,
        }
    }

    #[test]
    fn talk_minutes_are_rounded_up_averages() {
        let a = prefs(WorkMode::Silent, 25, 5, 5);
        let b = prefs(WorkMode::Silent, 25, 3, 7);
        let agreed = merge(&a, &b);
        assert_eq!(agreed.pre_talk_min, 4);
        assert_eq!(agreed.post_talk_min, 6);
    }

    #[test]
    fn odd_sum_rounds_up() {
        let a = prefs(WorkMode::Silent, 25, 2, 0);
        let b = prefs(WorkMode::Silent, 25, 3, 1);
        let agreed = merge(&a, &b);
        assert_eq!(agreed.pre_talk_min, 3); // ceil(2.5)
        assert_eq!(agreed.post_talk_min, 1); // ceil(0.5)
    }

    #[test]
    fn duration_is_the_minimum() {
        let a = prefs(WorkMode::Silent, 30, 5, 5);
        let b = prefs(WorkMode::Silent, 60, 5, 5);
        assert_eq!(merge(&a, &b).duration_min, 30);
        assert_eq!(merge(&b, &a).duration_min, 30);
    }

    #[test]
    fn matching_modes_are_kept() {
        let a = prefs(WorkMode::Casual, 25, 5, 5);
        let b = prefs(WorkMode::Casual, 25, 5, 5);
        assert_eq!(merge(&a, &b).work_mode, WorkMode::Casual);
    }

    #[test]
    fn conflicting_modes_fall_back_to_default() {
        let a = prefs(WorkMode::Casual, 25, 5, 5);
        let b = prefs(WorkMode::Silent, 25, 5, 5);
        assert_eq!(merge(&a, &b).work_mode, DEFAULT_WORK_MODE);
    }

    #[test]
    fn merge_is_symmetric() {
        let a = prefs(WorkMode::Casual, 45, 2, 9);
        let b = prefs(WorkMode::Silent, 30, 7, 4);
        assert_eq!(merge(&a, &b), merge(&b, &a));
    }

    #[test]
    fn validation_bounds() {
        assert!(validate(&prefs(WorkMode::Silent, 25, 0, 15)).is_ok());
        assert!(validate(&prefs(WorkMode::Silent, 26, 5, 5)).is_err());
        assert!(validate(&prefs(WorkMode::Silent, 25, 16, 5)).is_err());
        assert!(validate(&prefs(WorkMode::Silent, 25, 5, 16)).is_err());
    }

    #[test]
    fn random_preferences_are_valid() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let p = random_preferences(&mut rng);
            assert!(validate(&p).is_ok());
        }
    }

    #[test]
    fn two_auto_submissions_still_merge() {
        let mut rng = rand::thread_rng();
        let a = random_preferences(&mut rng);
        let b = random_preferences(&mut rng);
        let agreed = merge(&a, &b);
        assert!(deskmate_protocol::is_allowed_duration(agreed.duration_min));
        assert!(agreed.pre_talk_min >= 1 && agreed.pre_talk_min <= 5);
    }
}
