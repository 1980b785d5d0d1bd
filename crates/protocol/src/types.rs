//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// What a user wants to do during the focus block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Study,
    Work,
    Reading,
    Writing,
}

impl Activity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::Study => "study",
            Activity::Work => "work",
            Activity::Reading => "reading",
            Activity::Writing => "writing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "study" => Some(Activity::Study),
            "work" => Some(Activity::Work),
            "reading" => Some(Activity::Reading),
            "writing" => Some(Activity::Writing),
            _ => None,
        }
    }
}

/// How the pair works together once the focus phase starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkMode {
    Silent,
    Casual,
}

impl WorkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkMode::Silent => "silent",
            WorkMode::Casual => "casual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "silent" => Some(WorkMode::Silent),
            "casual" => Some(WorkMode::Casual),
            _ => None,
        }
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Negotiating,
    Live,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Negotiating => "negotiating",
            SessionStatus::Live => "live",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "negotiating" => Some(SessionStatus::Negotiating),
            "live" => Some(SessionStatus::Live),
            "completed" => Some(SessionStatus::Completed),
            "abandoned" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, SessionStatus::Negotiating | SessionStatus::Live)
    }
}

/// One stage of a live session's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Icebreaker,
    Focus,
    Debrief,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Icebreaker => "icebreaker",
            Phase::Focus => "focus",
            Phase::Debrief => "debrief",
            Phase::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "icebreaker" => Some(Phase::Icebreaker),
            "focus" => Some(Phase::Focus),
            "debrief" => Some(Phase::Debrief),
            "completed" => Some(Phase::Completed),
            _ => None,
        }
    }
}

/// One user's request to be matched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketSummary {
    pub user_id: String,
    pub activity: Activity,
    pub duration_min: u32,
    /// Unix seconds
    pub created_at: i64,
}

/// A lobby listing for users browsing for a partner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyEntry {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub activity: Activity,
    pub duration_min: u32,
    /// Unix seconds
    pub published_at: i64,
}

/// One participant's session preferences, submitted during negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceSet {
    pub work_mode: WorkMode,
    pub duration_min: u32,
    pub pre_talk_min: u32,
    pub post_talk_min: u32,
}

/// The configuration both sides run with once negotiation completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreedConfig {
    pub work_mode: WorkMode,
    pub duration_min: u32,
    pub pre_talk_min: u32,
    pub post_talk_min: u32,
}

/// Session view sent to clients and the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub participants: [String; 2],
    pub activity: Activity,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agreed: Option<AgreedConfig>,
    /// Unix seconds
    pub created_at: i64,
}

impl SessionView {
    pub fn includes(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

/// Focus durations the queue accepts, in minutes
pub const ALLOWED_DURATIONS: [u32; 5] = [25, 30, 45, 50, 60];

/// Upper bound for pre/post talk preferences, in minutes
pub const MAX_TALK_MIN: u32 = 15;

/// Validate a queue/negotiation duration
pub fn is_allowed_duration(duration_min: u32) -> bool {
    ALLOWED_DURATIONS.contains(&duration_min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trips_through_strings() {
        for activity in [
            Activity::Study,
            Activity::Work,
            Activity::Reading,
            Activity::Writing,
        ] {
            assert_eq!(Activity::parse(activity.as_str()), Some(activity));
        }
        for phase in [
            Phase::Icebreaker,
            Phase::Focus,
            Phase::Debrief,
            Phase::Completed,
        ] {
            assert_eq!(Phase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(Activity::parse("napping"), None);
    }

    #[test]
    fn open_statuses() {
        assert!(SessionStatus::Negotiating.is_open());
        assert!(SessionStatus::Live.is_open());
        assert!(!SessionStatus::Completed.is_open());
        assert!(!SessionStatus::Abandoned.is_open());
    }

    #[test]
    fn duration_validation() {
        assert!(is_allowed_duration(25));
        assert!(is_allowed_duration(60));
        assert!(!is_allowed_duration(0));
        assert!(!is_allowed_duration(90));
    }
}
