//! Server → Client messages

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    HelloAck {
        user_id: String,
    },

    // Matchmaking
    QueueJoined {
        ticket: TicketSummary,
    },
    QueueLeft,
    LobbyPublished {
        entry: LobbyEntry,
    },
    LobbyList {
        entries: Vec<LobbyEntry>,
    },
    Matched {
        session: SessionView,
    },

    // Session
    SessionSnapshot {
        session: SessionView,
    },
    PreferencesRecorded {
        session_id: String,
        user_id: String,
    },
    ConfigAgreed {
        session_id: String,
        config: AgreedConfig,
    },
    PhaseChanged {
        session_id: String,
        phase: Phase,
        remaining_secs: u64,
    },
    MicState {
        session_id: String,
        user_id: String,
        enabled: bool,
        forced: bool,
    },
    SessionEnded {
        session_id: String,
        reason: String,
    },

    // Errors
    Error {
        code: String,
        message: String,
        session_id: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::ServerMessage;
    use crate::types::*;

    #[test]
    fn roundtrip_matched() {
        let msg = ServerMessage::Matched {
            session: SessionView {
                id: "sess-1".to_string(),
                participants: ["ada".to_string(), "grace".to_string()],
                activity: Activity::Study,
                status: SessionStatus::Negotiating,
                phase: None,
                agreed: None,
                created_at: 1_700_000_000,
            },
        };

        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(json.contains("\"type\":\"matched\""));
        let reparsed: ServerMessage = serde_json::from_str(&json).expect("deserialize");
        match reparsed {
            ServerMessage::Matched { session } => {
                assert_eq!(session.id, "sess-1");
                assert!(session.includes("ada"));
                assert!(session.includes("grace"));
                assert!(!session.includes("linus"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn roundtrip_phase_changed() {
        let msg = ServerMessage::PhaseChanged {
            session_id: "sess-2".to_string(),
            phase: Phase::Focus,
            remaining_secs: 1500,
        };

        let json = serde_json::to_string(&msg).expect("serialize");
        let reparsed: ServerMessage = serde_json::from_str(&json).expect("deserialize");
        match reparsed {
            ServerMessage::PhaseChanged {
                session_id,
                phase,
                remaining_secs,
            } => {
                assert_eq!(session_id, "sess-2");
                assert_eq!(phase, Phase::Focus);
                assert_eq!(remaining_secs, 1500);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn client_message_parses_snake_case_tag() {
        let json = r#"{"type":"join_queue","activity":"study","duration_min":25}"#;
        let msg: crate::ClientMessage = serde_json::from_str(json).expect("deserialize");
        match msg {
            crate::ClientMessage::JoinQueue {
                activity,
                duration_min,
            } => {
                assert_eq!(activity, Activity::Study);
                assert_eq!(duration_min, 25);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
