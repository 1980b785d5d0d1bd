//! Client → Server messages

use serde::{Deserialize, Serialize};

use crate::types::{Activity, PreferenceSet};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identify this connection. Must be the first message.
    Hello {
        user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },

    // Matchmaking
    JoinQueue {
        activity: Activity,
        duration_min: u32,
    },
    LeaveQueue,
    ListLobby,

    // Session
    SubscribeSession {
        session_id: String,
    },
    SubmitPreferences {
        session_id: String,
        preferences: PreferenceSet,
    },
    SetMicPreference {
        session_id: String,
        enabled: bool,
    },
    LeaveSession {
        session_id: String,
    },
}
