//! Shared application state

use std::collections::HashMap;
use std::sync::Arc;

use deskmate_protocol::ServerMessage;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::session::SessionHandle;
use crate::store::Store;

pub type SharedState = Arc<Mutex<AppState>>;

/// Everything the server tracks in memory: connected users, live
/// session handles, and running matcher tasks. The persistent side
/// (tickets, lobby, session records) lives in the store.
pub struct AppState {
    pub store: Store,
    pub quick_phases: bool,

    /// user id → outbound channel of the user's WebSocket connection
    connections: HashMap<String, mpsc::Sender<ServerMessage>>,

    /// Live sessions by id
    sessions: HashMap<String, SessionHandle>,

    /// Matchmaking poll loops by user id
    matchers: HashMap<String, JoinHandle<()>>,
}

impl AppState {
    pub fn new(store: Store, quick_phases: bool) -> Self {
        Self {
            store,
            quick_phases,
            connections: HashMap::new(),
            sessions: HashMap::new(),
            matchers: HashMap::new(),
        }
    }

    // -- Connections --------------------------------------------------

    /// Register a connection for a user, replacing any previous one.
    pub fn register_connection(&mut self, user_id: &str, tx: mpsc::Sender<ServerMessage>) {
        self.connections.insert(user_id.to_string(), tx);
    }

    /// Remove a user's connection, but only if it is the given channel —
    /// a reconnect may already have replaced it.
    pub fn unregister_connection(&mut self, user_id: &str, tx: &mpsc::Sender<ServerMessage>) {
        if let Some(current) = self.connections.get(user_id) {
            if current.same_channel(tx) {
                self.connections.remove(user_id);
            }
        }
    }

    pub fn connection(&self, user_id: &str) -> Option<mpsc::Sender<ServerMessage>> {
        self.connections.get(user_id).cloned()
    }

    /// Send to a user's connection if they are online.
    pub async fn send_to_user(&self, user_id: &str, msg: ServerMessage) {
        if let Some(tx) = self.connections.get(user_id) {
            let _ = tx.send(msg).await;
        }
    }

    // -- Sessions -----------------------------------------------------

    pub fn session(&self, id: &str) -> Option<&SessionHandle> {
        self.sessions.get(id)
    }

    pub fn session_mut(&mut self, id: &str) -> Option<&mut SessionHandle> {
        self.sessions.get_mut(id)
    }

    pub fn has_session(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn insert_session(&mut self, handle: SessionHandle) {
        self.sessions.insert(handle.id().to_string(), handle);
    }

    pub fn remove_session(&mut self, id: &str) -> Option<SessionHandle> {
        self.sessions.remove(id)
    }

    /// Open in-memory session containing the user, if any.
    pub fn session_for_user(&self, user_id: &str) -> Option<&SessionHandle> {
        self.sessions.values().find(|s| s.includes(user_id))
    }

    // -- Matchers -----------------------------------------------------

    /// Track a user's matcher task, aborting any previous one.
    pub fn set_matcher(&mut self, user_id: &str, handle: JoinHandle<()>) {
        if let Some(old) = self.matchers.insert(user_id.to_string(), handle) {
            old.abort();
        }
    }

    pub fn abort_matcher(&mut self, user_id: &str) {
        if let Some(handle) = self.matchers.remove(user_id) {
            handle.abort();
        }
    }

    /// Drop the matcher entry without aborting — used by a matcher task
    /// that is exiting on its own.
    pub fn clear_matcher(&mut self, user_id: &str) {
        self.matchers.remove(user_id);
    }
}
