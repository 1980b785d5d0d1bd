//! Matchmaking poll loop
//!
//! One loop per queued user, spawned on `join_queue` and aborted on
//! `leave_queue` or disconnect. Every cycle it first checks whether
//! another matcher already claimed it into a session (the passive
//! path), then tries to claim a candidate itself oldest-first (the
//! active path). Both paths converge on `session::ensure_session`, so
//! the redundant race is harmless.

use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use deskmate_protocol::{new_id, LobbyEntry, ServerMessage, TicketSummary};

use crate::session;
use crate::state::SharedState;
use crate::store::unix_now;

/// Fixed interval between match attempts
pub const MATCH_POLL_INTERVAL_SECS: u64 = 3;

/// How long to wait before publishing a lobby entry
pub const LOBBY_PUBLISH_DELAY_SECS: u64 = 10;

/// Spawn the matcher loop for a freshly queued ticket. The returned
/// handle is stored in `AppState` so leave/disconnect can abort it.
pub fn spawn_matcher(
    state: SharedState,
    ticket: TicketSummary,
    display_name: Option<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run_matcher(&state, &ticket, display_name).await;
        // Exiting on our own (matched): drop the registry entry without
        // aborting the already-finished task.
        state.lock().await.clear_matcher(&ticket.user_id);
    })
}

async fn run_matcher(state: &SharedState, ticket: &TicketSummary, display_name: Option<String>) {
    let store = state.lock().await.store.clone();
    let user_id = ticket.user_id.as_str();

    let mut interval = tokio::time::interval(Duration::from_secs(MATCH_POLL_INTERVAL_SECS));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let queued_at = Instant::now();
    let mut published = false;

    loop {
        interval.tick().await;

        // Passive path: someone else's transaction claimed our ticket.
        match store.find_open_session(user_id).await {
            Ok(Some(view)) => {
                debug!(
                    component = "matchmaker",
                    event = "match.observed",
                    user_id = %user_id,
                    session_id = %view.id,
                    "Claimed by a peer's matcher"
                );
                session::ensure_session(state, &view).await;
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    component = "matchmaker",
                    event = "match.lookup_failed",
                    user_id = %user_id,
                    error = %e,
                    "Session lookup failed, will retry"
                );
                continue;
            }
        }

        // Our ticket can disappear underneath us: claimed by a peer in
        // the instant after the passive check, or swept once it passed
        // the staleness window. Without this check the loop would poll
        // forever with nothing left to match.
        match store.get_ticket(user_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                if handle_missing_ticket(state, ticket).await {
                    return;
                }
                continue;
            }
            Err(e) => {
                warn!(
                    component = "matchmaker",
                    event = "match.ticket_check_failed",
                    user_id = %user_id,
                    error = %e,
                    "Ticket lookup failed, will retry"
                );
                continue;
            }
        }

        // Active path: try to claim a candidate, oldest first.
        let now = unix_now();
        let candidates = match store
            .match_candidates(user_id, ticket.activity, ticket.duration_min, now)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(
                    component = "matchmaker",
                    event = "match.query_failed",
                    user_id = %user_id,
                    error = %e,
                    "Candidate query failed, will retry"
                );
                continue;
            }
        };

        for candidate in candidates {
            match store
                .claim_pair(
                    &new_id(),
                    user_id,
                    &candidate.user_id,
                    ticket.activity,
                    ticket.duration_min,
                    now,
                )
                .await
            {
                Ok(Some(view)) => {
                    info!(
                        component = "matchmaker",
                        event = "match.claimed",
                        user_id = %user_id,
                        partner = %candidate.user_id,
                        session_id = %view.id,
                        activity = ticket.activity.as_str(),
                        duration_min = ticket.duration_min,
                        "Pair claimed"
                    );
                    session::ensure_session(state, &view).await;
                    return;
                }
                // Lost the race for this candidate; try the next one.
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        component = "matchmaker",
                        event = "match.claim_failed",
                        user_id = %user_id,
                        partner = %candidate.user_id,
                        error = %e,
                        "Claim transaction failed"
                    );
                }
            }
        }

        // No match yet: after 10 seconds, list ourselves in the public
        // lobby. Best-effort, a failure is retried next cycle.
        if !published && queued_at.elapsed() >= Duration::from_secs(LOBBY_PUBLISH_DELAY_SECS) {
            let entry = LobbyEntry {
                user_id: user_id.to_string(),
                display_name: display_name.clone(),
                activity: ticket.activity,
                duration_min: ticket.duration_min,
                published_at: unix_now(),
            };
            match store.publish_lobby(entry.clone()).await {
                Ok(()) => {
                    published = true;
                    info!(
                        component = "matchmaker",
                        event = "lobby.published",
                        user_id = %user_id,
                        "Published to lobby"
                    );
                    let guard = state.lock().await;
                    guard
                        .send_to_user(user_id, ServerMessage::LobbyPublished { entry })
                        .await;
                }
                Err(e) => {
                    warn!(
                        component = "matchmaker",
                        event = "lobby.publish_failed",
                        user_id = %user_id,
                        error = %e,
                        "Lobby publish failed, will retry"
                    );
                }
            }
        }
    }
}

/// Our ticket is gone. Either a peer's claim consumed it and a session
/// row exists, or the sweeper removed it after the staleness window and
/// the client must be told the queue entry expired.
///
/// Returns true when the matcher should stop; false on a transient
/// store error, to retry next cycle.
async fn handle_missing_ticket(state: &SharedState, ticket: &TicketSummary) -> bool {
    let store = state.lock().await.store.clone();
    let user_id = ticket.user_id.as_str();

    match store.find_open_session(user_id).await {
        Ok(Some(view)) => {
            session::ensure_session(state, &view).await;
            true
        }
        Ok(None) => {
            info!(
                component = "matchmaker",
                event = "queue.expired",
                user_id = %user_id,
                activity = ticket.activity.as_str(),
                "Ticket expired without a match"
            );
            let _ = store.remove_lobby(user_id).await;

            let guard = state.lock().await;
            guard
                .send_to_user(
                    user_id,
                    ServerMessage::Error {
                        code: "queue_expired".to_string(),
                        message: "no partner found within 5 minutes, rejoin to keep waiting"
                            .to_string(),
                        session_id: None,
                    },
                )
                .await;
            guard.send_to_user(user_id, ServerMessage::QueueLeft).await;
            true
        }
        Err(e) => {
            warn!(
                component = "matchmaker",
                event = "match.lookup_failed",
                user_id = %user_id,
                error = %e,
                "Session lookup failed, will retry"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use crate::store::{Store, TICKET_STALENESS_SECS};
    use deskmate_protocol::Activity;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::{mpsc, Mutex};

    fn ticket(user: &str, created_at: i64) -> TicketSummary {
        TicketSummary {
            user_id: user.to_string(),
            activity: Activity::Study,
            duration_min: 25,
            created_at,
        }
    }

    async fn test_state(dir: &TempDir) -> SharedState {
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        Arc::new(Mutex::new(AppState::new(store, false)))
    }

    #[tokio::test]
    async fn swept_ticket_notifies_the_client_and_stops() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        let store = state.lock().await.store.clone();

        let (tx, mut rx) = mpsc::channel(16);
        state.lock().await.register_connection("ada", tx);

        // Queued past the staleness window, then swept.
        let now = unix_now();
        let stale = ticket("ada", now - TICKET_STALENESS_SECS - 5);
        store.put_ticket(stale.clone()).await.unwrap();
        store.sweep_stale_tickets(now).await.unwrap();
        assert!(store.get_ticket("ada").await.unwrap().is_none());

        assert!(handle_missing_ticket(&state, &stale).await);

        match rx.recv().await.unwrap() {
            ServerMessage::Error { code, .. } => assert_eq!(code, "queue_expired"),
            other => panic!("unexpected message: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            ServerMessage::QueueLeft => {}
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn claimed_ticket_registers_the_session_and_stops() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        let store = state.lock().await.store.clone();

        let now = unix_now();
        let mine = ticket("ada", now);
        store.put_ticket(mine.clone()).await.unwrap();
        store.put_ticket(ticket("grace", now)).await.unwrap();

        // A peer's matcher claims us; our ticket is consumed.
        let view = store
            .claim_pair(&new_id(), "grace", "ada", Activity::Study, 25, now)
            .await
            .unwrap()
            .unwrap();
        assert!(store.get_ticket("ada").await.unwrap().is_none());

        assert!(handle_missing_ticket(&state, &mine).await);
        assert!(state.lock().await.has_session(&view.id));
    }
}
