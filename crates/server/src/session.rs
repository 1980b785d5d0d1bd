//! Live session handles and coordination
//!
//! A `SessionHandle` is the in-memory side of one matched pair:
//! participants, negotiation progress, the phase timer, and the
//! subscriber list. The free functions below coordinate the handle with
//! the store and the connected clients; both the active matcher path
//! and the passive listener path funnel into `ensure_session`, which is
//! idempotent so the match race stays harmless.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use deskmate_protocol::{
    AgreedConfig, Phase, PreferenceSet, ServerMessage, SessionStatus, SessionView,
};

use crate::negotiation::{self, NEGOTIATION_TIMEOUT_SECS};
use crate::phase::{effective_mic, PhasePlan, PhaseTimer, PHASE_TICK_SECS};
use crate::state::SharedState;
use crate::store::unix_now;

/// One side of a matched pair
pub struct Participant {
    pub user_id: String,
    /// The user's own mic choice; the focus phase overrides it.
    pub mic_preference: bool,
    pub submitted: Option<PreferenceSet>,
}

/// In-memory state of one matched session
pub struct SessionHandle {
    id: String,
    view: SessionView,
    participants: [Participant; 2],
    agreed: Option<AgreedConfig>,
    timer: Option<PhaseTimer>,
    subscribers: Vec<mpsc::Sender<ServerMessage>>,
}

impl SessionHandle {
    pub fn from_view(view: SessionView) -> Self {
        let participants = [
            Participant {
                user_id: view.participants[0].clone(),
                mic_preference: true,
                submitted: None,
            },
            Participant {
                user_id: view.participants[1].clone(),
                mic_preference: true,
                submitted: None,
            },
        ];
        Self {
            id: view.id.clone(),
            agreed: view.agreed,
            participants,
            timer: None,
            subscribers: Vec::new(),
            view,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn includes(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    pub fn participant_ids(&self) -> [String; 2] {
        [
            self.participants[0].user_id.clone(),
            self.participants[1].user_id.clone(),
        ]
    }

    pub fn status(&self) -> SessionStatus {
        self.view.status
    }

    /// Current view, with phase and agreed config reflecting in-memory
    /// state.
    pub fn view(&self) -> SessionView {
        let mut view = self.view.clone();
        view.agreed = self.agreed;
        view.phase = self.phase();
        view
    }

    pub fn phase(&self) -> Option<Phase> {
        self.timer.as_ref().map(|t| t.phase())
    }

    pub fn remaining_secs(&self) -> u64 {
        self.timer.as_ref().map(|t| t.remaining_secs()).unwrap_or(0)
    }

    fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    /// Record a submission. Returns both preference sets once both
    /// sides are present.
    pub fn record_preferences(
        &mut self,
        user_id: &str,
        prefs: PreferenceSet,
    ) -> Result<Option<(PreferenceSet, PreferenceSet)>, &'static str> {
        if self.agreed.is_some() {
            return Err("already_agreed");
        }
        let Some(participant) = self.participant_mut(user_id) else {
            return Err("not_participant");
        };
        participant.submitted = Some(prefs);

        match (self.participants[0].submitted, self.participants[1].submitted) {
            (Some(a), Some(b)) => Ok(Some((a, b))),
            _ => Ok(None),
        }
    }

    /// Sides that have not submitted yet.
    pub fn unsubmitted(&self) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| p.submitted.is_none())
            .map(|p| p.user_id.clone())
            .collect()
    }

    /// Store the agreed config and start the phase timer. Returns the
    /// initial phase and its remaining seconds.
    pub fn set_agreed(&mut self, config: AgreedConfig, plan: PhasePlan) -> (Phase, u64) {
        self.agreed = Some(config);
        self.view.status = SessionStatus::Live;
        let timer = PhaseTimer::new(plan);
        let initial = (timer.phase(), timer.remaining_secs());
        self.timer = Some(timer);
        initial
    }

    /// Advance the session clock by one second.
    pub fn tick(&mut self) -> Option<Phase> {
        self.timer.as_mut().and_then(|t| t.tick())
    }

    pub fn mic_preference(&self, user_id: &str) -> Option<bool> {
        self.participants
            .iter()
            .find(|p| p.user_id == user_id)
            .map(|p| p.mic_preference)
    }

    /// Update a participant's mic preference. Returns the effective
    /// state and whether it is currently forced by the focus phase.
    pub fn set_mic_preference(&mut self, user_id: &str, enabled: bool) -> Option<(bool, bool)> {
        let phase = self.phase().unwrap_or(Phase::Icebreaker);
        let participant = self.participant_mut(user_id)?;
        participant.mic_preference = enabled;
        Some((effective_mic(phase, enabled), phase == Phase::Focus))
    }

    pub fn subscribe(&mut self, tx: mpsc::Sender<ServerMessage>) {
        self.subscribers.push(tx);
    }

    /// Broadcast a message to all subscribers, dropping closed channels.
    pub async fn broadcast(&mut self, msg: ServerMessage) {
        self.subscribers.retain(|tx| !tx.is_closed());
        for tx in &self.subscribers {
            let _ = tx.send(msg.clone()).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Coordination — these lock the shared state internally; callers must
// not hold the lock.
// ---------------------------------------------------------------------------

/// Register a freshly matched session. Idempotent: the matcher and the
/// passive listener both call this, whichever observes the session row
/// first wins and the other is a no-op.
///
/// Returns true if this call created the handle.
pub async fn ensure_session(state: &SharedState, view: &SessionView) -> bool {
    {
        let mut guard = state.lock().await;
        if guard.has_session(&view.id) {
            return false;
        }

        let mut handle = SessionHandle::from_view(view.clone());
        for user_id in &view.participants {
            if let Some(tx) = guard.connection(user_id) {
                handle.subscribe(tx);
            }
        }
        guard.insert_session(handle);

        info!(
            component = "session",
            event = "session.registered",
            session_id = %view.id,
            user_a = %view.participants[0],
            user_b = %view.participants[1],
            activity = view.activity.as_str(),
            "Matched session registered"
        );

        for user_id in &view.participants {
            guard
                .send_to_user(
                    user_id,
                    ServerMessage::Matched {
                        session: view.clone(),
                    },
                )
                .await;
        }
    }

    spawn_negotiation_deadline(state.clone(), view.id.clone());
    true
}

/// Handle a preference submission (manual or automatic). When both
/// sides are in, computes the agreed config, persists it, and starts
/// the phase driver.
///
/// Record, merge, and `set_agreed` all happen under one lock
/// acquisition, so racing submissions serialize: the first to complete
/// the pair reaches agreement, the loser fails the `already_agreed`
/// check inside `record_preferences`. The config is computed exactly
/// once and the phase driver spawned exactly once.
pub async fn submit_preferences(
    state: &SharedState,
    session_id: &str,
    user_id: &str,
    prefs: PreferenceSet,
    auto: bool,
) -> Result<(), &'static str> {
    let persist = {
        let mut guard = state.lock().await;
        let quick = guard.quick_phases;
        let Some(handle) = guard.session_mut(session_id) else {
            return Err("unknown_session");
        };
        if auto && !handle.unsubmitted().iter().any(|u| u.as_str() == user_id) {
            // A manual submission landed after the deadline task took
            // its snapshot; don't overwrite it.
            return Ok(());
        }
        let both = handle.record_preferences(user_id, prefs)?;
        handle
            .broadcast(ServerMessage::PreferencesRecorded {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
            })
            .await;
        debug!(
            component = "session",
            event = "negotiation.submitted",
            session_id = %session_id,
            user_id = %user_id,
            auto = auto,
            "Preferences recorded"
        );

        let Some((a, b)) = both else {
            return Ok(());
        };

        let config = negotiation::merge(&a, &b);
        let plan = if quick {
            PhasePlan::quick()
        } else {
            PhasePlan::from_config(&config)
        };
        let (initial_phase, remaining) = handle.set_agreed(config, plan);

        handle
            .broadcast(ServerMessage::ConfigAgreed {
                session_id: session_id.to_string(),
                config,
            })
            .await;
        handle
            .broadcast(ServerMessage::PhaseChanged {
                session_id: session_id.to_string(),
                phase: initial_phase,
                remaining_secs: remaining,
            })
            .await;
        if initial_phase == Phase::Focus {
            // Zero icebreaker: the session opens straight into focus.
            broadcast_mic_states(handle, session_id, Phase::Focus).await;
        }

        info!(
            component = "session",
            event = "negotiation.agreed",
            session_id = %session_id,
            work_mode = config.work_mode.as_str(),
            duration_min = config.duration_min,
            pre_talk_min = config.pre_talk_min,
            post_talk_min = config.post_talk_min,
            "Negotiation complete"
        );
        (guard.store.clone(), config, initial_phase)
    };

    let (store, config, initial_phase) = persist;

    if let Err(e) = store.set_agreed_config(session_id, config).await {
        warn!(
            component = "session",
            event = "negotiation.persist_failed",
            session_id = %session_id,
            error = %e,
            "Failed to persist agreed config"
        );
    }
    if let Err(e) = store.set_phase(session_id, initial_phase).await {
        warn!(
            component = "session",
            event = "phase.persist_failed",
            session_id = %session_id,
            error = %e,
            "Failed to persist phase"
        );
    }

    spawn_phase_driver(state.clone(), session_id.to_string());
    Ok(())
}

/// Fill in randomized preferences for any side that has not submitted.
pub async fn auto_submit_missing(state: &SharedState, session_id: &str) {
    let missing = {
        let guard = state.lock().await;
        match guard.session(session_id) {
            Some(handle) if handle.status() == SessionStatus::Negotiating => {
                handle.unsubmitted()
            }
            _ => return,
        }
    };

    for user_id in missing {
        let prefs = negotiation::random_preferences(&mut rand::thread_rng());
        info!(
            component = "session",
            event = "negotiation.auto_submit",
            session_id = %session_id,
            user_id = %user_id,
            "Negotiation deadline expired, submitting randomized preferences"
        );
        if let Err(reason) =
            submit_preferences(state, session_id, &user_id, prefs, true).await
        {
            // A manual submission can still race in ahead of us.
            debug!(
                component = "session",
                event = "negotiation.auto_submit_skipped",
                session_id = %session_id,
                user_id = %user_id,
                reason = reason,
                "Auto submission skipped"
            );
        }
    }
}

/// The 15 second negotiation deadline.
fn spawn_negotiation_deadline(state: SharedState, session_id: String) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(NEGOTIATION_TIMEOUT_SECS)).await;
        auto_submit_missing(&state, &session_id).await;
    });
}

/// Server-side session clock: one tick per second until completion.
/// Exits when the session handle disappears (ended or abandoned).
fn spawn_phase_driver(state: SharedState, session_id: String) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(PHASE_TICK_SECS));
        // The first tick fires immediately; skip it so the opening
        // phase runs its full duration.
        interval.tick().await;

        loop {
            interval.tick().await;

            let persist: Option<(crate::store::Store, Phase)> = {
                let mut guard = state.lock().await;
                let Some(handle) = guard.session_mut(&session_id) else {
                    break;
                };
                let prev = handle.phase();
                let Some(changed) = handle.tick() else {
                    continue;
                };

                if changed == Phase::Completed {
                    handle
                        .broadcast(ServerMessage::PhaseChanged {
                            session_id: session_id.clone(),
                            phase: Phase::Completed,
                            remaining_secs: 0,
                        })
                        .await;
                    handle
                        .broadcast(ServerMessage::SessionEnded {
                            session_id: session_id.clone(),
                            reason: "completed".to_string(),
                        })
                        .await;
                    let store = guard.store.clone();
                    guard.remove_session(&session_id);
                    drop(guard);

                    if let Err(e) = store
                        .end_session(
                            &session_id,
                            SessionStatus::Completed,
                            "completed",
                            unix_now(),
                        )
                        .await
                    {
                        warn!(
                            component = "session",
                            event = "session.persist_failed",
                            session_id = %session_id,
                            error = %e,
                            "Failed to persist session completion"
                        );
                    }
                    return;
                }

                let remaining = handle.remaining_secs();
                handle
                    .broadcast(ServerMessage::PhaseChanged {
                        session_id: session_id.clone(),
                        phase: changed,
                        remaining_secs: remaining,
                    })
                    .await;

                // Mic policy at the focus boundary.
                if changed == Phase::Focus {
                    broadcast_mic_states(handle, &session_id, Phase::Focus).await;
                } else if prev == Some(Phase::Focus) {
                    broadcast_mic_states(handle, &session_id, changed).await;
                }

                Some((guard.store.clone(), changed))
            };

            if let Some((store, phase)) = persist {
                if let Err(e) = store.set_phase(&session_id, phase).await {
                    warn!(
                        component = "session",
                        event = "phase.persist_failed",
                        session_id = %session_id,
                        error = %e,
                        "Failed to persist phase"
                    );
                }
            }
        }
    });
}

/// Broadcast each participant's effective mic state for the given phase.
async fn broadcast_mic_states(handle: &mut SessionHandle, session_id: &str, phase: Phase) {
    for user_id in handle.participant_ids() {
        let preference = handle.mic_preference(&user_id).unwrap_or(true);
        handle
            .broadcast(ServerMessage::MicState {
                session_id: session_id.to_string(),
                user_id,
                enabled: effective_mic(phase, preference),
                forced: phase == Phase::Focus,
            })
            .await;
    }
}

/// End a session: notify subscribers, drop the handle (which stops the
/// phase driver), and persist the final status.
pub async fn end_session(
    state: &SharedState,
    session_id: &str,
    status: SessionStatus,
    reason: &str,
) {
    let store = {
        let mut guard = state.lock().await;
        if let Some(mut handle) = guard.remove_session(session_id) {
            handle
                .broadcast(ServerMessage::SessionEnded {
                    session_id: session_id.to_string(),
                    reason: reason.to_string(),
                })
                .await;
        }
        guard.store.clone()
    };

    if let Err(e) = store.end_session(session_id, status, reason, unix_now()).await {
        warn!(
            component = "session",
            event = "session.persist_failed",
            session_id = %session_id,
            error = %e,
            "Failed to persist session end"
        );
    }
}
