//! SQLite store — tickets, lobby entries, session records
//!
//! The database is the coordination primitive: the pair claim runs as a
//! single immediate transaction that re-verifies both tickets before
//! creating the session, so concurrent matchers cannot double-book a
//! participant. Uses `spawn_blocking` for async-safe SQLite access.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use deskmate_protocol::{
    Activity, AgreedConfig, LobbyEntry, Phase, SessionStatus, SessionView, TicketSummary,
    WorkMode,
};

/// Tickets older than this are ignored by matchers and swept
pub const TICKET_STALENESS_SECS: i64 = 5 * 60;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Current time as unix seconds
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Embedded schema migrations, applied in order and tracked in
/// `schema_versions`.
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "initial",
    "CREATE TABLE IF NOT EXISTS tickets (
        user_id      TEXT PRIMARY KEY,
        activity     TEXT NOT NULL,
        duration_min INTEGER NOT NULL,
        created_at   INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_tickets_match
        ON tickets (activity, duration_min, created_at);

    CREATE TABLE IF NOT EXISTS lobby (
        user_id      TEXT PRIMARY KEY,
        display_name TEXT,
        activity     TEXT NOT NULL,
        duration_min INTEGER NOT NULL,
        published_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sessions (
        id            TEXT PRIMARY KEY,
        user_a        TEXT NOT NULL,
        user_b        TEXT NOT NULL,
        activity      TEXT NOT NULL,
        status        TEXT NOT NULL,
        work_mode     TEXT,
        duration_min  INTEGER,
        pre_talk_min  INTEGER,
        post_talk_min INTEGER,
        phase         TEXT,
        created_at    INTEGER NOT NULL,
        ended_at      INTEGER,
        end_reason    TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_sessions_users
        ON sessions (user_a, user_b, status);",
)];

/// Handle to the SQLite store. Cheap to clone; each blocking operation
/// opens its own connection (WAL mode tolerates this).
#[derive(Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Open the store and apply pending migrations.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = open_conn(db_path)?;
        run_migrations(&conn)?;
        info!(
            component = "store",
            event = "store.opened",
            db_path = %db_path.display(),
            "Store opened"
        );
        Ok(Self {
            db_path: db_path.to_path_buf(),
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let mut conn = open_conn(&path)?;
            Ok(f(&mut conn)?)
        })
        .await?
    }

    // -- Tickets ------------------------------------------------------

    /// Insert or refresh a waiting ticket. A re-join replaces the old
    /// ticket with a fresh timestamp.
    pub async fn put_ticket(&self, ticket: TicketSummary) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO tickets (user_id, activity, duration_min, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                   activity = excluded.activity,
                   duration_min = excluded.duration_min,
                   created_at = excluded.created_at",
                params![
                    ticket.user_id,
                    ticket.activity.as_str(),
                    ticket.duration_min,
                    ticket.created_at
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_ticket(&self, user_id: &str) -> Result<()> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            conn.execute("DELETE FROM tickets WHERE user_id = ?1", params![user_id])?;
            Ok(())
        })
        .await
    }

    /// The caller's own waiting ticket, if it still exists.
    pub async fn get_ticket(&self, user_id: &str) -> Result<Option<TicketSummary>> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT user_id, activity, duration_min, created_at
                 FROM tickets WHERE user_id = ?1",
                params![user_id],
                row_to_ticket,
            )
            .optional()
        })
        .await
    }

    /// All tickets with equal activity and duration, excluding the
    /// caller's own and any past the staleness threshold, oldest first.
    pub async fn match_candidates(
        &self,
        user_id: &str,
        activity: Activity,
        duration_min: u32,
        now: i64,
    ) -> Result<Vec<TicketSummary>> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, activity, duration_min, created_at
                 FROM tickets
                 WHERE activity = ?1 AND duration_min = ?2
                   AND user_id != ?3 AND created_at > ?4
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map(
                    params![
                        activity.as_str(),
                        duration_min,
                        user_id,
                        now - TICKET_STALENESS_SECS
                    ],
                    row_to_ticket,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Atomically claim a partner: verify both tickets still exist (and
    /// the candidate is still fresh), create the session, delete both
    /// tickets and any lobby rows — all in one immediate transaction.
    ///
    /// Returns `None` when a precondition failed, i.e. another matcher
    /// won the race for one of the tickets.
    pub async fn claim_pair(
        &self,
        session_id: &str,
        claimer: &str,
        candidate: &str,
        activity: Activity,
        duration_min: u32,
        now: i64,
    ) -> Result<Option<SessionView>> {
        let session_id = session_id.to_string();
        let claimer = claimer.to_string();
        let candidate = candidate.to_string();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let claimer_exists: Option<i64> = tx
                .query_row(
                    "SELECT created_at FROM tickets
                     WHERE user_id = ?1 AND activity = ?2 AND duration_min = ?3",
                    params![claimer, activity.as_str(), duration_min],
                    |row| row.get(0),
                )
                .optional()?;
            let candidate_fresh: Option<i64> = tx
                .query_row(
                    "SELECT created_at FROM tickets
                     WHERE user_id = ?1 AND activity = ?2 AND duration_min = ?3
                       AND created_at > ?4",
                    params![
                        candidate,
                        activity.as_str(),
                        duration_min,
                        now - TICKET_STALENESS_SECS
                    ],
                    |row| row.get(0),
                )
                .optional()?;

            if claimer_exists.is_none() || candidate_fresh.is_none() {
                // Lost the race or the candidate went stale; nothing to undo.
                return Ok(None);
            }

            tx.execute(
                "INSERT INTO sessions (id, user_a, user_b, activity, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session_id,
                    claimer,
                    candidate,
                    activity.as_str(),
                    SessionStatus::Negotiating.as_str(),
                    now
                ],
            )?;
            tx.execute(
                "DELETE FROM tickets WHERE user_id IN (?1, ?2)",
                params![claimer, candidate],
            )?;
            tx.execute(
                "DELETE FROM lobby WHERE user_id IN (?1, ?2)",
                params![claimer, candidate],
            )?;
            tx.commit()?;

            Ok(Some(SessionView {
                id: session_id,
                participants: [claimer, candidate],
                activity,
                status: SessionStatus::Negotiating,
                phase: None,
                agreed: None,
                created_at: now,
            }))
        })
        .await
    }

    /// Delete tickets (and their lobby rows) past the staleness
    /// threshold. Returns the number of tickets removed.
    pub async fn sweep_stale_tickets(&self, now: i64) -> Result<usize> {
        self.call(move |conn| {
            let cutoff = now - TICKET_STALENESS_SECS;
            conn.execute(
                "DELETE FROM lobby WHERE user_id IN
                   (SELECT user_id FROM tickets WHERE created_at <= ?1)",
                params![cutoff],
            )?;
            let removed =
                conn.execute("DELETE FROM tickets WHERE created_at <= ?1", params![cutoff])?;
            Ok(removed)
        })
        .await
    }

    // -- Lobby --------------------------------------------------------

    /// Best-effort discoverability listing; not part of the claim
    /// transaction.
    pub async fn publish_lobby(&self, entry: LobbyEntry) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO lobby (user_id, display_name, activity, duration_min, published_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                   display_name = excluded.display_name,
                   activity = excluded.activity,
                   duration_min = excluded.duration_min,
                   published_at = excluded.published_at",
                params![
                    entry.user_id,
                    entry.display_name,
                    entry.activity.as_str(),
                    entry.duration_min,
                    entry.published_at
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn remove_lobby(&self, user_id: &str) -> Result<()> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            conn.execute("DELETE FROM lobby WHERE user_id = ?1", params![user_id])?;
            Ok(())
        })
        .await
    }

    pub async fn list_lobby(&self, now: i64) -> Result<Vec<LobbyEntry>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, display_name, activity, duration_min, published_at
                 FROM lobby
                 WHERE published_at > ?1
                 ORDER BY published_at ASC",
            )?;
            let rows = stmt
                .query_map(params![now - TICKET_STALENESS_SECS], row_to_lobby)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    // -- Sessions -----------------------------------------------------

    /// Newest open session containing the user — the passive side of
    /// the match race.
    pub async fn find_open_session(&self, user_id: &str) -> Result<Option<SessionView>> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE (user_a = ?1 OR user_b = ?1)
                       AND status IN ('negotiating', 'live')
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![user_id],
                row_to_session,
            )
            .optional()
        })
        .await
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionView>> {
        let id = id.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
                row_to_session,
            )
            .optional()
        })
        .await
    }

    pub async fn list_open_sessions(&self) -> Result<Vec<SessionView>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE status IN ('negotiating', 'live')
                 ORDER BY created_at ASC"
            ))?;
            let rows = stmt
                .query_map([], row_to_session)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Record the negotiated configuration and flip the session live.
    pub async fn set_agreed_config(&self, session_id: &str, config: AgreedConfig) -> Result<()> {
        let session_id = session_id.to_string();
        self.call(move |conn| {
            conn.execute(
                "UPDATE sessions SET
                   status = ?1, work_mode = ?2, duration_min = ?3,
                   pre_talk_min = ?4, post_talk_min = ?5
                 WHERE id = ?6",
                params![
                    SessionStatus::Live.as_str(),
                    config.work_mode.as_str(),
                    config.duration_min,
                    config.pre_talk_min,
                    config.post_talk_min,
                    session_id
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_phase(&self, session_id: &str, phase: Phase) -> Result<()> {
        let session_id = session_id.to_string();
        self.call(move |conn| {
            conn.execute(
                "UPDATE sessions SET phase = ?1 WHERE id = ?2",
                params![phase.as_str(), session_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn end_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        reason: &str,
        now: i64,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        let reason = reason.to_string();
        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE sessions SET status = ?1, ended_at = ?2, end_reason = ?3
                 WHERE id = ?4 AND status IN ('negotiating', 'live')",
                params![status.as_str(), now, reason, session_id],
            )?;
            if updated > 0 {
                debug!(
                    component = "store",
                    event = "session.ended",
                    session_id = %session_id,
                    status = status.as_str(),
                    reason = %reason,
                    "Session closed"
                );
            }
            Ok(())
        })
        .await
    }
}

const SESSION_COLUMNS: &str = "id, user_a, user_b, activity, status, work_mode, duration_min, \
                               pre_talk_min, post_talk_min, phase, created_at";

fn open_conn(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

/// Apply embedded migrations in order, tracking versions in
/// `schema_versions`.
fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
    )?;

    for (version, name, sql) in MIGRATIONS {
        let applied: Option<i64> = conn
            .query_row(
                "SELECT version FROM schema_versions WHERE version = ?1",
                params![version],
                |row| row.get(0),
            )
            .optional()?;
        if applied.is_some() {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_versions (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        info!(
            component = "store",
            event = "migration.applied",
            version = version,
            name = name,
            "Applied migration"
        );
    }
    Ok(())
}

fn row_to_ticket(row: &rusqlite::Row<'_>) -> rusqlite::Result<TicketSummary> {
    let activity: String = row.get(1)?;
    Ok(TicketSummary {
        user_id: row.get(0)?,
        activity: parse_or_invalid(row, 1, Activity::parse(&activity))?,
        duration_min: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_lobby(row: &rusqlite::Row<'_>) -> rusqlite::Result<LobbyEntry> {
    let activity: String = row.get(2)?;
    Ok(LobbyEntry {
        user_id: row.get(0)?,
        display_name: row.get(1)?,
        activity: parse_or_invalid(row, 2, Activity::parse(&activity))?,
        duration_min: row.get(3)?,
        published_at: row.get(4)?,
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionView> {
    let activity: String = row.get(3)?;
    let status: String = row.get(4)?;
    let work_mode: Option<String> = row.get(5)?;
    let duration_min: Option<u32> = row.get(6)?;
    let pre_talk_min: Option<u32> = row.get(7)?;
    let post_talk_min: Option<u32> = row.get(8)?;
    let phase: Option<String> = row.get(9)?;

    let agreed = match (work_mode, duration_min, pre_talk_min, post_talk_min) {
        (Some(mode), Some(duration), Some(pre), Some(post)) => Some(AgreedConfig {
            work_mode: parse_or_invalid(row, 5, WorkMode::parse(&mode))?,
            duration_min: duration,
            pre_talk_min: pre,
            post_talk_min: post,
        }),
        _ => None,
    };

    Ok(SessionView {
        id: row.get(0)?,
        participants: [row.get(1)?, row.get(2)?],
        activity: parse_or_invalid(row, 3, Activity::parse(&activity))?,
        status: parse_or_invalid(row, 4, SessionStatus::parse(&status))?,
        phase: match phase {
            Some(p) => Some(parse_or_invalid(row, 9, Phase::parse(&p))?),
            None => None,
        },
        agreed,
        created_at: row.get(10)?,
    })
}

/// Map an unknown enum string to a column-type error instead of panicking.
fn parse_or_invalid<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parsed: Option<T>,
) -> rusqlite::Result<T> {
    parsed.ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(
            idx,
            "enum".to_string(),
            row.get_ref(idx)
                .map(|v| v.data_type())
                .unwrap_or(rusqlite::types::Type::Null),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskmate_protocol::new_id;
    use tempfile::TempDir;

    fn ticket(user: &str, created_at: i64) -> TicketSummary {
        TicketSummary {
            user_id: user.to_string(),
            activity: Activity::Study,
            duration_min: 25,
            created_at,
        }
    }

    fn open_store(dir: &TempDir) -> Store {
        Store::open(&dir.path().join("test.db")).expect("open store")
    }

    #[tokio::test]
    async fn candidates_exclude_self_stale_and_mismatched() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = 10_000;

        store.put_ticket(ticket("me", now)).await.unwrap();
        store.put_ticket(ticket("fresh", now - 60)).await.unwrap();
        store
            .put_ticket(ticket("stale", now - TICKET_STALENESS_SECS))
            .await
            .unwrap();
        store
            .put_ticket(TicketSummary {
                duration_min: 50,
                ..ticket("other-duration", now)
            })
            .await
            .unwrap();
        store
            .put_ticket(TicketSummary {
                activity: Activity::Writing,
                ..ticket("other-activity", now)
            })
            .await
            .unwrap();

        let candidates = store
            .match_candidates("me", Activity::Study, 25, now)
            .await
            .unwrap();
        let ids: Vec<&str> = candidates.iter().map(|t| t.user_id.as_str()).collect();
        assert_eq!(ids, vec!["fresh"]);
    }

    #[tokio::test]
    async fn candidates_sorted_oldest_first() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = 10_000;

        store.put_ticket(ticket("newer", now - 10)).await.unwrap();
        store.put_ticket(ticket("oldest", now - 200)).await.unwrap();
        store.put_ticket(ticket("middle", now - 100)).await.unwrap();

        let candidates = store
            .match_candidates("me", Activity::Study, 25, now)
            .await
            .unwrap();
        let ids: Vec<&str> = candidates.iter().map(|t| t.user_id.as_str()).collect();
        assert_eq!(ids, vec!["oldest", "middle", "newer"]);
    }

    #[tokio::test]
    async fn claim_pair_creates_session_and_consumes_tickets() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = 10_000;

        store.put_ticket(ticket("ada", now)).await.unwrap();
        store.put_ticket(ticket("grace", now - 30)).await.unwrap();

        let session = store
            .claim_pair(&new_id(), "ada", "grace", Activity::Study, 25, now)
            .await
            .unwrap()
            .expect("claim should succeed");
        assert_eq!(session.status, SessionStatus::Negotiating);
        assert!(session.includes("ada"));
        assert!(session.includes("grace"));

        // Both tickets consumed: no candidates remain for anyone.
        let leftover = store
            .match_candidates("someone-else", Activity::Study, 25, now)
            .await
            .unwrap();
        assert!(leftover.is_empty());

        // Both sides can find the session.
        for user in ["ada", "grace"] {
            let found = store.find_open_session(user).await.unwrap().unwrap();
            assert_eq!(found.id, session.id);
        }
    }

    #[tokio::test]
    async fn second_claim_of_same_ticket_fails() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = 10_000;

        store.put_ticket(ticket("ada", now)).await.unwrap();
        store.put_ticket(ticket("grace", now)).await.unwrap();
        store.put_ticket(ticket("linus", now)).await.unwrap();

        let first = store
            .claim_pair(&new_id(), "ada", "grace", Activity::Study, 25, now)
            .await
            .unwrap();
        assert!(first.is_some());

        // grace's ticket is gone; linus cannot claim her.
        let second = store
            .claim_pair(&new_id(), "linus", "grace", Activity::Study, 25, now)
            .await
            .unwrap();
        assert!(second.is_none());

        // linus's own ticket is untouched by the failed claim.
        let candidates = store
            .match_candidates("me", Activity::Study, 25, now)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].user_id, "linus");
    }

    #[tokio::test]
    async fn claim_rechecks_candidate_freshness() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = 10_000;

        store.put_ticket(ticket("ada", now)).await.unwrap();
        store
            .put_ticket(ticket("grace", now - TICKET_STALENESS_SECS - 1))
            .await
            .unwrap();

        // The candidate went stale between poll and claim.
        let claimed = store
            .claim_pair(&new_id(), "ada", "grace", Activity::Study, 25, now)
            .await
            .unwrap();
        assert!(claimed.is_none());
        assert!(store.find_open_session("ada").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleted_ticket_never_reappears() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = 10_000;

        store.put_ticket(ticket("gone", now)).await.unwrap();
        store.delete_ticket("gone").await.unwrap();

        let candidates = store
            .match_candidates("me", Activity::Study, 25, now)
            .await
            .unwrap();
        assert!(candidates.is_empty());

        store.put_ticket(ticket("ada", now)).await.unwrap();
        let claimed = store
            .claim_pair(&new_id(), "ada", "gone", Activity::Study, 25, now)
            .await
            .unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn sweep_removes_stale_tickets_and_lobby_rows() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = 10_000;

        store
            .put_ticket(ticket("stale", now - TICKET_STALENESS_SECS - 5))
            .await
            .unwrap();
        store.put_ticket(ticket("fresh", now)).await.unwrap();
        store
            .publish_lobby(LobbyEntry {
                user_id: "stale".to_string(),
                display_name: None,
                activity: Activity::Study,
                duration_min: 25,
                published_at: now - TICKET_STALENESS_SECS - 5,
            })
            .await
            .unwrap();

        let removed = store.sweep_stale_tickets(now).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.list_lobby(now).await.unwrap().is_empty());

        let candidates = store
            .match_candidates("me", Activity::Study, 25, now)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].user_id, "fresh");
    }

    #[tokio::test]
    async fn session_lifecycle_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = 10_000;

        store.put_ticket(ticket("ada", now)).await.unwrap();
        store.put_ticket(ticket("grace", now)).await.unwrap();
        let session = store
            .claim_pair(&new_id(), "ada", "grace", Activity::Study, 25, now)
            .await
            .unwrap()
            .unwrap();

        let config = AgreedConfig {
            work_mode: WorkMode::Casual,
            duration_min: 25,
            pre_talk_min: 4,
            post_talk_min: 6,
        };
        store.set_agreed_config(&session.id, config).await.unwrap();
        store
            .set_phase(&session.id, Phase::Icebreaker)
            .await
            .unwrap();

        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Live);
        assert_eq!(loaded.phase, Some(Phase::Icebreaker));
        assert_eq!(loaded.agreed, Some(config));

        store
            .end_session(&session.id, SessionStatus::Completed, "completed", now + 100)
            .await
            .unwrap();
        assert!(store.find_open_session("ada").await.unwrap().is_none());
        assert!(store.list_open_sessions().await.unwrap().is_empty());

        // Ending twice is a no-op, the first reason wins.
        store
            .end_session(&session.id, SessionStatus::Abandoned, "late", now + 200)
            .await
            .unwrap();
        let closed = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(closed.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn lobby_publish_list_remove() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = 10_000;

        store
            .publish_lobby(LobbyEntry {
                user_id: "ada".to_string(),
                display_name: Some("Ada".to_string()),
                activity: Activity::Writing,
                duration_min: 50,
                published_at: now,
            })
            .await
            .unwrap();

        let entries = store.list_lobby(now).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].display_name.as_deref(), Some("Ada"));

        store.remove_lobby("ada").await.unwrap();
        assert!(store.list_lobby(now).await.unwrap().is_empty());
    }
}
