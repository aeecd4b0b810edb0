//! Game session state machine.
//!
//! A session owns one match's board, turn pointer, and lifecycle, validates
//! moves, and detects terminal conditions. The state machine here is pure;
//! the engine layer wraps each session in its own lock and drives timers,
//! persistence, and broadcasting around the outcomes returned from it.
//!
//! Lifecycle: `playing -> finished`, exactly once, via win, draw, or forfeit.
//! `finished` is terminal. Stale moves racing with completion are ignored,
//! not errored; that timing is normal, not a caller bug.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

use crate::state::board::{Board, Side};
use crate::state::connection::ClientHandle;

/// Display name of the synthetic opponent.
///
/// Cosmetic only: whether a session has a bot is decided by
/// [`Session::bot_side`], never by comparing against this string.
pub const BOT_NAME: &str = "Bot";

/// Result string recorded for drawn games.
pub const DRAW_RESULT: &str = "draw";

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Playing,
    Finished,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playing => "playing",
            Self::Finished => "finished",
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// Outcome of a finished match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameResult {
    Winner(String),
    Draw,
}

impl GameResult {
    /// Wire/record representation: the winner's username, or `"draw"`.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Winner(name) => name,
            Self::Draw => DRAW_RESULT,
        }
    }
}

/// Why a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Win,
    Draw,
    Forfeit,
}

/// Immutable record of one finished game, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: String,
    pub player1: String,
    pub player2: String,
    /// Winner's username, or `"draw"`.
    pub winner: String,
    #[serde(rename = "duration_seconds")]
    pub duration_secs: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// What applying a move did.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// Nothing happened: session already finished, or the column was invalid
    /// or full. Deliberately silent.
    Ignored,
    /// Marker placed, no terminal condition; the turn flipped.
    Placed { row: usize, col: usize, side: Side },
    /// Marker placed and the session finished.
    Finished {
        record: GameRecord,
        reason: FinishReason,
    },
}

/// One in-progress or completed match between two sides.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    /// Side one's username.
    pub player1: String,
    /// Side two's username (may be the bot identity).
    pub player2: String,
    /// Which side the bot plays, if any. Authoritative over any name check.
    pub bot_side: Option<Side>,
    pub board: Board,
    /// Which side moves next.
    pub turn: Side,
    pub status: SessionStatus,
    /// Set exactly once, when the session finishes.
    pub result: Option<GameResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Currently-attached live connections keyed by username.
    attached: HashMap<String, ClientHandle>,
}

impl Session {
    pub fn new(
        id: String,
        player1: String,
        player2: String,
        bot_side: Option<Side>,
        rows: usize,
        cols: usize,
    ) -> Self {
        Self {
            id,
            player1,
            player2,
            bot_side,
            board: Board::new(rows, cols),
            turn: Side::One,
            status: SessionStatus::Playing,
            result: None,
            started_at: Utc::now(),
            finished_at: None,
            attached: HashMap::new(),
        }
    }

    /// The side a username plays, if they are in this match.
    pub fn side_of(&self, username: &str) -> Option<Side> {
        if username == self.player1 {
            Some(Side::One)
        } else if username == self.player2 {
            Some(Side::Two)
        } else {
            None
        }
    }

    /// The username playing a side.
    pub fn player_name(&self, side: Side) -> &str {
        match side {
            Side::One => &self.player1,
            Side::Two => &self.player2,
        }
    }

    /// Whether the bot is entitled to move next.
    pub fn is_bot_turn(&self) -> bool {
        self.status.is_playing() && self.bot_side == Some(self.turn)
    }

    /// Apply a move for whichever side holds the turn.
    ///
    /// No-op when the session is not `playing` or the column is invalid or
    /// full. On success without a terminal condition the turn flips; on a win
    /// or draw the session transitions to `finished` and the record is
    /// returned for persistence.
    pub fn apply_move(&mut self, col: usize) -> MoveOutcome {
        if !self.status.is_playing() {
            return MoveOutcome::Ignored;
        }

        let side = self.turn;
        let row = match self.board.drop(col, side) {
            Ok(row) => row,
            Err(_) => return MoveOutcome::Ignored,
        };

        if self.board.is_winning_placement(row, col, side) {
            let winner = self.player_name(side).to_string();
            let record = self.finish(GameResult::Winner(winner));
            return MoveOutcome::Finished {
                record,
                reason: FinishReason::Win,
            };
        }

        if self.board.is_full() && !self.board.any_win_exists() {
            let record = self.finish(GameResult::Draw);
            return MoveOutcome::Finished {
                record,
                reason: FinishReason::Draw,
            };
        }

        self.turn = side.other();
        MoveOutcome::Placed { row, col, side }
    }

    /// Finish the session with the absent player's opponent as winner.
    ///
    /// Returns `None` if the session already finished or the name is not a
    /// player in this match (both stale-timer no-ops).
    pub fn forfeit(&mut self, absent: &str) -> Option<GameRecord> {
        if !self.status.is_playing() {
            return None;
        }
        let absent_side = self.side_of(absent)?;
        let winner = self.player_name(absent_side.other()).to_string();
        Some(self.finish(GameResult::Winner(winner)))
    }

    /// Transition `playing -> finished` and build the immutable record.
    fn finish(&mut self, result: GameResult) -> GameRecord {
        debug_assert!(self.status.is_playing());
        self.status = SessionStatus::Finished;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
        self.record()
    }

    /// Build the persisted record. Only meaningful once finished.
    fn record(&self) -> GameRecord {
        let ended_at = self.finished_at.unwrap_or_else(Utc::now);
        let winner = self
            .result
            .as_ref()
            .map(|r| r.as_str().to_string())
            .unwrap_or_default();
        GameRecord {
            id: self.id.clone(),
            player1: self.player1.clone(),
            player2: self.player2.clone(),
            winner,
            duration_secs: ended_at.signed_duration_since(self.started_at).num_seconds(),
            started_at: self.started_at,
            ended_at,
        }
    }

    /// How long ago the session finished, if it has.
    pub fn finished_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.finished_at.map(|t| now.signed_duration_since(t))
    }

    // Attached connections

    /// Attach (or re-attach) a player's live connection.
    pub fn attach(&mut self, handle: ClientHandle) {
        self.attached.insert(handle.username.clone(), handle);
    }

    /// Detach a player's connection on disconnect.
    pub fn detach(&mut self, username: &str) -> Option<ClientHandle> {
        self.attached.remove(username)
    }

    pub fn is_attached(&self, username: &str) -> bool {
        self.attached.contains_key(username)
    }

    /// All attached connections.
    pub fn attached(&self) -> impl Iterator<Item = &ClientHandle> {
        self.attached.values()
    }

    // Wire payloads

    /// Current result as sent on the wire: empty string while playing.
    pub fn result_str(&self) -> &str {
        self.result.as_ref().map(|r| r.as_str()).unwrap_or("")
    }

    /// Full board/turn snapshot in wire form.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "rows": self.board.rows(),
            "cols": self.board.cols(),
            "board": self.board.to_json(),
            "turn": self.turn.as_num(),
            "started": self.started_at,
        })
    }
}

/// Shared handle to one session: id, wake signal, and the lock-guarded state.
///
/// The lock serializes all of a session's transition logic; moves within one
/// session are totally ordered by it. `wake` is signaled after every applied
/// move and at session start, and is what the bot driver waits on.
#[derive(Debug)]
pub struct SharedSession {
    pub id: String,
    pub wake: Notify,
    pub state: Mutex<Session>,
}

impl SharedSession {
    pub fn new(session: Session) -> Arc<Self> {
        Arc::new(Self {
            id: session.id.clone(),
            wake: Notify::new(),
            state: Mutex::new(session),
        })
    }
}

/// Session table: id to shared session handle.
///
/// Holds a session exclusively while `playing`; once `finished` the entry is
/// retained only for late state queries until the reaper evicts it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Arc<SharedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: Arc<SharedSession>) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn get(&self, id: &str) -> Option<Arc<SharedSession>> {
        self.sessions.get(id).cloned()
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<SharedSession>> {
        self.sessions.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Snapshot of all session handles, for sweeps that must not hold the
    /// table lock while taking per-session locks.
    pub fn handles(&self) -> Vec<Arc<SharedSession>> {
        self.sessions.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

/// Allocate a session identifier.
pub fn next_session_id() -> String {
    format!("g_{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::board::{DEFAULT_COLS, DEFAULT_ROWS};
    use pretty_assertions::assert_eq;

    fn session() -> Session {
        Session::new(
            "g_test".to_string(),
            "alice".to_string(),
            "bob".to_string(),
            None,
            DEFAULT_ROWS,
            DEFAULT_COLS,
        )
    }

    fn bot_session() -> Session {
        Session::new(
            "g_test".to_string(),
            "alice".to_string(),
            BOT_NAME.to_string(),
            Some(Side::Two),
            DEFAULT_ROWS,
            DEFAULT_COLS,
        )
    }

    #[test]
    fn test_new_session_is_playing() {
        let s = session();
        assert_eq!(s.status, SessionStatus::Playing);
        assert_eq!(s.turn, Side::One);
        assert!(s.result.is_none());
        assert!(s.finished_at.is_none());
    }

    #[test]
    fn test_sides() {
        let s = session();
        assert_eq!(s.side_of("alice"), Some(Side::One));
        assert_eq!(s.side_of("bob"), Some(Side::Two));
        assert_eq!(s.side_of("mallory"), None);
        assert_eq!(s.player_name(Side::Two), "bob");
    }

    #[test]
    fn test_move_flips_turn() {
        let mut s = session();
        let outcome = s.apply_move(3);
        assert_eq!(
            outcome,
            MoveOutcome::Placed {
                row: DEFAULT_ROWS - 1,
                col: 3,
                side: Side::One,
            }
        );
        assert_eq!(s.turn, Side::Two);
    }

    #[test]
    fn test_invalid_column_ignored() {
        let mut s = session();
        assert_eq!(s.apply_move(DEFAULT_COLS + 1), MoveOutcome::Ignored);
        assert_eq!(s.turn, Side::One);
    }

    #[test]
    fn test_full_column_ignored() {
        let mut s = session();
        for _ in 0..DEFAULT_ROWS {
            s.apply_move(0);
        }
        let turn_before = s.turn;
        assert_eq!(s.apply_move(0), MoveOutcome::Ignored);
        assert_eq!(s.turn, turn_before);
    }

    #[test]
    fn test_win_finishes_session() {
        let mut s = session();
        // One: 0,1,2,3 wins; Two: 0,1,2 in between
        s.apply_move(0);
        s.apply_move(0);
        s.apply_move(1);
        s.apply_move(1);
        s.apply_move(2);
        s.apply_move(2);
        let outcome = s.apply_move(3);

        match outcome {
            MoveOutcome::Finished { record, reason } => {
                assert_eq!(reason, FinishReason::Win);
                assert_eq!(record.winner, "alice");
                assert_eq!(record.player1, "alice");
                assert_eq!(record.player2, "bob");
            }
            other => panic!("expected win, got {:?}", other),
        }
        assert_eq!(s.status, SessionStatus::Finished);
        assert_eq!(s.result, Some(GameResult::Winner("alice".to_string())));
        assert!(s.finished_at.is_some());
    }

    #[test]
    fn test_finished_session_never_has_empty_result() {
        let mut s = session();
        s.apply_move(0);
        s.apply_move(0);
        s.apply_move(1);
        s.apply_move(1);
        s.apply_move(2);
        s.apply_move(2);
        s.apply_move(3);

        assert_eq!(s.status, SessionStatus::Finished);
        assert!(s.result.is_some());
        assert_ne!(s.result_str(), "");
    }

    #[test]
    fn test_moves_after_finish_ignored() {
        let mut s = session();
        s.apply_move(0);
        s.apply_move(0);
        s.apply_move(1);
        s.apply_move(1);
        s.apply_move(2);
        s.apply_move(2);
        s.apply_move(3);
        assert_eq!(s.status, SessionStatus::Finished);

        let board_before = s.board.clone();
        assert_eq!(s.apply_move(4), MoveOutcome::Ignored);
        assert_eq!(s.board, board_before);
        assert_eq!(s.status, SessionStatus::Finished);
    }

    #[test]
    fn test_draw_on_full_board() {
        // 2x2 board cannot hold a 4-run, so filling it is always a draw
        let mut s = Session::new(
            "g_test".to_string(),
            "alice".to_string(),
            "bob".to_string(),
            None,
            2,
            2,
        );
        s.apply_move(0); // One
        s.apply_move(0); // Two
        s.apply_move(1); // One
        let outcome = s.apply_move(1); // Two fills the board

        match outcome {
            MoveOutcome::Finished { record, reason } => {
                assert_eq!(reason, FinishReason::Draw);
                assert_eq!(record.winner, DRAW_RESULT);
            }
            other => panic!("expected draw, got {:?}", other),
        }
        assert_eq!(s.result, Some(GameResult::Draw));
    }

    #[test]
    fn test_forfeit_awards_other_player() {
        let mut s = session();
        let record = s.forfeit("alice").unwrap();
        assert_eq!(record.winner, "bob");
        assert_eq!(s.status, SessionStatus::Finished);
    }

    #[test]
    fn test_forfeit_is_idempotent() {
        let mut s = session();
        s.forfeit("alice").unwrap();
        assert!(s.forfeit("alice").is_none());
        assert!(s.forfeit("bob").is_none());
    }

    #[test]
    fn test_forfeit_unknown_player_is_noop() {
        let mut s = session();
        assert!(s.forfeit("mallory").is_none());
        assert_eq!(s.status, SessionStatus::Playing);
    }

    #[test]
    fn test_bot_turn_detection() {
        let mut s = bot_session();
        assert!(!s.is_bot_turn());
        s.apply_move(0);
        assert!(s.is_bot_turn());
    }

    #[test]
    fn test_bot_flag_authoritative_over_name() {
        // A human who happens to be called "Bot" is not a bot
        let s = Session::new(
            "g_test".to_string(),
            "alice".to_string(),
            BOT_NAME.to_string(),
            None,
            DEFAULT_ROWS,
            DEFAULT_COLS,
        );
        assert!(!s.is_bot_turn());
    }

    #[test]
    fn test_attach_detach() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut s = session();
        s.attach(ClientHandle::new("alice".to_string(), tx));
        assert!(s.is_attached("alice"));
        assert_eq!(s.attached().count(), 1);

        s.detach("alice");
        assert!(!s.is_attached("alice"));
    }

    #[test]
    fn test_snapshot_shape() {
        let s = session();
        let snap = s.snapshot();
        assert_eq!(snap["rows"], DEFAULT_ROWS);
        assert_eq!(snap["cols"], DEFAULT_COLS);
        assert_eq!(snap["turn"], 1);
        assert!(snap["board"].is_array());
    }

    #[test]
    fn test_registry() {
        let mut registry = SessionRegistry::new();
        let shared = SharedSession::new(session());
        registry.insert(shared.clone());

        assert!(registry.contains("g_test"));
        assert_eq!(registry.count(), 1);
        assert!(registry.get("g_test").is_some());
        assert_eq!(registry.handles().len(), 1);

        registry.remove("g_test");
        assert!(!registry.contains("g_test"));
    }
}
