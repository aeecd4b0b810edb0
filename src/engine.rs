//! Game engine orchestration.
//!
//! Owns the four shared tables (sessions, matchmaking queue, rooms,
//! connections), each behind its own lock, and drives everything that is
//! timer- or event-shaped: deferred matchmaking evaluation, the forfeit grace
//! period, the bot turn driver, and the periodic reaper.
//!
//! Locking discipline: table locks are held only for insert/lookup/delete and
//! never across a send or another lock acquisition; each session's transition
//! logic runs entirely under that session's own lock. Deferred work never
//! blocks the task that schedules it, and every timer re-validates table
//! state on wake so stale timers degrade to no-ops.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::events::{EventSink, GameEvent};
use crate::message::ServerMessage;
use crate::state::board::Side;
use crate::state::bot;
use crate::state::connection::{ClientHandle, ConnectionRegistry};
use crate::state::matchmaking::MatchQueue;
use crate::state::room::{RoomError, RoomInfo, RoomRegistry};
use crate::state::session::{
    next_session_id, FinishReason, GameRecord, MoveOutcome, Session, SessionRegistry,
    SharedSession, BOT_NAME,
};
use crate::store::{Leaderboard, Storage, StoreError};

/// The matchmaking and game-session engine.
pub struct Engine {
    config: Config,
    sessions: Mutex<SessionRegistry>,
    queue: Mutex<MatchQueue>,
    rooms: Mutex<RoomRegistry>,
    connections: Mutex<ConnectionRegistry>,
    storage: Storage,
    events: Box<dyn EventSink>,
}

impl Engine {
    pub fn new(config: Config, storage: Storage, events: Box<dyn EventSink>) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: Mutex::new(SessionRegistry::new()),
            queue: Mutex::new(MatchQueue::new()),
            rooms: Mutex::new(RoomRegistry::new()),
            connections: Mutex::new(ConnectionRegistry::new()),
            storage,
            events,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // Connection lifecycle

    /// Register a freshly-admitted connection.
    pub async fn connect(&self, handle: ClientHandle) {
        info!(username = %handle.username, "client connected");
        self.connections.lock().await.insert(handle);
    }

    /// Handle a closed connection: drop the registry entry and, if the player
    /// is in a live match, start the reconnect grace period.
    pub async fn disconnect(self: &Arc<Self>, username: &str) {
        self.connections.lock().await.remove(username);
        info!(username, "client disconnected");

        let handles = self.sessions.lock().await.handles();
        for session in handles {
            let mut state = session.state.lock().await;
            if state.status.is_playing() && state.is_attached(username) {
                state.detach(username);
                info!(
                    username,
                    game_id = %session.id,
                    grace_secs = self.config.reconnect_grace.as_secs(),
                    "player left live match, reconnect grace started"
                );
                self.spawn_forfeit_timer(session.clone(), username.to_string());
            }
        }
    }

    // Matchmaking

    /// `join` entry point: reconnect to a known session, or enter the queue.
    pub async fn join(self: &Arc<Self>, handle: &ClientHandle, game_id: Option<String>) {
        if let Some(id) = game_id {
            let session = self.sessions.lock().await.get(&id);
            if let Some(session) = session {
                self.reattach(&session, handle).await;
                return;
            }
            debug!(game_id = %id, "resume requested for unknown session, queueing instead");
        }

        self.queue.lock().await.enqueue(handle.username.clone());
        info!(username = %handle.username, "entered matchmaking queue");
        handle.send(ServerMessage::Waiting {
            timeout: self.config.match_wait.as_secs(),
        });
        self.spawn_match_timer(handle.username.clone());
    }

    /// Re-attach a returning player and push the full current snapshot; no
    /// move-by-move replay.
    async fn reattach(&self, session: &Arc<SharedSession>, handle: &ClientHandle) {
        let mut state = session.state.lock().await;
        state.attach(handle.clone());
        info!(username = %handle.username, game_id = %session.id, "player reconnected");
        handle.send(ServerMessage::Reconnected {
            game_id: session.id.clone(),
            state: state.snapshot(),
        });
        let you = state
            .side_of(&handle.username)
            .map(Side::as_num)
            .unwrap_or(0);
        handle.send(ServerMessage::State {
            game_id: session.id.clone(),
            state: state.snapshot(),
            you,
            status: state.status.as_str().to_string(),
            result: state.result_str().to_string(),
        });
    }

    fn spawn_match_timer(self: &Arc<Self>, username: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(engine.config.match_wait).await;
            engine.evaluate_queue(&username).await;
        });
    }

    /// Deferred matchmaking evaluation for one entry. Pairs the player with
    /// the oldest other waiter, or hands the lone remaining player to a bot
    /// game. A stale timer (entry already consumed by an earlier pairing) is
    /// a no-op.
    async fn evaluate_queue(self: &Arc<Self>, username: &str) {
        enum Matched {
            Pair(String, String),
            Bot(String),
            Stale,
        }

        let matched = {
            let mut queue = self.queue.lock().await;
            if let Some((first, second)) = queue.take_pair_with(username) {
                Matched::Pair(first.username, second.username)
            } else if let Some(entry) = queue.take(username) {
                Matched::Bot(entry.username)
            } else {
                Matched::Stale
            }
        };

        match matched {
            Matched::Pair(p1, p2) => {
                info!(player1 = %p1, player2 = %p2, "matched two waiting players");
                self.start_session(p1, p2, false, None).await;
            }
            Matched::Bot(player) => {
                info!(player = %player, "no opponent found, starting bot game");
                self.start_session(player, BOT_NAME.to_string(), true, None).await;
            }
            Matched::Stale => {
                debug!(username, "matchmaking entry already consumed");
            }
        }
    }

    // Rooms

    pub async fn create_room(&self, handle: &ClientHandle, name: Option<String>) {
        let room = self
            .rooms
            .lock()
            .await
            .create(handle.username.clone(), name);
        info!(username = %handle.username, room_id = %room.id, room_name = %room.name, "room created");
        handle.send(ServerMessage::RoomCreated {
            room_id: room.id.clone(),
            room: room.to_json(),
        });
    }

    /// Join a room; starts the session the instant the room fills.
    pub async fn join_room(
        self: &Arc<Self>,
        handle: &ClientHandle,
        room_id: &str,
    ) -> Result<(), RoomError> {
        let (room, filled) = self
            .rooms
            .lock()
            .await
            .join(room_id, handle.username.clone())?;

        if filled {
            if let Some((p1, p2)) = room.players() {
                info!(room_id = %room.id, player1 = %p1, player2 = %p2, "room filled, starting game");
                self.start_session(p1, p2, false, Some(room.id.clone())).await;
            }
        } else {
            handle.send(ServerMessage::RoomJoined {
                room_id: room.id.clone(),
                room: room.to_json(),
            });
        }
        Ok(())
    }

    // Sessions

    /// Create a session, register it, attach whatever connections the players
    /// currently have, notify them, and start the bot driver if needed.
    async fn start_session(
        self: &Arc<Self>,
        player1: String,
        player2: String,
        with_bot: bool,
        room_id: Option<String>,
    ) {
        let bot_side = with_bot.then_some(Side::Two);
        let session = Session::new(
            next_session_id(),
            player1.clone(),
            player2.clone(),
            bot_side,
            self.config.rows,
            self.config.cols,
        );
        let game_id = session.id.clone();
        let shared = SharedSession::new(session);
        self.sessions.lock().await.insert(shared.clone());

        if let Some(room_id) = &room_id {
            self.rooms.lock().await.set_game(room_id, game_id.clone());
        }

        let (h1, h2) = {
            let connections = self.connections.lock().await;
            let h2 = if with_bot { None } else { connections.get(&player2) };
            (connections.get(&player1), h2)
        };

        {
            let mut state = shared.state.lock().await;
            let snapshot = state.snapshot();
            match &h1 {
                Some(handle) => {
                    state.attach(handle.clone());
                    handle.send(ServerMessage::Start {
                        game_id: game_id.clone(),
                        you: 1,
                        opponent: player2.clone(),
                        state: snapshot.clone(),
                    });
                }
                // Matching proceeds even for a dropped player; the forfeit
                // path governs from here.
                None => self.spawn_forfeit_timer(shared.clone(), player1.clone()),
            }
            if !with_bot {
                match &h2 {
                    Some(handle) => {
                        state.attach(handle.clone());
                        handle.send(ServerMessage::Start {
                            game_id: game_id.clone(),
                            you: 2,
                            opponent: player1.clone(),
                            state: snapshot,
                        });
                    }
                    None => self.spawn_forfeit_timer(shared.clone(), player2.clone()),
                }
            }
        }

        info!(game_id = %game_id, player1 = %player1, player2 = %player2, bot = with_bot, "session started");

        if with_bot {
            self.spawn_bot_driver(shared);
        }
    }

    /// Look up a session by id.
    pub async fn find_session(&self, id: &str) -> Option<Arc<SharedSession>> {
        self.sessions.lock().await.get(id)
    }

    /// Apply one move to a session. Serialized by the session's lock; the bot
    /// and humans share this exact path.
    pub async fn apply_move(self: &Arc<Self>, session: &Arc<SharedSession>, col: usize) {
        let finished = {
            let mut state = session.state.lock().await;
            match state.apply_move(col) {
                MoveOutcome::Ignored => {
                    debug!(game_id = %session.id, col, "move ignored");
                    false
                }
                MoveOutcome::Placed { col, side, .. } => {
                    self.events.emit(&GameEvent::Move {
                        game_id: session.id.clone(),
                        col,
                        side,
                    });
                    broadcast_state(&state);
                    false
                }
                MoveOutcome::Finished { record, reason } => {
                    self.finalize(&state, record, reason);
                    true
                }
            }
        };

        session.wake.notify_one();
        if finished {
            self.rooms.lock().await.finish_by_game(&session.id);
        }
    }

    /// Terminal-path bookkeeping, under the session lock: persist the record,
    /// emit the finished event, then broadcast the new state, strictly in
    /// that order, so no client learns "finished" before the record exists.
    fn finalize(&self, state: &Session, record: GameRecord, reason: FinishReason) {
        if let Err(err) = self.storage.save_game(&record) {
            warn!(%err, game_id = %record.id, "failed to persist game record");
        }
        if let Err(err) = self.storage.increment_winner(&record.winner) {
            warn!(%err, winner = %record.winner, "failed to update leaderboard");
        }
        self.events.emit(&GameEvent::GameFinished {
            record: record.clone(),
            reason,
        });
        broadcast_state(state);
        info!(game_id = %record.id, winner = %record.winner, ?reason, "session finished");
    }

    /// Schedule the forfeit check for a player who is absent from a live
    /// match. On fire, re-validates: a reconnect or an already-finished game
    /// makes this a no-op.
    fn spawn_forfeit_timer(self: &Arc<Self>, session: Arc<SharedSession>, username: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(engine.config.reconnect_grace).await;

            let finished = {
                let mut state = session.state.lock().await;
                if !state.status.is_playing() || state.is_attached(&username) {
                    false
                } else if let Some(record) = state.forfeit(&username) {
                    info!(username = %username, game_id = %session.id, "player failed to reconnect, forfeiting");
                    engine.finalize(&state, record, FinishReason::Forfeit);
                    true
                } else {
                    false
                }
            };

            session.wake.notify_one();
            if finished {
                engine.rooms.lock().await.finish_by_game(&session.id);
            }
        });
    }

    /// Drive the bot's turns for one session. Event-driven: sleeps on the
    /// session's wake signal until a move lands, then plays if entitled to.
    fn spawn_bot_driver(self: &Arc<Self>, session: Arc<SharedSession>) {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                let decision = {
                    let state = session.state.lock().await;
                    if !state.status.is_playing() {
                        return;
                    }
                    match state.bot_side {
                        Some(side) if state.is_bot_turn() => {
                            Some(bot::next_move(&state.board, side))
                        }
                        _ => None,
                    }
                };

                match decision {
                    Some(col) => {
                        debug!(game_id = %session.id, col, "bot plays");
                        engine.apply_move(&session, col).await;
                    }
                    None => session.wake.notified().await,
                }
            }
        });
    }

    // Reaper

    /// Start the periodic sweep.
    pub fn spawn_reaper(self: &Arc<Self>) {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.reaper_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.reap().await;
            }
        });
    }

    /// One sweep. Each responsibility is independently idempotent: evict
    /// long-finished sessions, stale waiting rooms, and finished rooms whose
    /// session is already gone (session eviction is the source of truth).
    pub async fn reap(&self) {
        let now = Utc::now();
        let retention = chrono::Duration::seconds(self.config.session_retention.as_secs() as i64);
        let stale_after = chrono::Duration::seconds(self.config.room_stale_after.as_secs() as i64);

        // Snapshot handles first; never hold the table lock while taking
        // per-session locks.
        let handles = self.sessions.lock().await.handles();
        let mut expired = Vec::new();
        let mut live = Vec::new();
        for session in handles {
            let state = session.state.lock().await;
            match state.finished_age(now) {
                Some(age) if age > retention => expired.push(session.id.clone()),
                _ => live.push(session.id.clone()),
            }
        }

        if !expired.is_empty() {
            let mut sessions = self.sessions.lock().await;
            for id in &expired {
                sessions.remove(id);
                info!(game_id = %id, "evicted finished session");
            }
        }

        let mut rooms = self.rooms.lock().await;
        for id in rooms.evict_stale_waiting(now, stale_after) {
            info!(room_id = %id, "evicted stale waiting room");
        }
        for id in rooms.evict_finished(|game_id| live.iter().any(|l| l == game_id)) {
            info!(room_id = %id, "evicted finished room");
        }
    }

    // Snapshot reads for the listing endpoints

    pub async fn waiting_rooms(&self) -> Vec<RoomInfo> {
        self.rooms.lock().await.waiting_rooms()
    }

    pub fn leaderboard(&self) -> Result<Leaderboard, StoreError> {
        self.storage.leaderboard()
    }
}

/// Push the full session state to every attached connection.
fn broadcast_state(state: &Session) {
    for handle in state.attached() {
        let you = state
            .side_of(&handle.username)
            .map(Side::as_num)
            .unwrap_or(0);
        handle.send(ServerMessage::State {
            game_id: state.id.clone(),
            state: state.snapshot(),
            you,
            status: state.status.as_str().to_string(),
            result: state.result_str().to_string(),
        });
    }
}
