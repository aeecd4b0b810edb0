//! Wire protocol messages.
//!
//! Inbound and outbound payloads are closed tagged unions over the finite set
//! of recognized message types. Anything outside the set fails to parse and is
//! rejected explicitly rather than silently ignored. Field names stay
//! camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Messages a client may send.
///
/// The first message on a new connection must be `join`, `create_room`, or
/// `join_room`; `move` is only meaningful once a session exists.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        username: String,
        /// Resume an existing session by id.
        #[serde(default, rename = "gameId")]
        game_id: Option<String>,
    },
    CreateRoom {
        username: String,
        #[serde(default, rename = "roomName")]
        room_name: Option<String>,
    },
    JoinRoom {
        username: String,
        #[serde(rename = "roomId")]
        room_id: String,
    },
    Move {
        #[serde(default, rename = "gameId")]
        game_id: Option<String>,
        col: usize,
    },
}

impl ClientMessage {
    /// Whether this message type may open a connection.
    pub fn admits_connection(&self) -> bool {
        !matches!(self, Self::Move { .. })
    }

    /// The username carried by admission messages.
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Join { username, .. }
            | Self::CreateRoom { username, .. }
            | Self::JoinRoom { username, .. } => Some(username),
            Self::Move { .. } => None,
        }
    }
}

/// Messages pushed to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Entered the matchmaking queue; `timeout` is the wait in seconds.
    Waiting { timeout: u64 },
    /// A session started; `you` is the recipient's side (1 or 2).
    Start {
        #[serde(rename = "gameId")]
        game_id: String,
        you: u8,
        opponent: String,
        state: serde_json::Value,
    },
    /// Full board/turn/status snapshot, pushed after every applied move.
    State {
        #[serde(rename = "gameId")]
        game_id: String,
        state: serde_json::Value,
        you: u8,
        status: String,
        result: String,
    },
    /// Re-attached to a still-running session.
    Reconnected {
        #[serde(rename = "gameId")]
        game_id: String,
        state: serde_json::Value,
    },
    RoomCreated {
        #[serde(rename = "roomId")]
        room_id: String,
        room: serde_json::Value,
    },
    RoomJoined {
        #[serde(rename = "roomId")]
        room_id: String,
        room: serde_json::Value,
    },
    Error { error: String },
}
