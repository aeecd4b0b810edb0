//! Room registry.
//!
//! Rooms are the player-initiated pairing path: a creator opens a named room,
//! a second player joins, and a game session starts the instant both slots
//! fill. Stale waiting rooms and finished rooms whose session is gone are
//! reaped periodically.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Rooms hold exactly two players.
pub const ROOM_MAX_PLAYERS: usize = 2;

/// Room lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomStatus {
    #[default]
    Waiting,
    Playing,
    Finished,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Playing => "playing",
            Self::Finished => "finished",
        }
    }
}

/// Room errors, surfaced to the client as error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,
    #[error("room is not available")]
    NotAvailable,
    #[error("room is full")]
    Full,
}

/// A named two-slot pairing room.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub creator: String,
    pub player1: Option<String>,
    pub player2: Option<String>,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
    /// Back-reference to the session started from this room.
    pub game_id: Option<String>,
}

impl Room {
    /// Create a room with the creator occupying the first slot. An empty name
    /// defaults to a creator-derived label.
    pub fn new(id: String, creator: String, name: Option<String>) -> Self {
        let name = match name {
            Some(n) if !n.is_empty() => n,
            _ => format!("{}'s room", creator),
        };
        Self {
            id,
            name,
            player1: Some(creator.clone()),
            player2: None,
            creator,
            status: RoomStatus::Waiting,
            created_at: Utc::now(),
            game_id: None,
        }
    }

    pub fn player_count(&self) -> usize {
        self.player1.iter().count() + self.player2.iter().count()
    }

    pub fn is_full(&self) -> bool {
        self.player1.is_some() && self.player2.is_some()
    }

    /// Occupy the first free slot. Returns `true` if the room just filled,
    /// which transitions it to `playing`.
    pub fn join(&mut self, username: String) -> Result<bool, RoomError> {
        if self.status != RoomStatus::Waiting {
            return Err(RoomError::NotAvailable);
        }
        if self.player1.is_none() {
            self.player1 = Some(username);
        } else if self.player2.is_none() {
            self.player2 = Some(username);
        } else {
            return Err(RoomError::Full);
        }

        if self.is_full() {
            self.status = RoomStatus::Playing;
            return Ok(true);
        }
        Ok(false)
    }

    /// Both occupants, once the room is full.
    pub fn players(&self) -> Option<(String, String)> {
        match (&self.player1, &self.player2) {
            (Some(p1), Some(p2)) => Some((p1.clone(), p2.clone())),
            _ => None,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }

    /// Wire payload for `room_created` / `room_joined`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "creator": self.creator,
            "player1": self.player1,
            "player2": self.player2,
            "status": self.status.as_str(),
            "gameId": self.game_id,
            "createdAt": self.created_at,
        })
    }
}

/// Listing entry for the rooms endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomInfo {
    pub id: String,
    pub name: String,
    pub creator: String,
    pub players: usize,
    #[serde(rename = "maxPlayers")]
    pub max_players: usize,
    pub status: String,
}

/// Room table: id to room.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a room for a creator; returns a copy of the new room.
    pub fn create(&mut self, creator: String, name: Option<String>) -> Room {
        let room = Room::new(next_room_id(), creator, name);
        self.rooms.insert(room.id.clone(), room.clone());
        room
    }

    pub fn get(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    /// Occupy a free slot in a room. Returns the room as it now stands and
    /// whether this join filled it.
    pub fn join(&mut self, id: &str, username: String) -> Result<(Room, bool), RoomError> {
        let room = self.rooms.get_mut(id).ok_or(RoomError::NotFound)?;
        let filled = room.join(username)?;
        Ok((room.clone(), filled))
    }

    /// Record the session started from a room.
    pub fn set_game(&mut self, id: &str, game_id: String) {
        if let Some(room) = self.rooms.get_mut(id) {
            room.game_id = Some(game_id);
        }
    }

    /// Mark the room linked to a finished session.
    pub fn finish_by_game(&mut self, game_id: &str) -> Option<String> {
        let room = self
            .rooms
            .values_mut()
            .find(|r| r.game_id.as_deref() == Some(game_id))?;
        room.status = RoomStatus::Finished;
        Some(room.id.clone())
    }

    /// Snapshot of rooms still waiting for players, for the listing endpoint.
    pub fn waiting_rooms(&self) -> Vec<RoomInfo> {
        self.rooms
            .values()
            .filter(|r| r.status == RoomStatus::Waiting)
            .map(|r| RoomInfo {
                id: r.id.clone(),
                name: r.name.clone(),
                creator: r.creator.clone(),
                players: r.player_count(),
                max_players: ROOM_MAX_PLAYERS,
                status: r.status.as_str().to_string(),
            })
            .collect()
    }

    /// Evict rooms still `waiting` past the staleness window.
    pub fn evict_stale_waiting(
        &mut self,
        now: DateTime<Utc>,
        max_age: chrono::Duration,
    ) -> Vec<String> {
        let stale: Vec<String> = self
            .rooms
            .values()
            .filter(|r| r.status == RoomStatus::Waiting && r.age(now) > max_age)
            .map(|r| r.id.clone())
            .collect();
        for id in &stale {
            self.rooms.remove(id);
        }
        stale
    }

    /// Evict `finished` rooms whose linked session has already been evicted.
    /// Session eviction is the source of truth, so rooms whose session still
    /// exists are kept for now.
    pub fn evict_finished<F>(&mut self, session_exists: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let orphaned: Vec<String> = self
            .rooms
            .values()
            .filter(|r| {
                r.status == RoomStatus::Finished
                    && !r.game_id.as_deref().is_some_and(&session_exists)
            })
            .map(|r| r.id.clone())
            .collect();
        for id in &orphaned {
            self.rooms.remove(id);
        }
        orphaned
    }

    pub fn count(&self) -> usize {
        self.rooms.len()
    }
}

/// Allocate a room identifier.
pub fn next_room_id() -> String {
    format!("r_{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_room_waiting_with_creator() {
        let mut registry = RoomRegistry::new();
        let room = registry.create("alice".to_string(), Some("showdown".to_string()));

        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(room.name, "showdown");
        assert_eq!(room.player1.as_deref(), Some("alice"));
        assert_eq!(room.player_count(), 1);
        assert!(registry.get(&room.id).is_some());
    }

    #[test]
    fn test_empty_name_defaults_to_creator_label() {
        let room = Room::new("r_1".to_string(), "alice".to_string(), None);
        assert_eq!(room.name, "alice's room");

        let room = Room::new("r_2".to_string(), "alice".to_string(), Some(String::new()));
        assert_eq!(room.name, "alice's room");
    }

    #[test]
    fn test_second_join_fills_and_starts() {
        let mut registry = RoomRegistry::new();
        let room = registry.create("alice".to_string(), None);

        let (room, filled) = registry.join(&room.id, "bob".to_string()).unwrap();
        assert!(filled);
        assert_eq!(room.status, RoomStatus::Playing);
        assert_eq!(room.players(), Some(("alice".to_string(), "bob".to_string())));
    }

    #[test]
    fn test_join_missing_room() {
        let mut registry = RoomRegistry::new();
        assert_eq!(
            registry.join("r_missing", "bob".to_string()),
            Err(RoomError::NotFound)
        );
    }

    #[test]
    fn test_third_join_rejected() {
        let mut registry = RoomRegistry::new();
        let room = registry.create("alice".to_string(), None);
        registry.join(&room.id, "bob".to_string()).unwrap();

        // Room is now playing, so the state check fires first
        assert_eq!(
            registry.join(&room.id, "carol".to_string()),
            Err(RoomError::NotAvailable)
        );
    }

    #[test]
    fn test_full_waiting_room_rejects_join() {
        let mut room = Room::new("r_1".to_string(), "alice".to_string(), None);
        room.player2 = Some("bob".to_string());
        // Still waiting but both slots taken
        assert_eq!(room.join("carol".to_string()), Err(RoomError::Full));
    }

    #[test]
    fn test_waiting_rooms_listing() {
        let mut registry = RoomRegistry::new();
        let open = registry.create("alice".to_string(), None);
        let started = registry.create("bob".to_string(), None);
        registry.join(&started.id, "carol".to_string()).unwrap();

        let listing = registry.waiting_rooms();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].id, open.id);
        assert_eq!(listing[0].players, 1);
        assert_eq!(listing[0].max_players, ROOM_MAX_PLAYERS);
    }

    #[test]
    fn test_evict_stale_waiting() {
        let mut registry = RoomRegistry::new();
        let room = registry.create("alice".to_string(), None);

        // Not yet stale
        let evicted = registry.evict_stale_waiting(Utc::now(), chrono::Duration::minutes(10));
        assert!(evicted.is_empty());

        // Judge the same room against a later clock
        let later = Utc::now() + chrono::Duration::minutes(11);
        let evicted = registry.evict_stale_waiting(later, chrono::Duration::minutes(10));
        assert_eq!(evicted, vec![room.id]);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_evict_finished_waits_for_session_eviction() {
        let mut registry = RoomRegistry::new();
        let room = registry.create("alice".to_string(), None);
        registry.join(&room.id, "bob".to_string()).unwrap();
        registry.set_game(&room.id, "g_1".to_string());
        registry.finish_by_game("g_1");

        // Session still present: room survives
        let evicted = registry.evict_finished(|id| id == "g_1");
        assert!(evicted.is_empty());
        assert_eq!(registry.count(), 1);

        // Session evicted: room follows
        let evicted = registry.evict_finished(|_| false);
        assert_eq!(evicted, vec![room.id.clone()]);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_finish_by_game() {
        let mut registry = RoomRegistry::new();
        let room = registry.create("alice".to_string(), None);
        registry.join(&room.id, "bob".to_string()).unwrap();
        registry.set_game(&room.id, "g_9".to_string());

        assert_eq!(registry.finish_by_game("g_9"), Some(room.id.clone()));
        assert_eq!(registry.get(&room.id).unwrap().status, RoomStatus::Finished);
        assert!(registry.finish_by_game("g_missing").is_none());
    }
}
