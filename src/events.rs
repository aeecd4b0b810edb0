//! Analytics event sink.
//!
//! Structured game/move events for offline analytics. Emission is
//! best-effort: failures are logged and never bubble back into game logic.
//! A broker-backed sink (the production analytics pipeline) plugs in behind
//! [`EventSink`]; this crate ships the JSONL file sink.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::warn;

use crate::state::board::Side;
use crate::state::session::{FinishReason, GameRecord};

/// Events emitted by the game core.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// A move was applied without finishing the game.
    Move {
        game_id: String,
        col: usize,
        side: Side,
    },
    /// A session reached a terminal state; carries the persisted record.
    GameFinished {
        record: GameRecord,
        reason: FinishReason,
    },
}

impl GameEvent {
    /// Wire form. Finished games note a forfeit explicitly; win and draw are
    /// readable off the record itself.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Move { game_id, col, side } => serde_json::json!({
                "type": "move",
                "gameId": game_id,
                "col": col,
                "player": side.as_num(),
            }),
            Self::GameFinished { record, reason } => {
                let mut event = serde_json::json!({
                    "type": "game_finished",
                    "game": record,
                });
                if *reason == FinishReason::Forfeit {
                    event["reason"] = serde_json::json!("forfeit");
                }
                event
            }
        }
    }
}

/// Sink for game events. Best-effort; no delivery guarantee required.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &GameEvent);
}

/// Appends events to a JSONL file, one timestamped object per line.
#[derive(Debug)]
pub struct FileEventSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileEventSink {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("events.jsonl"),
            lock: Mutex::new(()),
        }
    }
}

impl EventSink for FileEventSink {
    fn emit(&self, event: &GameEvent) {
        let mut json = event.to_json();
        json["timestamp"] = serde_json::json!(Utc::now().to_rfc3339());

        let _guard = self.lock.lock().expect("event sink lock poisoned");
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{}", json));
        if let Err(err) = result {
            warn!(%err, path = %self.path.display(), "failed to append event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record() -> GameRecord {
        let now = Utc::now();
        GameRecord {
            id: "g_1".to_string(),
            player1: "alice".to_string(),
            player2: "bob".to_string(),
            winner: "alice".to_string(),
            duration_secs: 12,
            started_at: now,
            ended_at: now,
        }
    }

    #[test]
    fn test_move_event_shape() {
        let event = GameEvent::Move {
            game_id: "g_1".to_string(),
            col: 3,
            side: Side::Two,
        };
        let json = event.to_json();
        assert_eq!(json["type"], "move");
        assert_eq!(json["gameId"], "g_1");
        assert_eq!(json["col"], 3);
        assert_eq!(json["player"], 2);
    }

    #[test]
    fn test_forfeit_carries_reason() {
        let event = GameEvent::GameFinished {
            record: record(),
            reason: FinishReason::Forfeit,
        };
        assert_eq!(event.to_json()["reason"], "forfeit");

        let event = GameEvent::GameFinished {
            record: record(),
            reason: FinishReason::Win,
        };
        assert!(event.to_json().get("reason").is_none());
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileEventSink::new(dir.path());

        sink.emit(&GameEvent::Move {
            game_id: "g_1".to_string(),
            col: 0,
            side: Side::One,
        });
        sink.emit(&GameEvent::GameFinished {
            record: record(),
            reason: FinishReason::Win,
        });

        let contents = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "move");
        assert!(first["timestamp"].is_string());

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "game_finished");
        assert_eq!(second["game"]["winner"], "alice");
    }
}
