//! Durable store for finished games and the win-count leaderboard.
//!
//! The SQL-backed collaborator lives behind [`GameStore`]; this crate ships
//! the file-backed implementation used both standalone and as the fallback
//! path. A finished game's record must never be dropped: when the primary
//! store is degraded, [`Storage`] falls through to the file store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::warn;

use crate::state::session::{GameRecord, DRAW_RESULT};

/// Username to win count.
pub type Leaderboard = HashMap<String, u32>;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The collaborator is degraded or unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Interface to a durable store collaborator.
pub trait GameStore: Send + Sync {
    /// Persist one finished game record.
    fn save_game(&self, record: &GameRecord) -> Result<(), StoreError>;
    /// Bump the leaderboard counter for a winner. Draws and empty names are
    /// ignored.
    fn increment_winner(&self, username: &str) -> Result<(), StoreError>;
    /// Snapshot of the leaderboard.
    fn leaderboard(&self) -> Result<Leaderboard, StoreError>;
}

/// File-backed store: a `games.json` array and a `leaderboard.json` map.
///
/// Writes are whole-file and serialized by a lock, mirroring the small scale
/// this store is meant for. Missing or corrupt files read as empty rather
/// than failing.
#[derive(Debug)]
pub struct FileStore {
    games_path: PathBuf,
    leaderboard_path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) the store under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;
        let games_path = data_dir.join("games.json");
        let leaderboard_path = data_dir.join("leaderboard.json");
        if !games_path.exists() {
            fs::write(&games_path, "[]")?;
        }
        if !leaderboard_path.exists() {
            fs::write(&leaderboard_path, "{}")?;
        }
        Ok(Self {
            games_path,
            leaderboard_path,
            lock: Mutex::new(()),
        })
    }

    fn read_games(&self) -> Vec<GameRecord> {
        fs::read(&self.games_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    fn read_leaderboard(&self) -> Leaderboard {
        fs::read(&self.leaderboard_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    /// All persisted game records, oldest first.
    pub fn games(&self) -> Vec<GameRecord> {
        let _guard = self.lock.lock().expect("store lock poisoned");
        self.read_games()
    }
}

impl GameStore for FileStore {
    fn save_game(&self, record: &GameRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().expect("store lock poisoned");
        let mut games = self.read_games();
        games.push(record.clone());
        fs::write(&self.games_path, serde_json::to_vec_pretty(&games)?)?;
        Ok(())
    }

    fn increment_winner(&self, username: &str) -> Result<(), StoreError> {
        if username.is_empty() || username == DRAW_RESULT {
            return Ok(());
        }
        let _guard = self.lock.lock().expect("store lock poisoned");
        let mut leaderboard = self.read_leaderboard();
        *leaderboard.entry(username.to_string()).or_insert(0) += 1;
        fs::write(
            &self.leaderboard_path,
            serde_json::to_vec_pretty(&leaderboard)?,
        )?;
        Ok(())
    }

    fn leaderboard(&self) -> Result<Leaderboard, StoreError> {
        let _guard = self.lock.lock().expect("store lock poisoned");
        Ok(self.read_leaderboard())
    }
}

/// Primary store with a local file fallback.
///
/// Every operation tries the primary first and falls through to the file
/// store on failure, so a degraded collaborator costs durability guarantees
/// nothing.
pub struct Storage {
    primary: Option<Box<dyn GameStore>>,
    fallback: FileStore,
}

impl Storage {
    /// File-backed only (no external store configured).
    pub fn file_only(fallback: FileStore) -> Self {
        Self {
            primary: None,
            fallback,
        }
    }

    /// External primary store with the file store as fallback.
    pub fn with_primary(primary: Box<dyn GameStore>, fallback: FileStore) -> Self {
        Self {
            primary: Some(primary),
            fallback,
        }
    }

    pub fn save_game(&self, record: &GameRecord) -> Result<(), StoreError> {
        if let Some(primary) = &self.primary {
            match primary.save_game(record) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(%err, game_id = %record.id, "primary store failed, using file fallback");
                }
            }
        }
        self.fallback.save_game(record)
    }

    pub fn increment_winner(&self, username: &str) -> Result<(), StoreError> {
        if let Some(primary) = &self.primary {
            match primary.increment_winner(username) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(%err, "primary store failed, using file fallback");
                }
            }
        }
        self.fallback.increment_winner(username)
    }

    pub fn leaderboard(&self) -> Result<Leaderboard, StoreError> {
        if let Some(primary) = &self.primary {
            match primary.leaderboard() {
                Ok(leaderboard) => return Ok(leaderboard),
                Err(err) => {
                    warn!(%err, "primary store failed, reading file fallback");
                }
            }
        }
        self.fallback.leaderboard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn record(id: &str, winner: &str) -> GameRecord {
        let now = Utc::now();
        GameRecord {
            id: id.to_string(),
            player1: "alice".to_string(),
            player2: "bob".to_string(),
            winner: winner.to_string(),
            duration_secs: 30,
            started_at: now,
            ended_at: now,
        }
    }

    #[test]
    fn test_save_and_reload_games() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.save_game(&record("g_1", "alice")).unwrap();
        store.save_game(&record("g_2", "bob")).unwrap();

        let games = store.games();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].id, "g_1");
        assert_eq!(games[1].winner, "bob");
    }

    #[test]
    fn test_increment_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.increment_winner("alice").unwrap();
        store.increment_winner("alice").unwrap();
        store.increment_winner("bob").unwrap();

        let lb = store.leaderboard().unwrap();
        assert_eq!(lb.get("alice"), Some(&2));
        assert_eq!(lb.get("bob"), Some(&1));
    }

    #[test]
    fn test_draw_and_empty_never_counted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.increment_winner(DRAW_RESULT).unwrap();
        store.increment_winner("").unwrap();

        assert!(store.leaderboard().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("games.json"), "not json").unwrap();
        fs::write(dir.path().join("leaderboard.json"), "{{{{").unwrap();

        assert!(store.games().is_empty());
        assert!(store.leaderboard().unwrap().is_empty());

        // And writes still work afterwards
        store.save_game(&record("g_1", "alice")).unwrap();
        assert_eq!(store.games().len(), 1);
    }

    struct BrokenStore;

    impl GameStore for BrokenStore {
        fn save_game(&self, _record: &GameRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn increment_winner(&self, _username: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn leaderboard(&self) -> Result<Leaderboard, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[test]
    fn test_degraded_primary_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = FileStore::open(dir.path()).unwrap();
        let storage = Storage::with_primary(Box::new(BrokenStore), fallback);

        // Record lands in the fallback instead of being dropped
        storage.save_game(&record("g_1", "alice")).unwrap();
        storage.increment_winner("alice").unwrap();

        let lb = storage.leaderboard().unwrap();
        assert_eq!(lb.get("alice"), Some(&1));
    }
}
