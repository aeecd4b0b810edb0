//! Process configuration.
//!
//! Loaded from environment variables with sensible defaults; timer-driven
//! subsystems (matchmaking wait, reconnect grace, reaper windows) all read
//! their durations from here so there is exactly one source of truth for
//! each.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::state::board::{DEFAULT_COLS, DEFAULT_ROWS};

/// Configuration for the whole process.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port for the websocket/HTTP listener.
    pub port: u16,
    /// Directory for the file-backed store and event log.
    pub data_dir: PathBuf,
    /// Board height.
    pub rows: usize,
    /// Board width.
    pub cols: usize,
    /// How long an enqueued player waits before the matchmaking evaluation
    /// fires. The only matchmaking wait constant in the system.
    pub match_wait: Duration,
    /// Grace period a disconnected player has to reconnect before forfeiting.
    pub reconnect_grace: Duration,
    /// Interval between reaper sweeps.
    pub reaper_interval: Duration,
    /// How long a finished session is retained for late state queries.
    pub session_retention: Duration,
    /// How long a room may sit in `waiting` before it is reaped.
    pub room_stale_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: PathBuf::from("data"),
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            match_wait: Duration::from_secs(15),
            reconnect_grace: Duration::from_secs(30),
            reaper_interval: Duration::from_secs(5),
            session_retention: Duration::from_secs(10 * 60),
            room_stale_after: Duration::from_secs(10 * 60),
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("GRIDFALL_PORT", defaults.port),
            data_dir: PathBuf::from(env_or("GRIDFALL_DATA_DIR", "data")),
            rows: env_parse("GRIDFALL_ROWS", defaults.rows),
            cols: env_parse("GRIDFALL_COLS", defaults.cols),
            match_wait: Duration::from_secs(env_parse(
                "GRIDFALL_MATCH_WAIT_SECS",
                defaults.match_wait.as_secs(),
            )),
            reconnect_grace: Duration::from_secs(env_parse(
                "GRIDFALL_RECONNECT_GRACE_SECS",
                defaults.reconnect_grace.as_secs(),
            )),
            ..defaults
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
