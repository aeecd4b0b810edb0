//! Gridfall: a real-time two-player connect-four backend.
//!
//! Players pair up through a timed matchmaking queue or through named rooms;
//! a lone player falls back to a bot opponent. Each match runs as a game
//! session with reconnect grace, forfeit on abandonment, and durable records
//! for finished games. A periodic reaper evicts finished sessions and stale
//! rooms.
//!
//! The crate splits along one seam: [`state`] is pure, synchronous game and
//! matchmaking logic; [`engine`] wraps it in locks and timers; [`server`]
//! exposes it over a websocket plus two listing endpoints.

pub mod config;
pub mod engine;
pub mod events;
pub mod message;
pub mod server;
pub mod state;
pub mod store;

pub use config::Config;
pub use engine::Engine;
