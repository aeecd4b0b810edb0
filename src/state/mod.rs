//! Pure game and matchmaking state.
//!
//! Everything in this module tree is synchronous data-structure logic with no
//! I/O: the board, the bot policy, session state machines, the matchmaking
//! queue, rooms, and the connection table. The engine layer owns the locks,
//! timers, and side effects around these.

pub mod board;
pub mod bot;
pub mod connection;
pub mod matchmaking;
pub mod room;
pub mod session;
