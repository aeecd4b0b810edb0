//! Matchmaking queue.
//!
//! A FIFO of waiting players. Entries are append-only until consumed: a
//! deferred evaluation fires once per enqueue after the configured wait and
//! either pairs its player with the oldest other waiter or hands the lone
//! remaining player to a bot game. The evaluation must re-validate that its
//! entry is still queued on wake, since a concurrent pairing may have
//! consumed it already; stale timers become no-ops. Pairing always involves
//! the evaluating player's own entry, so no firing order can strand an entry
//! whose timer has already been spent.

use std::time::Instant;

/// A waiting player.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub username: String,
    pub enqueued_at: Instant,
}

/// FIFO queue of players waiting for an opponent.
#[derive(Debug, Default)]
pub struct MatchQueue {
    waiting: Vec<QueueEntry>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a player to the tail of the queue.
    pub fn enqueue(&mut self, username: String) {
        self.waiting.push(QueueEntry {
            username,
            enqueued_at: Instant::now(),
        });
    }

    /// Whether a player is still queued. The revalidation step for deferred
    /// evaluations.
    pub fn contains(&self, username: &str) -> bool {
        self.waiting.iter().any(|e| e.username == username)
    }

    /// Pop `username` and the oldest other waiter as a pair, in arrival
    /// order. `None` if the player is no longer queued or waits alone.
    pub fn take_pair_with(&mut self, username: &str) -> Option<(QueueEntry, QueueEntry)> {
        let me = self.waiting.iter().position(|e| e.username == username)?;
        let other = (0..self.waiting.len()).find(|&i| i != me)?;

        let (first_idx, second_idx) = if other < me { (other, me) } else { (me, other) };
        let second = self.waiting.remove(second_idx);
        let first = self.waiting.remove(first_idx);
        Some((first, second))
    }

    /// Remove a specific player's entry.
    pub fn take(&mut self, username: &str) -> Option<QueueEntry> {
        let idx = self.waiting.iter().position(|e| e.username == username)?;
        Some(self.waiting.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}
