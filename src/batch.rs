//! Per-room accumulators for cursor and reaction broadcasts.
//!
//! Producers append between flush ticks; the 100 ms flusher swaps each
//! accumulator out, releases the locks, then broadcasts. Cursors keep one
//! entry per user (last write wins, first-seen order); reactions are
//! append-only.

use crate::types::{Cursor, Reaction};
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type Accum<T> = Arc<Mutex<Vec<T>>>;

#[derive(Default)]
pub struct Batcher {
    cursors: RwLock<HashMap<String, Accum<Cursor>>>,
    reactions: RwLock<HashMap<String, Accum<Reaction>>>,
}

fn push_cursor(accum: &mut Vec<Cursor>, cursor: Cursor) {
    if let Some(existing) = accum.iter_mut().find(|c| c.user_id == cursor.user_id) {
        *existing = cursor;
    } else {
        accum.push(cursor);
    }
}

impl Batcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn queue_cursor(&self, room_id: &str, cursor: Cursor) {
        {
            let map = self.cursors.read().await;
            if let Some(accum) = map.get(room_id) {
                push_cursor(&mut *accum.lock().await, cursor);
                return;
            }
        }
        // First update for this room since the last flush; insert the
        // accumulator under the write lock so a concurrent flush cannot
        // orphan it.
        let mut map = self.cursors.write().await;
        let accum = map.entry(room_id.to_string()).or_default();
        push_cursor(&mut *accum.lock().await, cursor);
    }

    pub async fn queue_reaction(&self, room_id: &str, reaction: Reaction) {
        {
            let map = self.reactions.read().await;
            if let Some(accum) = map.get(room_id) {
                accum.lock().await.push(reaction);
                return;
            }
        }
        let mut map = self.reactions.write().await;
        let accum = map.entry(room_id.to_string()).or_default();
        accum.lock().await.push(reaction);
    }

    /// Swaps out all pending cursor batches. Rooms with nothing pending are
    /// skipped.
    pub async fn drain_cursors(&self) -> Vec<(String, Vec<Cursor>)> {
        let rooms = mem::take(&mut *self.cursors.write().await);
        let mut out = Vec::new();
        for (room_id, accum) in rooms {
            let batch = mem::take(&mut *accum.lock().await);
            if !batch.is_empty() {
                out.push((room_id, batch));
            }
        }
        out
    }

    pub async fn drain_reactions(&self) -> Vec<(String, Vec<Reaction>)> {
        let rooms = mem::take(&mut *self.reactions.write().await);
        let mut out = Vec::new();
        for (room_id, accum) in rooms {
            let batch = mem::take(&mut *accum.lock().await);
            if !batch.is_empty() {
                out.push((room_id, batch));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_ms;

    fn cursor(user_id: &str, x: f64) -> Cursor {
        Cursor {
            user_id: user_id.to_string(),
            city: "Berlin".to_string(),
            flag: "\u{1F1E9}\u{1F1EA}".to_string(),
            x,
            y: 50.0,
            timestamp: now_ms(),
        }
    }

    fn reaction(user_id: &str, emoji: &str) -> Reaction {
        Reaction {
            id: crate::utils::new_reaction_id(),
            user_id: user_id.to_string(),
            city: "Berlin".to_string(),
            flag: "\u{1F1E9}\u{1F1EA}".to_string(),
            emoji: emoji.to_string(),
            x: 10.0,
            y: 10.0,
            video_time: 1.0,
            timestamp: now_ms(),
        }
    }

    #[tokio::test]
    async fn test_cursor_last_write_wins_per_user() {
        let batcher = Batcher::new();
        batcher.queue_cursor("r1", cursor("u1", 1.0)).await;
        batcher.queue_cursor("r1", cursor("u2", 2.0)).await;
        batcher.queue_cursor("r1", cursor("u1", 99.0)).await;

        let mut drained = batcher.drain_cursors().await;
        assert_eq!(drained.len(), 1);
        let (room_id, batch) = drained.pop().unwrap();
        assert_eq!(room_id, "r1");
        assert_eq!(batch.len(), 2, "one entry per user");
        // u1 keeps its first-seen slot but carries the latest position
        assert_eq!(batch[0].user_id, "u1");
        assert_eq!(batch[0].x, 99.0);
        assert_eq!(batch[1].user_id, "u2");
    }

    #[tokio::test]
    async fn test_reactions_keep_insertion_order() {
        let batcher = Batcher::new();
        batcher.queue_reaction("r1", reaction("u1", "🔥")).await;
        batcher.queue_reaction("r1", reaction("u2", "😂")).await;
        batcher.queue_reaction("r1", reaction("u1", "👏")).await;

        let drained = batcher.drain_reactions().await;
        let batch = &drained[0].1;
        assert_eq!(batch.len(), 3, "reactions are append-only");
        let emojis: Vec<&str> = batch.iter().map(|r| r.emoji.as_str()).collect();
        assert_eq!(emojis, vec!["🔥", "😂", "👏"]);
    }

    #[tokio::test]
    async fn test_drain_clears_and_skips_empty() {
        let batcher = Batcher::new();
        assert!(batcher.drain_cursors().await.is_empty());

        batcher.queue_cursor("r1", cursor("u1", 1.0)).await;
        assert_eq!(batcher.drain_cursors().await.len(), 1);
        // Second flush has nothing
        assert!(batcher.drain_cursors().await.is_empty());
    }

    #[tokio::test]
    async fn test_rooms_are_independent() {
        let batcher = Batcher::new();
        batcher.queue_cursor("r1", cursor("u1", 1.0)).await;
        batcher.queue_cursor("r2", cursor("u1", 2.0)).await;

        let drained = batcher.drain_cursors().await;
        assert_eq!(drained.len(), 2);
        for (room_id, batch) in drained {
            assert_eq!(batch.len(), 1);
            match room_id.as_str() {
                "r1" => assert_eq!(batch[0].x, 1.0),
                "r2" => assert_eq!(batch[0].x, 2.0),
                other => panic!("unexpected room {}", other),
            }
        }
    }
}
