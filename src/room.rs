//! Authoritative room, membership, playback and cursor state.
//!
//! Everything lives behind the store port so any instance can serve any
//! room. Atomicity is per key; room teardown is best-effort across keys.

use crate::store::Store;
use crate::types::{Cursor, Room, User, VideoState, VideoStatePatch};
use crate::utils::now_ms;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Room-scoped keys expire after a day without writes.
const ROOM_TTL_SECS: u64 = 86_400;
/// Empty rooms younger than this survive the reaper, so a creator has time
/// to join.
const EMPTY_ROOM_GRACE_MS: u64 = 60_000;

pub const DEFAULT_ROOM_ID: &str = "main-lobby";
const ROOMS_ALL_KEY: &str = "rooms:all";

fn meta_key(id: &str) -> String {
    format!("room:{}:meta", id)
}

fn users_key(id: &str) -> String {
    format!("room:{}:users", id)
}

fn video_key(id: &str) -> String {
    format!("room:{}:video", id)
}

fn cursors_key(id: &str) -> String {
    format!("room:{}:cursors", id)
}

#[derive(Debug, Clone, Default)]
pub struct RoomOptions {
    pub name: Option<String>,
    pub max_users: Option<usize>,
    pub is_public: Option<bool>,
}

fn to_json<T: Serialize>(what: &str, value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Failed to serialize {}: {}", what, e);
            None
        }
    }
}

fn from_json<T: DeserializeOwned>(what: &str, json: &str) -> Option<T> {
    match serde_json::from_str(json) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to parse stored {}: {}", what, e);
            None
        }
    }
}

pub struct RoomManager {
    store: Arc<Store>,
}

impl RoomManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Idempotent create: a concurrent or repeated create for the same id
    /// keeps the first writer's room.
    pub async fn create_room(&self, id: &str, creator: &str, opts: RoomOptions) -> Room {
        if let Some(existing) = self.get_room(id).await {
            return existing;
        }
        let room = Room {
            id: id.to_string(),
            name: opts.name.unwrap_or_else(|| format!("Room {}", id)),
            created_by: creator.to_string(),
            created_at: now_ms(),
            max_users: opts.max_users.unwrap_or(10_000),
            is_public: opts.is_public.unwrap_or(true),
        };
        self.persist_room(&room).await;
        info!("Created room {} (creator: {})", room.id, room.created_by);
        room
    }

    async fn persist_room(&self, room: &Room) {
        let Some(json) = to_json("room", room) else {
            return;
        };
        self.store
            .hash_set(ROOMS_ALL_KEY, &room.id, &json, ROOM_TTL_SECS)
            .await;
        self.store
            .set_with_ttl(&meta_key(&room.id), &json, ROOM_TTL_SECS)
            .await;
    }

    pub async fn get_room(&self, id: &str) -> Option<Room> {
        let json = self.store.get(&meta_key(id)).await?;
        from_json("room", &json)
    }

    /// All rooms known to the store. In standalone mode this is limited to
    /// rooms this instance has seen.
    pub async fn get_all_rooms(&self) -> Vec<Room> {
        self.store
            .hash_get_all(ROOMS_ALL_KEY)
            .await
            .values()
            .filter_map(|json| from_json("room", json))
            .collect()
    }

    /// Removes every key belonging to the room. Individual failures do not
    /// abort the rest.
    pub async fn delete_room(&self, id: &str) {
        self.store.hash_del(ROOMS_ALL_KEY, id).await;
        self.store.delete(&meta_key(id)).await;
        self.store.delete(&users_key(id)).await;
        self.store.delete(&video_key(id)).await;
        self.store.delete(&cursors_key(id)).await;
        info!("Deleted room {}", id);
    }

    pub async fn add_user_to_room(&self, id: &str, user: &User) {
        let Some(json) = to_json("user", user) else {
            return;
        };
        self.store
            .hash_set(&users_key(id), &user.id, &json, ROOM_TTL_SECS)
            .await;
    }

    pub async fn remove_user_from_room(&self, id: &str, user_id: &str) {
        self.store.hash_del(&users_key(id), user_id).await;
        self.remove_cursor(id, user_id).await;
    }

    pub async fn get_room_users(&self, id: &str) -> HashMap<String, User> {
        self.store
            .hash_get_all(&users_key(id))
            .await
            .into_iter()
            .filter_map(|(uid, json)| from_json::<User>("user", &json).map(|u| (uid, u)))
            .collect()
    }

    pub async fn get_room_user_count(&self, id: &str) -> usize {
        self.store.hash_len(&users_key(id)).await
    }

    /// Current video state, defaulting to paused-at-zero when absent.
    pub async fn get_video_state(&self, id: &str) -> VideoState {
        if let Some(json) = self.store.get(&video_key(id)).await {
            if let Some(state) = from_json("video state", &json) {
                return state;
            }
        }
        let state = VideoState::initial(now_ms());
        self.persist_video_state(id, &state).await;
        state
    }

    async fn persist_video_state(&self, id: &str, state: &VideoState) {
        let Some(json) = to_json("video state", state) else {
            return;
        };
        self.store
            .set_with_ttl(&video_key(id), &json, ROOM_TTL_SECS)
            .await;
    }

    /// Merges the patch into the current state. `server_timestamp` is always
    /// overwritten with the write time; concurrent writers resolve
    /// last-wall-clock-write-wins at the store.
    pub async fn set_video_state(&self, id: &str, patch: VideoStatePatch) -> VideoState {
        let mut state = self.get_video_state(id).await;
        if let Some(is_playing) = patch.is_playing {
            state.is_playing = is_playing;
        }
        if let Some(current_time) = patch.current_time {
            state.current_time = current_time;
        }
        if let Some(duration) = patch.duration {
            state.duration = duration;
        }
        if let Some(last_update_time) = patch.last_update_time {
            state.last_update_time = last_update_time;
        }
        state.server_timestamp = now_ms();
        self.persist_video_state(id, &state).await;
        state
    }

    /// Advances the authoritative position by wall-clock elapsed time while
    /// playing, looping back to zero at the end of the asset.
    pub async fn update_video_time(&self, id: &str) -> VideoState {
        let mut state = self.get_video_state(id).await;
        let now = now_ms();
        if state.is_playing {
            let elapsed_secs = now.saturating_sub(state.last_update_time) as f64 / 1000.0;
            state.current_time += elapsed_secs;
            if state.current_time >= state.duration {
                state.current_time = 0.0;
            }
            state.last_update_time = now;
        }
        state.server_timestamp = now;
        self.persist_video_state(id, &state).await;
        state
    }

    pub async fn update_cursor(&self, id: &str, user_id: &str, cursor: &Cursor) {
        let Some(json) = to_json("cursor", cursor) else {
            return;
        };
        self.store
            .hash_set(&cursors_key(id), user_id, &json, ROOM_TTL_SECS)
            .await;
    }

    pub async fn get_room_cursors(&self, id: &str) -> HashMap<String, Cursor> {
        self.store
            .hash_get_all(&cursors_key(id))
            .await
            .into_iter()
            .filter_map(|(uid, json)| from_json::<Cursor>("cursor", &json).map(|c| (uid, c)))
            .collect()
    }

    pub async fn remove_cursor(&self, id: &str, user_id: &str) {
        self.store.hash_del(&cursors_key(id), user_id).await;
    }

    /// Deletes rooms that have no members and are past the creation grace
    /// period. Returns how many were deleted.
    pub async fn cleanup_empty_rooms(&self) -> usize {
        let now = now_ms();
        let mut deleted = 0;
        for room in self.get_all_rooms().await {
            if self.get_room_user_count(&room.id).await > 0 {
                continue;
            }
            if now.saturating_sub(room.created_at) <= EMPTY_ROOM_GRACE_MS {
                continue;
            }
            self.delete_room(&room.id).await;
            deleted += 1;
        }
        deleted
    }

    /// Makes sure the lobby everyone lands in by default exists.
    pub async fn ensure_default_room(&self) {
        if self.get_room(DEFAULT_ROOM_ID).await.is_none() {
            self.create_room(
                DEFAULT_ROOM_ID,
                "system",
                RoomOptions {
                    name: Some("Main Lobby".to_string()),
                    max_users: Some(100_000),
                    is_public: Some(true),
                },
            )
            .await;
        }
    }
}
