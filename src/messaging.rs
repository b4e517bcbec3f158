//! Delivery helpers: single-session sends, local fan-out, and room
//! broadcasts through the pub/sub port.

use crate::store::Store;
use crate::types::{Client, Clients, ServerEvent};
use log::{error, warn};
use std::collections::HashMap;

pub const ROOM_CHANNEL_PATTERN: &str = "room:*";

pub fn room_channel(room_id: &str) -> String {
    format!("room:{}", room_id)
}

/// Channel names are `room:{id}`; the inverse of `room_channel`.
pub fn room_id_from_channel(channel: &str) -> Option<&str> {
    channel.strip_prefix("room:")
}

pub fn send_to_client(user_id: &str, clients: &HashMap<String, Client>, event: &ServerEvent) {
    if let Some(client) = clients.get(user_id) {
        match serde_json::to_string(event) {
            Ok(json) => {
                if let Err(e) = client.sender.try_send(Ok(warp::ws::Message::text(json))) {
                    warn!(
                        "Failed to send to {} (buffer full or closed): {}",
                        user_id, e
                    );
                }
            }
            Err(e) => {
                error!("Failed to serialize message for {}: {}", user_id, e);
            }
        }
    }
}

/// Delivers an already-serialized frame to every local session currently in
/// the room.
pub fn fanout_local(clients: &HashMap<String, Client>, room_id: &str, json: &str) {
    let msg = warp::ws::Message::text(json);
    for client in clients.values() {
        if client.room_id.as_deref() == Some(room_id) {
            if let Err(e) = client.sender.try_send(Ok(msg.clone())) {
                warn!(
                    "Dropping frame for {} (buffer full or closed): {}",
                    client.user.id, e
                );
            }
        }
    }
}

/// Serializes and delivers an event to local room members only. Used by the
/// per-instance drivers, which run on every instance anyway.
pub async fn fanout_local_event(clients: &Clients, room_id: &str, event: &ServerEvent) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize broadcast for room {}: {}", room_id, e);
            return;
        }
    };
    let locked = clients.read().await;
    fanout_local(&locked, room_id, &json);
}

/// Broadcasts to all sessions in the room across the cluster. The message
/// goes out on the room channel; local delivery happens when it comes back
/// through the subscription, so every instance (including this one) fans
/// out exactly once. Falls back to direct local delivery while the store is
/// disconnected.
pub async fn broadcast_to_room(
    store: &Store,
    clients: &Clients,
    room_id: &str,
    event: &ServerEvent,
) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize broadcast for room {}: {}", room_id, e);
            return;
        }
    };
    if store.connected() {
        store.publish(&room_channel(room_id), &json).await;
    } else {
        let locked = clients.read().await;
        fanout_local(&locked, room_id, &json);
    }
}

/// Sends to every local session regardless of room (server-wide notices
/// like the coarse time broadcast).
pub async fn send_to_all_local(clients: &Clients, event: &ServerEvent) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize server-wide message: {}", e);
            return;
        }
    };
    let msg = warp::ws::Message::text(json);
    let locked = clients.read().await;
    for client in locked.values() {
        let _ = client.sender.try_send(Ok(msg.clone()));
    }
}
