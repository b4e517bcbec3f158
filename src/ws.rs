//! Session layer: one task per WebSocket connection, owning the session
//! lifecycle (connect, identify, join, active, leave) and dispatching
//! inbound events through the rate limiter to the room manager and
//! batchers.

use crate::batch::Batcher;
use crate::geo;
use crate::messaging::{broadcast_to_room, send_to_client};
use crate::ratelimit::{Action, ConnectionGate, Denied, RateLimiter};
use crate::room::{RoomManager, RoomOptions, DEFAULT_ROOM_ID};
use crate::store::Store;
use crate::types::{
    Client, ClientEvent, Clients, Cursor, Reaction, RoomSummary, ServerEvent, User,
    VideoStatePatch,
};
use crate::utils::{new_reaction_id, new_user_id, now_ms};
use futures::StreamExt;
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

// Channel buffer size for client message queues (prevents OOM from slow clients)
const CLIENT_CHANNEL_BUFFER: usize = 100;

// Payload validation
const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KB max frame size

/// Everything a session handler needs, cloned into each connection task and
/// periodic driver.
#[derive(Clone)]
pub struct HubState {
    pub clients: Clients,
    pub store: Arc<Store>,
    pub rooms: Arc<RoomManager>,
    pub limiter: Arc<RateLimiter>,
    pub gate: Arc<ConnectionGate>,
    pub batcher: Arc<Batcher>,
    pub instance_id: String,
}

/// Query parameters of the session open.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectQuery {
    pub timezone: Option<String>,
    pub room: Option<String>,
}

pub async fn client_connection(ws: warp::ws::WebSocket, state: HubState, query: ConnectQuery) {
    let (client_ws_sender, mut client_ws_rcv) = ws.split();
    // Bounded channel so a slow client cannot buffer unbounded memory
    let (client_sender, client_rcv) = mpsc::channel(CLIENT_CHANNEL_BUFFER);
    let client_rcv = ReceiverStream::new(client_rcv);

    tokio::task::spawn(async move {
        let _ = client_rcv.forward(client_ws_sender).await;
    });

    let user_id = new_user_id();
    let now = now_ms();
    let timezone = query.timezone.unwrap_or_else(|| "UTC".to_string());
    let (city, flag) = geo::resolve(&timezone);

    let user = User {
        id: user_id.clone(),
        city,
        timezone,
        flag,
        connected_at: now,
        last_seen: now,
        instance: state.instance_id.clone(),
    };

    info!(
        "[{}] Client connected: {} ({})",
        state.instance_id, user_id, user.city
    );
    state.clients.write().await.insert(
        user_id.clone(),
        Client {
            sender: client_sender,
            user: user.clone(),
            room_id: None,
            last_seen: now,
        },
    );

    {
        let locked_clients = state.clients.read().await;
        send_to_client(&user_id, &locked_clients, &ServerEvent::UserSelf { user });
    }

    // Auto-join the requested room (or the lobby)
    let room_id = query.room.unwrap_or_else(|| DEFAULT_ROOM_ID.to_string());
    join_room(&state, &user_id, &room_id).await;

    while let Some(result) = client_ws_rcv.next().await {
        match result {
            Ok(msg) => handle_frame(&state, &user_id, msg).await,
            Err(e) => {
                debug!("WebSocket error for {}: {}", user_id, e);
                break;
            }
        }
    }

    handle_disconnect(&state, &user_id).await;
}

/// Session teardown: membership cleanup, then the session record itself.
pub async fn handle_disconnect(state: &HubState, user_id: &str) {
    info!("Disconnecting client {}", user_id);
    leave_current_room(state, user_id).await;
    state.clients.write().await.remove(user_id);
}

async fn handle_frame(state: &HubState, user_id: &str, msg: warp::ws::Message) {
    let received_at = now_ms();

    // Any frame (including pongs) proves the connection is alive
    {
        let mut locked = state.clients.write().await;
        if let Some(client) = locked.get_mut(user_id) {
            client.last_seen = received_at;
        }
    }

    if !msg.is_text() {
        return;
    }

    if msg.as_bytes().len() > MAX_MESSAGE_SIZE {
        warn!(
            "Frame too large from {}: {} bytes",
            user_id,
            msg.as_bytes().len()
        );
        return;
    }

    let Ok(text) = msg.to_str() else { return };
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(ev) => ev,
        Err(e) => {
            // Unknown event names land here too; drop without a reply
            debug!("Unparseable event from {}: {}", user_id, e);
            return;
        }
    };

    dispatch(state, user_id, event, received_at).await;
}

async fn dispatch(state: &HubState, user_id: &str, event: ClientEvent, received_at: u64) {
    match event {
        ClientEvent::RoomJoin { room_id } => {
            if let Err(denied) = state.limiter.check(Action::RoomJoin, user_id).await {
                send_rate_limited(state, user_id, denied).await;
                return;
            }
            join_room(state, user_id, &room_id).await;
        }
        ClientEvent::RoomLeave => {
            leave_current_room(state, user_id).await;
        }
        ClientEvent::RoomsList => {
            let mut summaries = Vec::new();
            for room in state.rooms.get_all_rooms().await {
                let user_count = state.rooms.get_room_user_count(&room.id).await;
                summaries.push(RoomSummary {
                    id: room.id,
                    name: room.name,
                    user_count,
                    max_users: room.max_users,
                    is_public: room.is_public,
                });
            }
            let locked = state.clients.read().await;
            send_to_client(
                user_id,
                &locked,
                &ServerEvent::RoomsList { rooms: summaries },
            );
        }
        ClientEvent::TimeSync(client_timestamp) => {
            if let Err(denied) = state.limiter.check(Action::Sync, user_id).await {
                send_rate_limited(state, user_id, denied).await;
                return;
            }
            let locked = state.clients.read().await;
            send_to_client(
                user_id,
                &locked,
                &ServerEvent::TimeSyncResponse {
                    client_timestamp,
                    server_receive_time: received_at,
                    server_send_time: now_ms(),
                },
            );
        }
        ClientEvent::VideoPlay => {
            if let Err(denied) = state.limiter.check(Action::VideoControl, user_id).await {
                send_rate_limited(state, user_id, denied).await;
                return;
            }
            let Some(room_id) = current_room(state, user_id).await else {
                return;
            };
            // Advance the position first so play resumes from where the
            // authoritative clock actually is
            state.rooms.update_video_time(&room_id).await;
            let video_state = state
                .rooms
                .set_video_state(
                    &room_id,
                    VideoStatePatch {
                        is_playing: Some(true),
                        last_update_time: Some(now_ms()),
                        ..Default::default()
                    },
                )
                .await;
            broadcast_to_room(
                &state.store,
                &state.clients,
                &room_id,
                &ServerEvent::VideoSync { state: video_state },
            )
            .await;
        }
        ClientEvent::VideoPause => {
            if let Err(denied) = state.limiter.check(Action::VideoControl, user_id).await {
                send_rate_limited(state, user_id, denied).await;
                return;
            }
            let Some(room_id) = current_room(state, user_id).await else {
                return;
            };
            state.rooms.update_video_time(&room_id).await;
            let video_state = state
                .rooms
                .set_video_state(
                    &room_id,
                    VideoStatePatch {
                        is_playing: Some(false),
                        ..Default::default()
                    },
                )
                .await;
            broadcast_to_room(
                &state.store,
                &state.clients,
                &room_id,
                &ServerEvent::VideoSync { state: video_state },
            )
            .await;
        }
        ClientEvent::VideoSeek(target) => {
            if let Err(denied) = state.limiter.check(Action::VideoControl, user_id).await {
                send_rate_limited(state, user_id, denied).await;
                return;
            }
            let Some(room_id) = current_room(state, user_id).await else {
                return;
            };
            if !target.is_finite() {
                warn!("Ignoring non-finite seek from {}", user_id);
                return;
            }
            let current = state.rooms.get_video_state(&room_id).await;
            let video_state = state
                .rooms
                .set_video_state(
                    &room_id,
                    VideoStatePatch {
                        current_time: Some(target.clamp(0.0, current.duration)),
                        last_update_time: Some(now_ms()),
                        ..Default::default()
                    },
                )
                .await;
            broadcast_to_room(
                &state.store,
                &state.clients,
                &room_id,
                &ServerEvent::VideoSync { state: video_state },
            )
            .await;
        }
        ClientEvent::CursorMove { x, y } => {
            if let Err(denied) = state.limiter.check(Action::Cursor, user_id).await {
                send_rate_limited(state, user_id, denied).await;
                return;
            }
            if !state.limiter.check_smooth(Action::Cursor, user_id).await {
                // Burst smoothing: silently drop, the next cursor frame
                // supersedes this one anyway
                return;
            }
            if !x.is_finite() || !y.is_finite() {
                return;
            }
            let Some((room_id, user)) = current_room_and_user(state, user_id).await else {
                return;
            };
            let cursor = Cursor {
                user_id: user.id,
                city: user.city,
                flag: user.flag,
                x: x.clamp(0.0, 100.0),
                y: y.clamp(0.0, 100.0),
                timestamp: received_at,
            };
            // Written through so late joiners see recent cursors
            state.rooms.update_cursor(&room_id, user_id, &cursor).await;
            state.batcher.queue_cursor(&room_id, cursor).await;
        }
        ClientEvent::ReactionSend {
            emoji,
            x,
            y,
            video_time,
        } => {
            if let Err(denied) = state.limiter.check(Action::Reaction, user_id).await {
                send_rate_limited(state, user_id, denied).await;
                return;
            }
            if !x.is_finite() || !y.is_finite() || !video_time.is_finite() {
                return;
            }
            let Some((room_id, user)) = current_room_and_user(state, user_id).await else {
                return;
            };
            let reaction = Reaction {
                id: new_reaction_id(),
                user_id: user.id,
                city: user.city,
                flag: user.flag,
                emoji,
                x: x.clamp(0.0, 100.0),
                y: y.clamp(0.0, 100.0),
                video_time: video_time.max(0.0),
                timestamp: received_at,
            };
            state.batcher.queue_reaction(&room_id, reaction).await;
        }
        ClientEvent::Heartbeat => {
            let refreshed = {
                let mut locked = state.clients.write().await;
                locked.get_mut(user_id).map(|client| {
                    client.user.last_seen = received_at;
                    (client.room_id.clone(), client.user.clone())
                })
            };
            if let Some((Some(room_id), user)) = refreshed {
                state.rooms.add_user_to_room(&room_id, &user).await;
            }
        }
    }
}

async fn send_rate_limited(state: &HubState, user_id: &str, denied: Denied) {
    debug!("Rate limited {} on {}", user_id, denied.action);
    let locked = state.clients.read().await;
    send_to_client(
        user_id,
        &locked,
        &ServerEvent::RateLimited {
            action: denied.action.to_string(),
            retry_in: denied.retry_in,
            message: format!(
                "Too many {} messages, retry in {} ms",
                denied.action, denied.retry_in
            ),
        },
    );
}

async fn current_room(state: &HubState, user_id: &str) -> Option<String> {
    let locked = state.clients.read().await;
    locked.get(user_id).and_then(|c| c.room_id.clone())
}

async fn current_room_and_user(state: &HubState, user_id: &str) -> Option<(String, User)> {
    let locked = state.clients.read().await;
    let client = locked.get(user_id)?;
    let room_id = client.room_id.clone()?;
    Some((room_id, client.user.clone()))
}

/// Leaves the current room first (if any), then joins `room_id`, creating
/// it on first use.
async fn join_room(state: &HubState, user_id: &str, room_id: &str) {
    let room = state
        .rooms
        .create_room(room_id, user_id, RoomOptions::default())
        .await;

    // A member re-joining its own room is never refused for capacity
    let already_here = current_room(state, user_id).await.as_deref() == Some(room_id);
    if !already_here && state.rooms.get_room_user_count(room_id).await >= room.max_users {
        warn!("Join refused, room {} is full", room_id);
        let locked = state.clients.read().await;
        send_to_client(
            user_id,
            &locked,
            &ServerEvent::Error {
                message: "Room is full".to_string(),
            },
        );
        return;
    }

    leave_current_room(state, user_id).await;

    let user = {
        let mut locked = state.clients.write().await;
        let Some(client) = locked.get_mut(user_id) else {
            // Session vanished while joining
            return;
        };
        client.room_id = Some(room_id.to_string());
        client.user.last_seen = now_ms();
        client.user.clone()
    };

    info!("Client {} joining room {}", user_id, room_id);
    state.rooms.add_user_to_room(room_id, &user).await;

    let video_state = state.rooms.get_video_state(room_id).await;
    let users: Vec<User> = state.rooms.get_room_users(room_id).await.into_values().collect();

    {
        let locked = state.clients.read().await;
        send_to_client(
            user_id,
            &locked,
            &ServerEvent::RoomJoined {
                room_id: room_id.to_string(),
                room,
                video_state,
                users: users.clone(),
            },
        );
        // Recent cursors persist in the store; replay them so the joiner
        // is not blind until the next batch
        let cursors: Vec<Cursor> = state
            .rooms
            .get_room_cursors(room_id)
            .await
            .into_values()
            .collect();
        if !cursors.is_empty() {
            send_to_client(user_id, &locked, &ServerEvent::CursorsBatch(cursors));
        }
    }

    broadcast_to_room(
        &state.store,
        &state.clients,
        room_id,
        &ServerEvent::UserJoined { user },
    )
    .await;
    broadcast_to_room(
        &state.store,
        &state.clients,
        room_id,
        &ServerEvent::UsersList { users },
    )
    .await;
}

async fn leave_current_room(state: &HubState, user_id: &str) {
    let room_id = {
        let mut locked = state.clients.write().await;
        match locked.get_mut(user_id) {
            Some(client) => client.room_id.take(),
            None => None,
        }
    };
    let Some(room_id) = room_id else { return };

    info!("Client {} leaving room {}", user_id, room_id);
    state.rooms.remove_user_from_room(&room_id, user_id).await;

    broadcast_to_room(
        &state.store,
        &state.clients,
        &room_id,
        &ServerEvent::UserLeft {
            user_id: user_id.to_string(),
        },
    )
    .await;
    let users: Vec<User> = state
        .rooms
        .get_room_users(&room_id)
        .await
        .into_values()
        .collect();
    broadcast_to_room(
        &state.store,
        &state.clients,
        &room_id,
        &ServerEvent::UsersList { users },
    )
    .await;
}
