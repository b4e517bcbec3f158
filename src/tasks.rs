//! Fixed-interval background drivers. Each runs on its own timer,
//! independent of the session handlers.

use crate::messaging::{broadcast_to_room, fanout_local_event, send_to_all_local};
use crate::types::ServerEvent;
use crate::utils::now_ms;
use crate::ws::{handle_disconnect, HubState};
use log::{info, warn};
use std::collections::HashSet;
use std::time::Duration;

const BATCH_FLUSH_INTERVAL_MS: u64 = 100;
const VIDEO_TICK_INTERVAL_MS: u64 = 500;
const SERVER_TIME_INTERVAL_MS: u64 = 1_000;
const ROOM_REAP_INTERVAL_SECS: u64 = 60;
const LIMITER_SWEEP_INTERVAL_SECS: u64 = 10;
const GATE_SWEEP_INTERVAL_SECS: u64 = 60;
const PING_INTERVAL_SECS: u64 = 25;
const ZOMBIE_CHECK_INTERVAL_SECS: u64 = 30;
const ZOMBIE_TIMEOUT_MS: u64 = 60_000; // 60 seconds without a frame = zombie

pub fn spawn_periodic_tasks(state: HubState) {
    tokio::spawn(batch_flush_loop(state.clone()));
    tokio::spawn(video_tick_loop(state.clone()));
    tokio::spawn(server_time_loop(state.clone()));
    tokio::spawn(room_reap_loop(state.clone()));
    tokio::spawn(limiter_sweep_loop(state.clone()));
    tokio::spawn(gate_sweep_loop(state.clone()));
    tokio::spawn(ping_loop(state.clone()));
    tokio::spawn(zombie_loop(state));
}

/// Sends every pending cursor and reaction batch. Also called once on
/// shutdown so queued reactions are not lost.
pub async fn flush_batches(state: &HubState) {
    for (room_id, cursors) in state.batcher.drain_cursors().await {
        broadcast_to_room(
            &state.store,
            &state.clients,
            &room_id,
            &ServerEvent::CursorsBatch(cursors),
        )
        .await;
    }
    for (room_id, reactions) in state.batcher.drain_reactions().await {
        broadcast_to_room(
            &state.store,
            &state.clients,
            &room_id,
            &ServerEvent::ReactionsBatch(reactions),
        )
        .await;
    }
}

async fn batch_flush_loop(state: HubState) {
    let mut interval = tokio::time::interval(Duration::from_millis(BATCH_FLUSH_INTERVAL_MS));
    loop {
        interval.tick().await;
        flush_batches(&state).await;
    }
}

/// Rooms this instance holds sessions for.
async fn local_room_ids(state: &HubState) -> HashSet<String> {
    let locked = state.clients.read().await;
    locked
        .values()
        .filter_map(|c| c.room_id.clone())
        .collect()
}

/// Advances the authoritative position for every room with local sessions
/// and pushes the fresh state to them. Every instance ticks for its own
/// sessions, so cluster-wide coverage holds without pub/sub amplification.
async fn video_tick_loop(state: HubState) {
    let mut interval = tokio::time::interval(Duration::from_millis(VIDEO_TICK_INTERVAL_MS));
    loop {
        interval.tick().await;
        for room_id in local_room_ids(&state).await {
            let video_state = state.rooms.update_video_time(&room_id).await;
            if video_state.is_playing {
                fanout_local_event(
                    &state.clients,
                    &room_id,
                    &ServerEvent::VideoSync { state: video_state },
                )
                .await;
            }
        }
    }
}

/// Coarse wall-clock broadcast so clients can sanity-check their offset.
async fn server_time_loop(state: HubState) {
    let mut interval = tokio::time::interval(Duration::from_millis(SERVER_TIME_INTERVAL_MS));
    loop {
        interval.tick().await;
        send_to_all_local(
            &state.clients,
            &ServerEvent::ServerTime {
                server_time: now_ms(),
            },
        )
        .await;
    }
}

async fn room_reap_loop(state: HubState) {
    let mut interval = tokio::time::interval(Duration::from_secs(ROOM_REAP_INTERVAL_SECS));
    loop {
        interval.tick().await;
        let deleted = state.rooms.cleanup_empty_rooms().await;
        if deleted > 0 {
            info!("Reaped {} empty room(s)", deleted);
        }
    }
}

async fn limiter_sweep_loop(state: HubState) {
    let mut interval = tokio::time::interval(Duration::from_secs(LIMITER_SWEEP_INTERVAL_SECS));
    loop {
        interval.tick().await;
        state.limiter.sweep_local().await;
    }
}

async fn gate_sweep_loop(state: HubState) {
    let mut interval = tokio::time::interval(Duration::from_secs(GATE_SWEEP_INTERVAL_SECS));
    loop {
        interval.tick().await;
        state.gate.sweep().await;
    }
}

/// Keepalive pings; any returning pong refreshes `last_seen` in the frame
/// handler.
async fn ping_loop(state: HubState) {
    let mut interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    loop {
        interval.tick().await;
        let locked = state.clients.read().await;
        for client in locked.values() {
            let _ = client
                .sender
                .try_send(Ok(warp::ws::Message::ping(Vec::new())));
        }
    }
}

/// Disconnects sessions that have been silent past the timeout.
async fn zombie_loop(state: HubState) {
    let mut interval = tokio::time::interval(Duration::from_secs(ZOMBIE_CHECK_INTERVAL_SECS));
    loop {
        interval.tick().await;
        let now = now_ms();
        let zombies: Vec<String> = {
            let locked = state.clients.read().await;
            locked
                .iter()
                .filter(|(_, client)| now.saturating_sub(client.last_seen) > ZOMBIE_TIMEOUT_MS)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for user_id in zombies {
            warn!("Removing zombie connection: {}", user_id);
            handle_disconnect(&state, &user_id).await;
        }
    }
}
