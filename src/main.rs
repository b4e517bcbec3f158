mod batch;
mod geo;
mod messaging;
mod ratelimit;
mod room;
mod store;
mod tasks;
mod time_sync;
mod types;
mod utils;
mod ws;

use crate::batch::Batcher;
use crate::messaging::{fanout_local, room_id_from_channel, ROOM_CHANNEL_PATTERN};
use crate::ratelimit::{ConnectionGate, RateLimiter};
use crate::room::RoomManager;
use crate::store::{MemoryStore, RedisStore, Store};
use crate::time_sync::TimeExchangeRequest;
use crate::utils::now_ms;
use crate::ws::{ConnectQuery, HubState};
use log::{error, info, warn};
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use warp::Filter;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Standalone mode forces the in-process store; otherwise Redis is used,
/// falling back in-process only when the URL itself is unusable.
fn select_store(standalone: bool, redis_url: &str) -> Store {
    if standalone {
        info!("STANDALONE set, using the in-process store (single instance)");
        return Store::Memory(MemoryStore::new());
    }
    match RedisStore::connect(redis_url) {
        Some(redis) => {
            info!("Using shared store at {}", redis_url);
            Store::Redis(redis)
        }
        None => {
            warn!("Falling back to the in-process store (single instance)");
            Store::Memory(MemoryStore::new())
        }
    }
}

fn resolve_bind_addr(hostname: &str, port: u16) -> SocketAddr {
    match (hostname, port).to_socket_addrs() {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => {
                error!("Listen address {}:{} resolves to nothing", hostname, port);
                std::process::exit(1);
            }
        },
        Err(e) => {
            error!("Cannot resolve listen address {}:{}: {}", hostname, port, e);
            std::process::exit(1);
        }
    }
}

#[derive(Debug)]
struct AdmissionDenied;
impl warp::reject::Reject for AdmissionDenied {}

async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, warp::Rejection> {
    if err.find::<AdmissionDenied>().is_some() {
        Ok(warp::reply::with_status(
            "Too many connection attempts",
            warp::http::StatusCode::TOO_MANY_REQUESTS,
        ))
    } else {
        Err(err)
    }
}

#[tokio::main]
async fn main() {
    // Default level INFO, overridable with RUST_LOG
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let port: u16 = match env_or("PORT", "3000").parse() {
        Ok(p) => p,
        Err(e) => {
            error!("Invalid PORT: {}", e);
            std::process::exit(1);
        }
    };
    let hostname = env_or("HOSTNAME", "localhost");
    let redis_url = env_or("REDIS_URL", "redis://localhost:6379");
    let instance_id = env_or(
        "INSTANCE_ID",
        &format!("instance-{}", std::process::id()),
    );
    let standalone = std::env::var("STANDALONE").is_ok();

    let started = Instant::now();
    let addr = resolve_bind_addr(&hostname, port);

    let store = Arc::new(select_store(standalone, &redis_url));
    let state = HubState {
        clients: Arc::new(RwLock::new(HashMap::new())),
        store: store.clone(),
        rooms: Arc::new(RoomManager::new(store.clone())),
        limiter: Arc::new(RateLimiter::new(store.clone())),
        gate: Arc::new(ConnectionGate::new(store.clone())),
        batcher: Arc::new(Batcher::new()),
        instance_id: instance_id.clone(),
    };

    state.rooms.ensure_default_room().await;

    // Bridge room-channel traffic back to local sessions. Every broadcast
    // (including this instance's own) arrives here once.
    {
        let mut sub = store.subscribe(ROOM_CHANNEL_PATTERN).await;
        let clients = state.clients.clone();
        tokio::spawn(async move {
            while let Some(msg) = sub.recv().await {
                if let Some(room_id) = room_id_from_channel(&msg.channel) {
                    let locked = clients.read().await;
                    fanout_local(&locked, room_id, &msg.payload);
                }
            }
        });
    }

    tasks::spawn_periodic_tasks(state.clone());

    let state_filter = {
        let state = state.clone();
        warp::any().map(move || state.clone())
    };

    // Per-address admission check before the upgrade
    let admission = {
        let gate = state.gate.clone();
        warp::addr::remote()
            .and_then(move |addr: Option<SocketAddr>| {
                let gate = gate.clone();
                async move {
                    let ip = addr
                        .map(|a| a.ip().to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    if gate.admit(&ip).await {
                        Ok(())
                    } else {
                        warn!("Connection from {} refused by admission gate", ip);
                        Err(warp::reject::custom(AdmissionDenied))
                    }
                }
            })
            .untuple_one()
    };

    let ws_route = warp::path("ws")
        .and(admission)
        .and(warp::ws())
        .and(state_filter)
        .and(warp::query::<ConnectQuery>())
        .map(|ws: warp::ws::Ws, state: HubState, query: ConnectQuery| {
            ws.on_upgrade(move |socket| ws::client_connection(socket, state, query))
        });

    let health_route = warp::path("health").and(warp::get()).map(move || {
        warp::reply::json(&serde_json::json!({
            "status": "healthy",
            "timestamp": now_ms(),
            "uptimeSeconds": started.elapsed().as_secs(),
            "version": env!("CARGO_PKG_VERSION"),
        }))
    });

    let time_get = warp::path("time")
        .and(warp::get())
        .map(|| warp::reply::json(&time_sync::exchange(TimeExchangeRequest::default())));
    let time_post = warp::path("time")
        .and(warp::post())
        .and(warp::body::content_length_limit(4 * 1024))
        .and(warp::body::json())
        .map(|req: TimeExchangeRequest| warp::reply::json(&time_sync::exchange(req)));

    let routes = ws_route
        .or(health_route)
        .or(time_get)
        .or(time_post)
        .recover(handle_rejection);

    // Graceful shutdown on SIGTERM/SIGINT
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
            let mut sigint =
                signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown..."),
                _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown..."),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        let _ = tx.send(());
    });

    info!("[{}] sync-hub listening on {}", instance_id, addr);
    match warp::serve(routes).try_bind_with_graceful_shutdown(addr, async {
        rx.await.ok();
    }) {
        Ok((_, server)) => server.await,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    }

    // Close remaining sessions and push out anything still batched
    {
        let mut locked = state.clients.write().await;
        info!("Closing {} session(s)", locked.len());
        locked.clear();
    }
    tasks::flush_batches(&state).await;
    info!("Server shutdown complete");
}
