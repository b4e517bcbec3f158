use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Local session registry, keyed by assigned user id.
pub type Clients = Arc<RwLock<HashMap<String, Client>>>;

/// Default media duration in seconds until a room changes it.
pub const DEFAULT_DURATION_SECS: f64 = 596.0;

#[derive(Debug, Clone)]
pub struct Client {
    // Bounded sender to prevent OOM from slow/malicious clients
    pub sender: mpsc::Sender<std::result::Result<warp::ws::Message, warp::Error>>,
    pub user: User,
    pub room_id: Option<String>,
    pub last_seen: u64, // For zombie connection detection
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: u64,
    pub max_users: usize,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub city: String,
    pub timezone: String,
    pub flag: String,
    pub connected_at: u64,
    pub last_seen: u64,
    pub instance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoState {
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub server_timestamp: u64,
    pub last_update_time: u64,
}

impl VideoState {
    /// Lazily-created default: paused at the start of the sample asset.
    pub fn initial(now: u64) -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            duration: DEFAULT_DURATION_SECS,
            server_timestamp: now,
            last_update_time: now,
        }
    }
}

/// Fields of a video-state write; unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct VideoStatePatch {
    pub is_playing: Option<bool>,
    pub current_time: Option<f64>,
    pub duration: Option<f64>,
    pub last_update_time: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub user_id: String,
    pub city: String,
    pub flag: String,
    pub x: f64,
    pub y: f64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: String,
    pub user_id: String,
    pub city: String,
    pub flag: String,
    pub emoji: String,
    pub x: f64,
    pub y: f64,
    pub video_time: f64,
    pub timestamp: u64,
}

/// Room listing entry with the live member count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub user_count: usize,
    pub max_users: usize,
    pub is_public: bool,
}

/// Incoming frames from clients. Each frame is an event name plus one
/// payload value; unknown event names fail to parse and are dropped.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "room:join")]
    RoomJoin {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    #[serde(rename = "room:leave")]
    RoomLeave,
    #[serde(rename = "rooms:list")]
    RoomsList,
    #[serde(rename = "time:sync")]
    TimeSync(u64),
    #[serde(rename = "video:play")]
    VideoPlay,
    #[serde(rename = "video:pause")]
    VideoPause,
    #[serde(rename = "video:seek")]
    VideoSeek(f64),
    #[serde(rename = "cursor:move")]
    CursorMove { x: f64, y: f64 },
    #[serde(rename = "reaction:send")]
    ReactionSend {
        emoji: String,
        x: f64,
        y: f64,
        #[serde(rename = "videoTime")]
        video_time: f64,
    },
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

/// Outgoing frames to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "user:self")]
    UserSelf { user: User },
    #[serde(rename = "room:joined")]
    RoomJoined {
        #[serde(rename = "roomId")]
        room_id: String,
        room: Room,
        #[serde(rename = "videoState")]
        video_state: VideoState,
        users: Vec<User>,
    },
    #[serde(rename = "user:joined")]
    UserJoined { user: User },
    #[serde(rename = "user:left")]
    UserLeft {
        #[serde(rename = "userId")]
        user_id: String,
    },
    #[serde(rename = "users:list")]
    UsersList { users: Vec<User> },
    #[serde(rename = "rooms:list")]
    RoomsList { rooms: Vec<RoomSummary> },
    #[serde(rename = "video:state")]
    VideoSync { state: VideoState },
    #[serde(rename = "cursors:batch")]
    CursorsBatch(Vec<Cursor>),
    #[serde(rename = "reactions:batch")]
    ReactionsBatch(Vec<Reaction>),
    #[serde(rename = "time:sync:response")]
    TimeSyncResponse {
        #[serde(rename = "clientTimestamp")]
        client_timestamp: u64,
        #[serde(rename = "serverReceiveTime")]
        server_receive_time: u64,
        #[serde(rename = "serverSendTime")]
        server_send_time: u64,
    },
    #[serde(rename = "server:time")]
    ServerTime {
        #[serde(rename = "serverTime")]
        server_time: u64,
    },
    #[serde(rename = "error:ratelimit")]
    RateLimited {
        action: String,
        #[serde(rename = "retryIn")]
        retry_in: u64,
        message: String,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_object_payload() {
        let json = r#"{"event": "room:join", "data": {"roomId": "lobby1"}}"#;
        let ev: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            ev,
            ClientEvent::RoomJoin {
                room_id: "lobby1".to_string()
            }
        );
    }

    #[test]
    fn test_client_event_scalar_payload() {
        let json = r#"{"event": "video:seek", "data": 120.5}"#;
        let ev: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev, ClientEvent::VideoSeek(120.5));

        let json = r#"{"event": "time:sync", "data": 1000}"#;
        let ev: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev, ClientEvent::TimeSync(1000));
    }

    #[test]
    fn test_client_event_unit_payload() {
        // Unit events parse with or without a data field
        let ev: ClientEvent = serde_json::from_str(r#"{"event": "video:play"}"#).unwrap();
        assert_eq!(ev, ClientEvent::VideoPlay);

        let ev: ClientEvent = serde_json::from_str(r#"{"event": "heartbeat"}"#).unwrap();
        assert_eq!(ev, ClientEvent::Heartbeat);
    }

    #[test]
    fn test_client_event_unknown_rejected() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"event": "nope", "data": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_reaction_send_camel_case() {
        let json = r#"{"event": "reaction:send", "data": {"emoji": "🔥", "x": 50.0, "y": 50.0, "videoTime": 12.0}}"#;
        let ev: ClientEvent = serde_json::from_str(json).unwrap();
        match ev {
            ClientEvent::ReactionSend { video_time, .. } => assert_eq!(video_time, 12.0),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_server_event_tagging() {
        let ev = ServerEvent::ServerTime { server_time: 42 };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""event":"server:time""#));
        assert!(json.contains(r#""serverTime":42"#));
    }

    #[test]
    fn test_video_state_wire_fields() {
        let state = VideoState::initial(1000);
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains(r#""isPlaying":false"#));
        assert!(json.contains(r#""currentTime":0.0"#));
        assert!(json.contains(r#""duration":596.0"#));
        assert!(json.contains(r#""serverTimestamp":1000"#));
    }

    #[test]
    fn test_cursors_batch_is_array_payload() {
        let ev = ServerEvent::CursorsBatch(vec![]);
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""data":[]"#));
    }

    #[test]
    fn test_room_round_trip() {
        let room = Room {
            id: "lobby1".to_string(),
            name: "Room lobby1".to_string(),
            created_by: "user_abc1234".to_string(),
            created_at: 1234,
            max_users: 10000,
            is_public: true,
        };
        let json = serde_json::to_string(&room).unwrap();
        assert!(json.contains(r#""createdAt":1234"#));
        let back: Room = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, room.id);
        assert_eq!(back.created_at, room.created_at);
    }
}
