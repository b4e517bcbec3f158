//! KV + pub/sub port backing room state and cross-instance fan-out.
//!
//! Two implementations share one method surface: `MemoryStore` keeps
//! everything in process-local maps (standalone mode), `RedisStore` talks to
//! a shared Redis so several hub instances see the same rooms.
//!
//! Failure semantics: a disconnected store returns empty/zero sentinels for
//! reads and silently drops writes. Callers check `connected()` when they
//! need to fall back to local state. Nothing is queued while disconnected.

use crate::utils::now_ms;
use log::{error, info, warn};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::time::{sleep, timeout, Duration};

const REDIS_RESPONSE_TIMEOUT_SECS: u64 = 5;
const REDIS_CONNECT_TIMEOUT_SECS: u64 = 5;
const RECONNECT_INITIAL_BACKOFF_SECS: u64 = 1;
const RECONNECT_MAX_BACKOFF_SECS: u64 = 3;
const RECONNECT_MAX_ATTEMPTS: u32 = 10;

/// A message delivered to a subscription.
#[derive(Debug, Clone)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: String,
}

type Subscriber = (String, mpsc::UnboundedSender<PubSubMessage>);

/// `true` if `channel` matches `pattern` (exact, or prefix when the pattern
/// ends with `*` -- the only glob form the hub uses).
fn channel_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => pattern == channel,
    }
}

pub enum Store {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl Store {
    pub async fn get(&self, key: &str) -> Option<String> {
        match self {
            Store::Memory(s) => s.get(key).await,
            Store::Redis(s) => s.get(key).await,
        }
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) {
        match self {
            Store::Memory(s) => s.set_with_ttl(key, value, ttl_secs).await,
            Store::Redis(s) => s.set_with_ttl(key, value, ttl_secs).await,
        }
    }

    pub async fn delete(&self, key: &str) {
        match self {
            Store::Memory(s) => s.delete(key).await,
            Store::Redis(s) => s.delete(key).await,
        }
    }

    /// Sets one hash field and refreshes the hash TTL.
    pub async fn hash_set(&self, key: &str, field: &str, value: &str, ttl_secs: u64) {
        match self {
            Store::Memory(s) => s.hash_set(key, field, value, ttl_secs).await,
            Store::Redis(s) => s.hash_set(key, field, value, ttl_secs).await,
        }
    }

    pub async fn hash_get_all(&self, key: &str) -> HashMap<String, String> {
        match self {
            Store::Memory(s) => s.hash_get_all(key).await,
            Store::Redis(s) => s.hash_get_all(key).await,
        }
    }

    pub async fn hash_del(&self, key: &str, field: &str) {
        match self {
            Store::Memory(s) => s.hash_del(key, field).await,
            Store::Redis(s) => s.hash_del(key, field).await,
        }
    }

    pub async fn hash_len(&self, key: &str) -> usize {
        match self {
            Store::Memory(s) => s.hash_len(key).await,
            Store::Redis(s) => s.hash_len(key).await,
        }
    }

    /// Increments a counter; the first increment of a window sets the TTL.
    /// Returns 0 when the store is disconnected.
    pub async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> i64 {
        match self {
            Store::Memory(s) => s.incr_with_ttl(key, ttl_secs).await,
            Store::Redis(s) => s.incr_with_ttl(key, ttl_secs).await,
        }
    }

    pub async fn zadd(&self, key: &str, member: &str, score: u64) {
        match self {
            Store::Memory(s) => s.zadd(key, member, score).await,
            Store::Redis(s) => s.zadd(key, member, score).await,
        }
    }

    /// Number of members with score in `[min, max]`.
    pub async fn zcount(&self, key: &str, min: u64, max: u64) -> usize {
        match self {
            Store::Memory(s) => s.zcount(key, min, max).await,
            Store::Redis(s) => s.zcount(key, min, max).await,
        }
    }

    /// Removes members with score in `[min, max]`. Returns the removed count.
    pub async fn zremrangebyscore(&self, key: &str, min: u64, max: u64) -> usize {
        match self {
            Store::Memory(s) => s.zremrangebyscore(key, min, max).await,
            Store::Redis(s) => s.zremrangebyscore(key, min, max).await,
        }
    }

    pub async fn publish(&self, channel: &str, payload: &str) {
        match self {
            Store::Memory(s) => s.publish(channel, payload).await,
            Store::Redis(s) => s.publish(channel, payload).await,
        }
    }

    /// Registers a pattern subscription. Messages published to matching
    /// channels arrive on the returned receiver, in publish order per
    /// instance.
    pub async fn subscribe(&self, pattern: &str) -> mpsc::UnboundedReceiver<PubSubMessage> {
        match self {
            Store::Memory(s) => s.subscribe(pattern).await,
            Store::Redis(s) => s.subscribe(pattern).await,
        }
    }

    pub fn connected(&self) -> bool {
        match self {
            Store::Memory(_) => true,
            Store::Redis(s) => s.connected(),
        }
    }
}

// ---------------------------------------------------------------------------
// In-process implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    strings: HashMap<String, (String, u64)>,
    hashes: HashMap<String, (HashMap<String, String>, u64)>,
    counters: HashMap<String, (i64, u64)>,
    zsets: HashMap<String, Vec<(u64, String)>>,
}

/// Process-local store with the same semantics as the Redis variant.
/// Expiry is lazy: reads drop entries whose deadline passed.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    subscribers: Mutex<Vec<Subscriber>>,
}

fn deadline(ttl_secs: u64) -> u64 {
    now_ms() + ttl_secs * 1000
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock().await;
        match inner.strings.get(key) {
            Some((_, expires)) if *expires <= now_ms() => {
                inner.strings.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) {
        let mut inner = self.inner.lock().await;
        inner
            .strings
            .insert(key.to_string(), (value.to_string(), deadline(ttl_secs)));
    }

    pub async fn delete(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        inner.strings.remove(key);
        inner.hashes.remove(key);
        inner.counters.remove(key);
        inner.zsets.remove(key);
    }

    pub async fn hash_set(&self, key: &str, field: &str, value: &str, ttl_secs: u64) {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .hashes
            .entry(key.to_string())
            .or_insert_with(|| (HashMap::new(), 0));
        entry.0.insert(field.to_string(), value.to_string());
        entry.1 = deadline(ttl_secs);
    }

    pub async fn hash_get_all(&self, key: &str) -> HashMap<String, String> {
        let mut inner = self.inner.lock().await;
        match inner.hashes.get(key) {
            Some((_, expires)) if *expires <= now_ms() => {
                inner.hashes.remove(key);
                HashMap::new()
            }
            Some((fields, _)) => fields.clone(),
            None => HashMap::new(),
        }
    }

    pub async fn hash_del(&self, key: &str, field: &str) {
        let mut inner = self.inner.lock().await;
        if let Some((fields, _)) = inner.hashes.get_mut(key) {
            fields.remove(field);
        }
    }

    pub async fn hash_len(&self, key: &str) -> usize {
        self.hash_get_all(key).await.len()
    }

    pub async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> i64 {
        let mut inner = self.inner.lock().await;
        let now = now_ms();
        let entry = inner.counters.entry(key.to_string()).or_insert((0, 0));
        if entry.1 <= now {
            // Expired or fresh window
            *entry = (1, now + ttl_secs * 1000);
        } else {
            entry.0 += 1;
        }
        entry.0
    }

    pub async fn zadd(&self, key: &str, member: &str, score: u64) {
        let mut inner = self.inner.lock().await;
        let set = inner.zsets.entry(key.to_string()).or_default();
        set.retain(|(_, m)| m != member);
        set.push((score, member.to_string()));
    }

    pub async fn zcount(&self, key: &str, min: u64, max: u64) -> usize {
        let inner = self.inner.lock().await;
        inner
            .zsets
            .get(key)
            .map(|set| set.iter().filter(|(s, _)| *s >= min && *s <= max).count())
            .unwrap_or(0)
    }

    pub async fn zremrangebyscore(&self, key: &str, min: u64, max: u64) -> usize {
        let mut inner = self.inner.lock().await;
        let mut removed = 0;
        if let Some(set) = inner.zsets.get_mut(key) {
            let before = set.len();
            set.retain(|(s, _)| *s < min || *s > max);
            removed = before - set.len();
            if set.is_empty() {
                inner.zsets.remove(key);
            }
        }
        removed
    }

    pub async fn publish(&self, channel: &str, payload: &str) {
        let mut subs = self.subscribers.lock().await;
        subs.retain(|(pattern, tx)| {
            if channel_matches(pattern, channel) {
                tx.send(PubSubMessage {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                })
                .is_ok()
            } else {
                // Keep subscriptions for channels this message doesn't match
                true
            }
        });
    }

    pub async fn subscribe(&self, pattern: &str) -> mpsc::UnboundedReceiver<PubSubMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push((pattern.to_string(), tx));
        rx
    }
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

struct RedisInner {
    client: redis::Client,
    conn: RwLock<Option<redis::aio::MultiplexedConnection>>,
    connected: AtomicBool,
    // Kicked by failed operations to trigger a reconnect round
    kick: Notify,
    subscribers: Mutex<Vec<Subscriber>>,
    // Kicked when a new pattern is registered so the pub/sub reader
    // reconnects and picks it up
    resub: Notify,
}

/// Redis-backed store. KV operations run on a shared multiplexed connection;
/// pub/sub runs on a dedicated connection with its own reconnect loop.
pub struct RedisStore {
    inner: Arc<RedisInner>,
}

impl RedisStore {
    /// Opens the client and spawns the connection manager and pub/sub reader.
    /// The first connection attempt happens in the background; until it
    /// succeeds the store reports `connected() == false`.
    pub fn connect(url: &str) -> Option<Self> {
        let client = match redis::Client::open(url) {
            Ok(c) => c,
            Err(e) => {
                error!("Invalid Redis URL {}: {}", url, e);
                return None;
            }
        };

        let inner = Arc::new(RedisInner {
            client,
            conn: RwLock::new(None),
            connected: AtomicBool::new(false),
            kick: Notify::new(),
            subscribers: Mutex::new(Vec::new()),
            resub: Notify::new(),
        });

        tokio::spawn(Self::run_connection_manager(inner.clone()));
        tokio::spawn(Self::run_subscriber(inner.clone()));

        Some(Self { inner })
    }

    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Reconnect loop for the KV connection: one round of bounded attempts
    /// per kick, exponential backoff capped at `RECONNECT_MAX_BACKOFF_SECS`.
    async fn run_connection_manager(inner: Arc<RedisInner>) {
        loop {
            if !inner.connected.load(Ordering::SeqCst) {
                let mut backoff = RECONNECT_INITIAL_BACKOFF_SECS;
                for attempt in 1..=RECONNECT_MAX_ATTEMPTS {
                    let result = timeout(
                        Duration::from_secs(REDIS_CONNECT_TIMEOUT_SECS),
                        inner.client.get_multiplexed_async_connection_with_timeouts(
                            Duration::from_secs(REDIS_RESPONSE_TIMEOUT_SECS),
                            Duration::from_secs(REDIS_CONNECT_TIMEOUT_SECS),
                        ),
                    )
                    .await;

                    match result {
                        Ok(Ok(conn)) => {
                            *inner.conn.write().await = Some(conn);
                            inner.connected.store(true, Ordering::SeqCst);
                            info!("Redis KV connection established");
                            break;
                        }
                        Ok(Err(e)) => {
                            warn!(
                                "Redis connect attempt {}/{} failed: {}",
                                attempt, RECONNECT_MAX_ATTEMPTS, e
                            );
                        }
                        Err(_) => {
                            warn!(
                                "Redis connect attempt {}/{} timed out",
                                attempt, RECONNECT_MAX_ATTEMPTS
                            );
                        }
                    }
                    sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF_SECS);
                }
                if !inner.connected.load(Ordering::SeqCst) {
                    error!(
                        "Redis unreachable after {} attempts, running on local fallback",
                        RECONNECT_MAX_ATTEMPTS
                    );
                }
            }
            inner.kick.notified().await;
        }
    }

    /// Pub/sub reader: psubscribes all registered patterns and forwards
    /// messages to their receivers. Reconnects forever with capped backoff;
    /// a newly registered pattern forces a reconnect to pick it up.
    async fn run_subscriber(inner: Arc<RedisInner>) {
        let mut backoff = RECONNECT_INITIAL_BACKOFF_SECS;
        loop {
            let patterns: Vec<String> = {
                let subs = inner.subscribers.lock().await;
                subs.iter().map(|(p, _)| p.clone()).collect()
            };
            if patterns.is_empty() {
                inner.resub.notified().await;
                continue;
            }

            let mut pubsub = match timeout(
                Duration::from_secs(REDIS_CONNECT_TIMEOUT_SECS),
                inner.client.get_async_pubsub(),
            )
            .await
            {
                Ok(Ok(ps)) => ps,
                Ok(Err(e)) => {
                    warn!("Redis pub/sub connect failed: {}", e);
                    sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF_SECS);
                    continue;
                }
                Err(_) => {
                    warn!("Redis pub/sub connect timed out");
                    sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF_SECS);
                    continue;
                }
            };

            let mut subscribe_failed = false;
            for pattern in &patterns {
                if let Err(e) = pubsub.psubscribe(pattern).await {
                    warn!("psubscribe {} failed: {}", pattern, e);
                    subscribe_failed = true;
                    break;
                }
            }
            if subscribe_failed {
                sleep(Duration::from_secs(backoff)).await;
                backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF_SECS);
                continue;
            }

            info!("Redis pub/sub listening on {} pattern(s)", patterns.len());
            backoff = RECONNECT_INITIAL_BACKOFF_SECS;

            {
                use futures::StreamExt;
                let mut stream = pubsub.on_message();
                loop {
                    tokio::select! {
                        msg = stream.next() => {
                            let Some(msg) = msg else {
                                warn!("Redis pub/sub stream ended, reconnecting");
                                break;
                            };
                            let channel = msg.get_channel_name().to_string();
                            let payload: String = match msg.get_payload() {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!("Invalid pub/sub payload on {}: {}", channel, e);
                                    continue;
                                }
                            };
                            let mut subs = inner.subscribers.lock().await;
                            subs.retain(|(pattern, tx)| {
                                if channel_matches(pattern, &channel) {
                                    tx.send(PubSubMessage {
                                        channel: channel.clone(),
                                        payload: payload.clone(),
                                    })
                                    .is_ok()
                                } else {
                                    true
                                }
                            });
                        }
                        _ = inner.resub.notified() => {
                            // New pattern registered; reconnect to subscribe it
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn conn(&self) -> Option<redis::aio::MultiplexedConnection> {
        let guard = self.inner.conn.read().await;
        match &*guard {
            Some(c) => Some(c.clone()),
            None => {
                self.inner.kick.notify_one();
                None
            }
        }
    }

    /// Drops the broken connection and kicks the manager.
    async fn fail(&self, op: &str, e: redis::RedisError) {
        warn!("Redis {} failed: {}", op, e);
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            warn!("Redis connection lost, falling back to local state");
        }
        *self.inner.conn.write().await = None;
        self.inner.kick.notify_one();
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn().await?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(v) => v,
            Err(e) => {
                self.fail("GET", e).await;
                None
            }
        }
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        if let Err(e) = conn.set_ex::<_, _, ()>(key, value, ttl_secs).await {
            self.fail("SETEX", e).await;
        }
    }

    pub async fn delete(&self, key: &str) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        if let Err(e) = conn.del::<_, ()>(key).await {
            self.fail("DEL", e).await;
        }
    }

    pub async fn hash_set(&self, key: &str, field: &str, value: &str, ttl_secs: u64) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        if let Err(e) = conn.hset::<_, _, _, ()>(key, field, value).await {
            self.fail("HSET", e).await;
            return;
        }
        if let Err(e) = conn.expire::<_, ()>(key, ttl_secs as i64).await {
            self.fail("EXPIRE", e).await;
        }
    }

    pub async fn hash_get_all(&self, key: &str) -> HashMap<String, String> {
        let Some(mut conn) = self.conn().await else {
            return HashMap::new();
        };
        match conn.hgetall::<_, HashMap<String, String>>(key).await {
            Ok(map) => map,
            Err(e) => {
                self.fail("HGETALL", e).await;
                HashMap::new()
            }
        }
    }

    pub async fn hash_del(&self, key: &str, field: &str) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        if let Err(e) = conn.hdel::<_, _, ()>(key, field).await {
            self.fail("HDEL", e).await;
        }
    }

    pub async fn hash_len(&self, key: &str) -> usize {
        let Some(mut conn) = self.conn().await else {
            return 0;
        };
        match conn.hlen::<_, usize>(key).await {
            Ok(n) => n,
            Err(e) => {
                self.fail("HLEN", e).await;
                0
            }
        }
    }

    pub async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> i64 {
        let Some(mut conn) = self.conn().await else {
            return 0;
        };
        let count = match conn.incr::<_, _, i64>(key, 1).await {
            Ok(n) => n,
            Err(e) => {
                self.fail("INCR", e).await;
                return 0;
            }
        };
        if count == 1 {
            if let Err(e) = conn.expire::<_, ()>(key, ttl_secs as i64).await {
                self.fail("EXPIRE", e).await;
            }
        }
        count
    }

    pub async fn zadd(&self, key: &str, member: &str, score: u64) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        if let Err(e) = conn.zadd::<_, _, _, ()>(key, member, score).await {
            self.fail("ZADD", e).await;
        }
    }

    pub async fn zcount(&self, key: &str, min: u64, max: u64) -> usize {
        let Some(mut conn) = self.conn().await else {
            return 0;
        };
        match conn.zcount::<_, _, _, usize>(key, min, max).await {
            Ok(n) => n,
            Err(e) => {
                self.fail("ZCOUNT", e).await;
                0
            }
        }
    }

    pub async fn zremrangebyscore(&self, key: &str, min: u64, max: u64) -> usize {
        let Some(mut conn) = self.conn().await else {
            return 0;
        };
        match conn.zrembyscore::<_, _, _, usize>(key, min, max).await {
            Ok(n) => n,
            Err(e) => {
                self.fail("ZREMRANGEBYSCORE", e).await;
                0
            }
        }
    }

    pub async fn publish(&self, channel: &str, payload: &str) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        if let Err(e) = conn.publish::<_, _, ()>(channel, payload).await {
            self.fail("PUBLISH", e).await;
        }
    }

    pub async fn subscribe(&self, pattern: &str) -> mpsc::UnboundedReceiver<PubSubMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .await
            .push((pattern.to_string(), tx));
        self.inner.resub.notify_one();
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_matches() {
        assert!(channel_matches("room:*", "room:lobby1"));
        assert!(channel_matches("room:*", "room:"));
        assert!(!channel_matches("room:*", "users:all"));
        assert!(channel_matches("room:lobby1", "room:lobby1"));
        assert!(!channel_matches("room:lobby1", "room:lobby2"));
    }

    #[tokio::test]
    async fn test_memory_get_set_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await, None);
        store.set_with_ttl("k", "v", 60).await;
        assert_eq!(store.get("k").await, Some("v".to_string()));
        store.delete("k").await;
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn test_memory_hash_ops() {
        let store = MemoryStore::new();
        assert!(store.hash_get_all("h").await.is_empty());
        store.hash_set("h", "a", "1", 60).await;
        store.hash_set("h", "b", "2", 60).await;
        assert_eq!(store.hash_len("h").await, 2);
        let all = store.hash_get_all("h").await;
        assert_eq!(all.get("a"), Some(&"1".to_string()));
        store.hash_del("h", "a").await;
        assert_eq!(store.hash_len("h").await, 1);
    }

    #[tokio::test]
    async fn test_memory_incr_window() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_with_ttl("c", 1).await, 1);
        assert_eq!(store.incr_with_ttl("c", 1).await, 2);
        assert_eq!(store.incr_with_ttl("c", 1).await, 3);
        // Window expires, counter restarts
        sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.incr_with_ttl("c", 1).await, 1);
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let store = MemoryStore::new();
        store.set_with_ttl("k", "v", 1).await;
        assert_eq!(store.get("k").await, Some("v".to_string()));
        sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn test_memory_zset_window() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 100).await;
        store.zadd("z", "b", 200).await;
        store.zadd("z", "c", 300).await;
        assert_eq!(store.zcount("z", 150, 300).await, 2);
        assert_eq!(store.zremrangebyscore("z", 0, 150).await, 1);
        assert_eq!(store.zcount("z", 0, u64::MAX).await, 2);
    }

    #[tokio::test]
    async fn test_memory_zadd_replaces_member() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 100).await;
        store.zadd("z", "a", 500).await;
        assert_eq!(store.zcount("z", 0, u64::MAX).await, 1);
        assert_eq!(store.zcount("z", 400, 600).await, 1);
    }

    #[tokio::test]
    async fn test_memory_publish_subscribe() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("room:*").await;
        let mut other = store.subscribe("users:all").await;

        store.publish("room:lobby1", "hello").await;
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "room:lobby1");
        assert_eq!(msg.payload, "hello");

        // Non-matching pattern sees nothing
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_memory_publish_order_preserved() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("room:*").await;
        for i in 0..10 {
            store.publish("room:r", &i.to_string()).await;
        }
        for i in 0..10 {
            assert_eq!(rx.recv().await.unwrap().payload, i.to_string());
        }
    }

    #[tokio::test]
    async fn test_memory_dropped_subscriber_is_pruned() {
        let store = MemoryStore::new();
        let rx = store.subscribe("room:*").await;
        drop(rx);
        store.publish("room:r", "x").await;
        assert!(store.subscribers.lock().await.is_empty());
    }

    // Integration tests require Redis running
    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_redis_round_trip() {
        let store = RedisStore::connect("redis://127.0.0.1:6379").unwrap();
        sleep(Duration::from_millis(500)).await;
        assert!(store.connected());

        store.set_with_ttl("synchub:test:k", "v", 5).await;
        assert_eq!(store.get("synchub:test:k").await, Some("v".to_string()));
        store.delete("synchub:test:k").await;
        assert_eq!(store.get("synchub:test:k").await, None);
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_redis_pubsub_round_trip() {
        let store = RedisStore::connect("redis://127.0.0.1:6379").unwrap();
        let mut rx = store.subscribe("synchub:test:*").await;
        sleep(Duration::from_millis(500)).await;

        store.publish("synchub:test:chan", "payload").await;
        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, "payload");
    }
}
