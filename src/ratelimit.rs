//! Per-user, per-action message limits and per-address connection admission.
//!
//! The primary mechanism is a fixed-window counter in the shared store so the
//! cap holds across instances. When the store is disconnected the counter
//! falls back to a process-local map with the same window semantics. A local
//! token bucket smooths bursts on the chattiest action.

use crate::store::Store;
use crate::utils::now_ms;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sliding window for connection attempts per source address.
const CONNECTION_WINDOW_MS: u64 = 60_000;
/// Attempts allowed per address inside the window.
const CONNECTION_MAX_ATTEMPTS: usize = 20;
/// Idle token buckets are dropped after this long without a call.
const BUCKET_IDLE_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Cursor,
    Reaction,
    Sync,
    /// Reserved: defined in the catalog but not dispatched by any inbound
    /// event yet.
    #[allow(dead_code)]
    Message,
    RoomJoin,
    VideoControl,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::Cursor => "cursor",
            Action::Reaction => "reaction",
            Action::Sync => "sync",
            Action::Message => "message",
            Action::RoomJoin => "roomJoin",
            Action::VideoControl => "videoControl",
        }
    }

    pub fn max(self) -> i64 {
        match self {
            Action::Cursor => 20,
            Action::Reaction => 5,
            Action::Sync => 10,
            Action::Message => 30,
            Action::RoomJoin => 5,
            Action::VideoControl => 10,
        }
    }

    pub fn window_ms(self) -> u64 {
        match self {
            Action::RoomJoin => 10_000,
            _ => 1_000,
        }
    }

    fn window_secs(self) -> u64 {
        self.window_ms().div_ceil(1000)
    }
}

/// Returned to the hub on denial; forwarded verbatim to the offending
/// session as `error:ratelimit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denied {
    pub action: &'static str,
    pub retry_in: u64,
}

struct LocalWindow {
    count: i64,
    reset_at: u64,
}

/// Capacity 2x the window cap, refilled at cap-per-window.
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_ms: f64,
    last_refill: u64,
}

impl TokenBucket {
    fn new(action: Action, now: u64) -> Self {
        let capacity = (action.max() * 2) as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_per_ms: action.max() as f64 / action.window_ms() as f64,
            last_refill: now,
        }
    }

    fn try_take(&mut self, now: u64) -> bool {
        let elapsed = now.saturating_sub(self.last_refill) as f64;
        self.tokens = (self.tokens + elapsed * self.refill_per_ms).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiter {
    store: Arc<Store>,
    windows: Mutex<HashMap<String, LocalWindow>>,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            windows: Mutex::new(HashMap::new()),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Fixed-window check. Allowed iff the post-increment count is within
    /// the action's cap.
    pub async fn check(&self, action: Action, user_id: &str) -> Result<(), Denied> {
        let count = if self.store.connected() {
            let key = format!("rl:{}:{}", action.name(), user_id);
            let count = self.store.incr_with_ttl(&key, action.window_secs()).await;
            if count == 0 {
                // Store dropped mid-call
                self.incr_local(action, user_id).await
            } else {
                count
            }
        } else {
            self.incr_local(action, user_id).await
        };

        if count <= action.max() {
            Ok(())
        } else {
            Err(Denied {
                action: action.name(),
                retry_in: action.window_ms(),
            })
        }
    }

    async fn incr_local(&self, action: Action, user_id: &str) -> i64 {
        let key = format!("{}:{}", action.name(), user_id);
        let now = now_ms();
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(key).or_insert(LocalWindow {
            count: 0,
            reset_at: now + action.window_ms(),
        });
        if entry.reset_at <= now {
            entry.count = 0;
            entry.reset_at = now + action.window_ms();
        }
        entry.count += 1;
        entry.count
    }

    /// Token-bucket smoothing on top of the fixed window. Always local to
    /// the instance holding the session.
    pub async fn check_smooth(&self, action: Action, user_id: &str) -> bool {
        let key = format!("{}:{}", action.name(), user_id);
        let now = now_ms();
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(action, now))
            .try_take(now)
    }

    /// Drops expired local windows and idle token buckets. Runs on a 10 s
    /// cadence.
    pub async fn sweep_local(&self) {
        let now = now_ms();
        self.windows.lock().await.retain(|_, w| w.reset_at > now);
        self.buckets
            .lock()
            .await
            .retain(|_, b| now.saturating_sub(b.last_refill) < BUCKET_IDLE_MS);
    }
}

/// Per-source-address admission: a sliding window of connection attempts in
/// the shared store (cluster-wide) with a local fallback.
pub struct ConnectionGate {
    store: Arc<Store>,
    local: Mutex<HashMap<String, Vec<u64>>>,
    // Addresses with entries in the store, so the sweeper knows which keys
    // to trim
    seen: Mutex<HashSet<String>>,
    seq: AtomicU64,
}

impl ConnectionGate {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            local: Mutex::new(HashMap::new()),
            seen: Mutex::new(HashSet::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Records one attempt from `addr` and returns whether the connection is
    /// admitted.
    pub async fn admit(&self, addr: &str) -> bool {
        let now = now_ms();
        let window_start = now.saturating_sub(CONNECTION_WINDOW_MS);

        if self.store.connected() {
            let key = format!("conn:{}", addr);
            let attempts = self.store.zcount(&key, window_start, u64::MAX).await;
            if attempts >= CONNECTION_MAX_ATTEMPTS {
                return false;
            }
            let member = format!("{}-{}", now, self.seq.fetch_add(1, Ordering::Relaxed));
            self.store.zadd(&key, &member, now).await;
            self.seen.lock().await.insert(addr.to_string());
            true
        } else {
            let mut local = self.local.lock().await;
            let attempts = local.entry(addr.to_string()).or_default();
            attempts.retain(|ts| *ts > window_start);
            if attempts.len() >= CONNECTION_MAX_ATTEMPTS {
                return false;
            }
            attempts.push(now);
            true
        }
    }

    /// Trims attempts older than the window. Runs on a 60 s cadence.
    pub async fn sweep(&self) {
        let cutoff = now_ms().saturating_sub(CONNECTION_WINDOW_MS);

        {
            let mut local = self.local.lock().await;
            for attempts in local.values_mut() {
                attempts.retain(|ts| *ts > cutoff);
            }
            local.retain(|_, attempts| !attempts.is_empty());
        }

        if self.store.connected() {
            let mut seen = self.seen.lock().await;
            let mut empty = Vec::new();
            for addr in seen.iter() {
                let key = format!("conn:{}", addr);
                self.store.zremrangebyscore(&key, 0, cutoff).await;
                if self.store.zcount(&key, 0, u64::MAX).await == 0 {
                    empty.push(addr.clone());
                }
            }
            for addr in empty {
                seen.remove(&addr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn memory_limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(Store::Memory(MemoryStore::new())))
    }

    #[tokio::test]
    async fn test_fixed_window_caps_at_max() {
        let limiter = memory_limiter();
        for _ in 0..5 {
            assert!(limiter.check(Action::Reaction, "u1").await.is_ok());
        }
        let denied = limiter.check(Action::Reaction, "u1").await.unwrap_err();
        assert_eq!(denied.action, "reaction");
        assert_eq!(denied.retry_in, 1000);
    }

    #[tokio::test]
    async fn test_windows_are_per_user_and_per_action() {
        let limiter = memory_limiter();
        for _ in 0..5 {
            assert!(limiter.check(Action::Reaction, "u1").await.is_ok());
        }
        // Another user is unaffected
        assert!(limiter.check(Action::Reaction, "u2").await.is_ok());
        // Another action for the same user is unaffected
        assert!(limiter.check(Action::Sync, "u1").await.is_ok());
    }

    #[tokio::test]
    async fn test_window_resets_after_ttl() {
        let limiter = memory_limiter();
        for _ in 0..5 {
            assert!(limiter.check(Action::Reaction, "u1").await.is_ok());
        }
        assert!(limiter.check(Action::Reaction, "u1").await.is_err());
        tokio::time::sleep(tokio::time::Duration::from_millis(1100)).await;
        assert!(limiter.check(Action::Reaction, "u1").await.is_ok());
    }

    #[tokio::test]
    async fn test_room_join_uses_ten_second_window() {
        let limiter = memory_limiter();
        for _ in 0..5 {
            assert!(limiter.check(Action::RoomJoin, "u1").await.is_ok());
        }
        let denied = limiter.check(Action::RoomJoin, "u1").await.unwrap_err();
        assert_eq!(denied.retry_in, 10_000);
    }

    #[test]
    fn test_token_bucket_drains_and_refills() {
        let mut bucket = TokenBucket::new(Action::Reaction, 0);
        // Capacity is 2 * 5
        for _ in 0..10 {
            assert!(bucket.try_take(0));
        }
        assert!(!bucket.try_take(0));
        // Refill rate is 5 tokens/s; 200 ms buys one token
        assert!(bucket.try_take(200));
        assert!(!bucket.try_take(200));
    }

    #[test]
    fn test_token_bucket_caps_at_capacity() {
        let mut bucket = TokenBucket::new(Action::Reaction, 0);
        // A long idle period must not accumulate beyond capacity
        assert!(bucket.try_take(1_000_000));
        for _ in 0..9 {
            assert!(bucket.try_take(1_000_000));
        }
        assert!(!bucket.try_take(1_000_000));
    }

    #[tokio::test]
    async fn test_sweep_drops_expired_windows() {
        let limiter = memory_limiter();
        limiter.incr_local(Action::Cursor, "u1").await;
        assert_eq!(limiter.windows.lock().await.len(), 1);
        tokio::time::sleep(tokio::time::Duration::from_millis(1100)).await;
        limiter.sweep_local().await;
        assert!(limiter.windows.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_connection_gate_admits_up_to_threshold() {
        let gate = ConnectionGate::new(Arc::new(Store::Memory(MemoryStore::new())));
        for _ in 0..20 {
            assert!(gate.admit("10.0.0.1").await);
        }
        assert!(!gate.admit("10.0.0.1").await);
        // Other addresses are unaffected
        assert!(gate.admit("10.0.0.2").await);
    }

    #[tokio::test]
    async fn test_connection_gate_sweep_trims_store() {
        let store = Arc::new(Store::Memory(MemoryStore::new()));
        let gate = ConnectionGate::new(store.clone());
        assert!(gate.admit("10.0.0.1").await);
        assert_eq!(store.zcount("conn:10.0.0.1", 0, u64::MAX).await, 1);
        // Nothing old enough to trim yet
        gate.sweep().await;
        assert_eq!(store.zcount("conn:10.0.0.1", 0, u64::MAX).await, 1);
    }
}
