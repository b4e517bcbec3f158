use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since UNIX epoch: the timestamp stamped on every
/// state write and compared against store TTL deadlines, rate-limit windows
/// and the zombie-session timeout. Falls back to 0 instead of panicking if
/// the system clock ever sits before the epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Random alphanumeric string of the given length.
pub fn rand_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Opaque ephemeral user id assigned at connect.
pub fn new_user_id() -> String {
    format!("user_{}", rand_string(7))
}

static REACTION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Reaction ids combine a process-wide counter, the wall clock and a random
/// suffix so they stay unique across instances without coordination.
pub fn new_reaction_id() -> String {
    let seq = REACTION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", seq, now_ms(), rand_string(4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_fresh_deadline_is_in_the_future() {
        // Store TTLs and rate-limit windows add an offset to now_ms and
        // compare later reads against it; a freshly computed deadline must
        // not already count as expired
        let deadline = now_ms() + 1000;
        assert!(now_ms() < deadline);
    }

    #[test]
    fn test_reaction_id_embeds_wall_clock() {
        let before = now_ms();
        let id = new_reaction_id();
        let after = now_ms();
        let ts: u64 = id.split('-').nth(1).unwrap().parse().unwrap();
        assert!(
            (before..=after).contains(&ts),
            "id {} should carry the mint time",
            id
        );
    }

    #[test]
    fn test_rand_string_length_and_charset() {
        let s = rand_string(7);
        assert_eq!(s.len(), 7);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_user_id_shape() {
        let id = new_user_id();
        assert!(id.starts_with("user_"));
        assert_eq!(id.len(), "user_".len() + 7);
    }

    #[test]
    fn test_reaction_ids_unique() {
        let ids: HashSet<String> = (0..100).map(|_| new_reaction_id()).collect();
        assert_eq!(ids.len(), 100);
    }
}
