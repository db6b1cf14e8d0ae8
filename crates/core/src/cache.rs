use crate::types::Reply;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
struct CacheEntry {
    reply: Reply,
    computed_at: Instant,
    /// Insertion sequence, used to tell live `order` slots from stale ones.
    seq: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<(String, u64)>,
    next_seq: u64,
}

impl CacheState {
    fn evict_oldest(&mut self) -> Option<String> {
        while let Some((key, seq)) = self.order.pop_front() {
            if self.entries.get(&key).is_some_and(|e| e.seq == seq) {
                self.entries.remove(&key);
                return Some(key);
            }
        }
        None
    }
}

/// Most recent reply per (sender, request) key.
///
/// Entries expire after `ttl`. When the cache grows past `capacity` the
/// oldest insertion is evicted; lookups do not refresh an entry's position,
/// so this is insertion-order eviction rather than a true LRU.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL, DEFAULT_CACHE_CAPACITY)
    }
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn lookup(&self, key: &str) -> Option<Reply> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let entry = state.entries.get(key)?;
        if now.duration_since(entry.computed_at) < self.ttl {
            return Some(entry.reply.clone());
        }
        // Stale: drop it now, its `order` slot is skipped later by seq mismatch.
        state.entries.remove(key);
        None
    }

    /// Insert or overwrite. An overwrite counts as a new insertion.
    pub async fn store(&self, key: &str, reply: Reply) {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;

        state.entries.insert(
            key.to_string(),
            CacheEntry {
                reply,
                computed_at: Instant::now(),
                seq,
            },
        );
        state.order.push_back((key.to_string(), seq));

        while state.entries.len() > self.capacity {
            match state.evict_oldest() {
                Some(evicted) => debug!(key = %evicted, "response cache evicted oldest entry"),
                None => break,
            }
        }

        // Keep `order` from accumulating stale slots from overwrites and expiry.
        if state.order.len() > self.capacity.saturating_mul(4) {
            let CacheState { entries, order, .. } = &mut *state;
            order.retain(|(k, s)| entries.get(k).is_some_and(|e| e.seq == *s));
        }
    }

    /// Remove every entry older than the TTL. Called periodically by the server.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state
            .entries
            .retain(|_, e| now.duration_since(e.computed_at) < ttl);
        let CacheState { entries, order, .. } = &mut *state;
        order.retain(|(k, s)| entries.get(k).is_some_and(|e| e.seq == *s));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}
