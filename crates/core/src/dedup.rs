use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_DEDUP_MAX_ENTRIES: usize = 4096;

#[derive(Debug, Default)]
struct DedupState {
    entries: HashMap<String, Instant>,
    order: VecDeque<(String, Instant)>,
}

impl DedupState {
    /// Drop marks whose retention window has passed. `order` is sorted by
    /// expiry because every mark uses the same window.
    fn purge(&mut self, now: Instant) {
        while let Some((old_id, old_expiry)) = self.order.front() {
            if *old_expiry > now {
                break;
            }
            let old_id = old_id.clone();
            let old_expiry = *old_expiry;
            self.order.pop_front();
            if self.entries.get(&old_id).is_some_and(|exp| *exp == old_expiry) {
                self.entries.remove(&old_id);
            }
        }
    }

    fn is_live(&self, event_id: &str, now: Instant) -> bool {
        self.entries.get(event_id).is_some_and(|exp| *exp > now)
    }

    fn mark(&mut self, event_id: &str, expires_at: Instant, max_entries: usize) {
        let event_id = event_id.to_string();
        self.entries.insert(event_id.clone(), expires_at);
        self.order.push_back((event_id, expires_at));

        while self.entries.len() > max_entries {
            let Some((evict_id, evict_expiry)) = self.order.pop_front() else {
                break;
            };
            if self.entries.get(&evict_id).is_some_and(|exp| *exp == evict_expiry) {
                self.entries.remove(&evict_id);
            }
        }
    }
}

/// Remembers platform event ids for a fixed window so redeliveries of the
/// same event are not processed twice.
///
/// Events without an id are never deduplicated.
#[derive(Debug)]
pub struct DedupStore {
    window: Duration,
    max_entries: usize,
    state: Mutex<DedupState>,
}

impl Default for DedupStore {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW, DEFAULT_DEDUP_MAX_ENTRIES)
    }
}

impl DedupStore {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            window,
            max_entries: max_entries.max(1),
            state: Mutex::new(DedupState::default()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn seen(&self, event_id: Option<&str>) -> bool {
        let Some(event_id) = usable_id(event_id) else {
            return false;
        };
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.purge(now);
        state.is_live(event_id, now)
    }

    pub async fn mark_seen(&self, event_id: Option<&str>) {
        let Some(event_id) = usable_id(event_id) else {
            return;
        };
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.purge(now);
        state.mark(event_id, now + self.window, self.max_entries);
    }

    /// Returns `true` if the id was already seen; otherwise marks it and
    /// returns `false`. Both steps happen under one lock so concurrent
    /// deliveries of the same id cannot both pass.
    pub async fn check_and_mark(&self, event_id: Option<&str>) -> bool {
        let Some(event_id) = usable_id(event_id) else {
            return false;
        };
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.purge(now);
        if state.is_live(event_id, now) {
            debug!(event_id, "duplicate event delivery");
            return true;
        }
        state.mark(event_id, now + self.window, self.max_entries);
        false
    }

    /// Evict expired marks. Called periodically by the server.
    pub async fn purge_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.purge(Instant::now());
        before - state.entries.len()
    }

    pub async fn len(&self) -> usize {
        let mut state = self.state.lock().await;
        state.purge(Instant::now());
        state.entries.len()
    }
}

fn usable_id(event_id: Option<&str>) -> Option<&str> {
    event_id.filter(|id| !id.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn marked_id_is_seen_until_window_elapses() {
        let store = DedupStore::new(Duration::from_secs(60), 16);
        assert!(!store.seen(Some("evt-1")).await);

        store.mark_seen(Some("evt-1")).await;
        assert!(store.seen(Some("evt-1")).await);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.seen(Some("evt-1")).await);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.seen(Some("evt-1")).await);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn missing_or_blank_ids_are_never_deduplicated() {
        let store = DedupStore::default();
        assert!(!store.check_and_mark(None).await);
        assert!(!store.check_and_mark(None).await);
        assert!(!store.check_and_mark(Some("")).await);
        assert!(!store.check_and_mark(Some("")).await);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn check_and_mark_reports_second_delivery() {
        let store = DedupStore::default();
        assert!(!store.check_and_mark(Some("evt-9")).await);
        assert!(store.check_and_mark(Some("evt-9")).await);
        assert!(!store.check_and_mark(Some("evt-10")).await);
    }

    #[tokio::test]
    async fn capacity_bound_evicts_oldest_marks() {
        let store = DedupStore::new(Duration::from_secs(60), 2);
        store.mark_seen(Some("a")).await;
        store.mark_seen(Some("b")).await;
        store.mark_seen(Some("c")).await;

        assert!(!store.seen(Some("a")).await);
        assert!(store.seen(Some("b")).await);
        assert!(store.seen(Some("c")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn remark_extends_retention() {
        let store = DedupStore::new(Duration::from_secs(10), 16);
        store.mark_seen(Some("evt")).await;
        tokio::time::advance(Duration::from_secs(8)).await;
        store.mark_seen(Some("evt")).await;
        tokio::time::advance(Duration::from_secs(8)).await;

        // The first mark's expiry must not remove the newer one.
        assert_eq!(store.purge_expired().await, 0);
        assert!(store.seen(Some("evt")).await);
    }
}
