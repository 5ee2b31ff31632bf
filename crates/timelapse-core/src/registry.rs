use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub path: PathBuf,
    pub state: EntryState,
}

type Key = (u64, String, u64);

pub struct ReuseRegistry {
    entries: Mutex<HashMap<Key, RegistryEntry>>,
    retention_secs: u64,
}

impl ReuseRegistry {
    /// Entries are kept for `max(window, 2 * largest_interval)` seconds past their timestamp.
    pub fn new(window: Duration, largest_interval: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention_secs: window.as_secs().max(largest_interval.saturating_mul(2)),
        }
    }

    pub fn retention_secs(&self) -> u64 {
        self.retention_secs
    }

    pub async fn register(&self, timestamp: u64, camera_id: &str, interval: u64, path: PathBuf, state: EntryState) {
        self.register_at(clock::unix_now(), timestamp, camera_id, interval, path, state)
            .await;
    }

    pub async fn register_at(
        &self,
        now: u64,
        timestamp: u64,
        camera_id: &str,
        interval: u64,
        path: PathBuf,
        state: EntryState,
    ) {
        let mut entries = self.entries.lock().await;
        entries.insert((timestamp, camera_id.to_string(), interval), RegistryEntry { path, state });
        let removed = prune_locked(&mut entries, now, self.retention_secs);
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "registry pruned");
        }
    }

    pub async fn prune_at(&self, now: u64) -> usize {
        let mut entries = self.entries.lock().await;
        prune_locked(&mut entries, now, self.retention_secs)
    }

    pub async fn lookup(&self, timestamp: u64, camera_id: &str, interval: u64) -> Option<RegistryEntry> {
        self.entries
            .lock()
            .await
            .get(&(timestamp, camera_id.to_string(), interval))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Poll until the entry is ready and return its path.
    ///
    /// Returns `None` on timeout, on cancellation, or as soon as the entry is marked failed.
    pub async fn wait_for(
        &self,
        timestamp: u64,
        camera_id: &str,
        interval: u64,
        timeout: Duration,
        poll: Duration,
        cancel: &CancellationToken,
    ) -> Option<PathBuf> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.lookup(timestamp, camera_id, interval).await {
                Some(RegistryEntry { path, state: EntryState::Ready }) => return Some(path),
                Some(RegistryEntry { state: EntryState::Failed, .. }) => return None,
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}

fn prune_locked(entries: &mut HashMap<Key, RegistryEntry>, now: u64, retention_secs: u64) -> usize {
    let cutoff = now.saturating_sub(retention_secs);
    let before = entries.len();
    entries.retain(|(timestamp, _, _), _| *timestamp >= cutoff);
    before - entries.len()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const NOW: u64 = 1_700_000_400;

    #[tokio::test]
    async fn re_registering_ready_does_not_duplicate() {
        let registry = ReuseRegistry::new(Duration::from_secs(300), 60);

        for _ in 0..2 {
            registry
                .register_at(NOW, NOW, "cam", 10, PathBuf::from("a.jpg"), EntryState::Ready)
                .await;
        }

        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn pruning_respects_the_retention_window() {
        // 2 * 600 beats the 300s window.
        let registry = ReuseRegistry::new(Duration::from_secs(300), 600);
        assert_eq!(registry.retention_secs(), 1200);

        registry
            .register_at(NOW, NOW - 1200, "edge", 60, PathBuf::from("edge.jpg"), EntryState::Ready)
            .await;
        registry
            .register_at(NOW, NOW - 1201, "old", 60, PathBuf::from("old.jpg"), EntryState::Ready)
            .await;
        assert!(registry.lookup(NOW - 1201, "old", 60).await.is_none());
        assert!(registry.lookup(NOW - 1200, "edge", 60).await.is_some());

        registry
            .register_at(NOW + 1, NOW, "cam", 60, PathBuf::from("new.jpg"), EntryState::Pending)
            .await;
        assert!(registry.lookup(NOW - 1200, "edge", 60).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn waiter_sees_entry_become_ready() {
        let registry = Arc::new(ReuseRegistry::new(Duration::from_secs(300), 60));
        registry
            .register_at(NOW, NOW, "cam", 10, PathBuf::from("p.jpg"), EntryState::Pending)
            .await;

        let writer = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer
                .register_at(NOW, NOW, "cam", 10, PathBuf::from("p.jpg"), EntryState::Ready)
                .await;
        });

        let path = registry
            .wait_for(NOW, "cam", 10, Duration::from_secs(2), Duration::from_millis(5), &CancellationToken::new())
            .await;
        assert_eq!(path, Some(PathBuf::from("p.jpg")));
    }

    #[tokio::test]
    async fn failed_entry_ends_the_wait_immediately() {
        let registry = ReuseRegistry::new(Duration::from_secs(300), 60);
        registry
            .register_at(NOW, NOW, "cam", 10, PathBuf::from("p.jpg"), EntryState::Failed)
            .await;

        let started = std::time::Instant::now();
        let path = registry
            .wait_for(NOW, "cam", 10, Duration::from_secs(10), Duration::from_millis(5), &CancellationToken::new())
            .await;

        assert!(path.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn missing_entry_times_out() {
        let registry = ReuseRegistry::new(Duration::from_secs(300), 60);
        let path = registry
            .wait_for(NOW, "cam", 15, Duration::from_millis(40), Duration::from_millis(10), &CancellationToken::new())
            .await;
        assert!(path.is_none());
    }
}
