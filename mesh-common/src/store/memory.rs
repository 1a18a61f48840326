use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use super::CoordinationStore;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl: Option<Duration>,
    expires_at: Option<DateTime<Utc>>,
}

/// Snapshot of a stored key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub value: String,
    pub ttl: Option<Duration>,
}

/// Process-local coordination store with lease expiry.
#[derive(Clone)]
pub struct InMemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    fn is_live(&self, entry: &Entry) -> bool {
        entry.expires_at.is_none_or(|at| self.clock.now() < at)
    }

    /// Current value and lease of `path`, if it has not expired.
    pub fn get(&self, path: &str) -> Option<StoredValue> {
        self.entries
            .get(path)
            .filter(|entry| self.is_live(entry))
            .map(|entry| StoredValue {
                value: entry.value.clone(),
                ttl: entry.ttl,
            })
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| self.is_live(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn read(&self, path: &str) -> Result<Option<String>> {
        let value = self.get(path).map(|stored| stored.value);
        if value.is_none() {
            self.entries.remove_if(path, |_, entry| !self.is_live(entry));
        }
        Ok(value)
    }

    async fn write(&self, path: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .map(|ttl| self.clock.now() + ttl)
        });
        self.entries.insert(
            path.to_string(),
            Entry {
                value: value.to_string(),
                ttl,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.entries.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn leased_keys_expire() {
        let clock = ManualClock::default();
        let store = InMemoryStore::with_clock(Arc::new(clock.clone()));

        store
            .write("/services/chat/upstream/chat_1", "10.0.0.5:5000", Some(Duration::from_secs(50)))
            .await
            .unwrap();
        store
            .write("/services/chat/location", "/api/chat", None)
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(49));
        assert!(store.read("/services/chat/upstream/chat_1").await.unwrap().is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(store.read("/services/chat/upstream/chat_1").await.unwrap(), None);
        assert_eq!(
            store.read("/services/chat/location").await.unwrap().as_deref(),
            Some("/api/chat")
        );
        assert_eq!(store.keys(), vec!["/services/chat/location".to_string()]);
    }

    #[tokio::test]
    async fn rewrite_renews_the_lease() {
        let clock = ManualClock::default();
        let store = InMemoryStore::with_clock(Arc::new(clock.clone()));
        let lease = Some(Duration::from_secs(50));

        store.write("/k", "v", lease).await.unwrap();
        clock.advance(chrono::Duration::seconds(40));
        store.write("/k", "v", lease).await.unwrap();
        clock.advance(chrono::Duration::seconds(40));

        assert_eq!(
            store.get("/k"),
            Some(StoredValue {
                value: "v".to_string(),
                ttl: lease
            })
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryStore::new();
        store.write("/k", "v", None).await.unwrap();
        store.delete("/k").await.unwrap();
        store.delete("/k").await.unwrap();
        assert_eq!(store.read("/k").await.unwrap(), None);
    }
}
