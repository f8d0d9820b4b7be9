//! In-process key-value store.

use super::kv::{GarbageCollect, KvStore};
use crate::error::SessionResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Item {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// A [`KvStore`] held in process memory.
///
/// Suitable for tests and single-node deployments. Expired items are hidden
/// from reads immediately and reclaimed by [`GarbageCollect::gc`].
///
/// ```
/// use hearth_session::store::{KvStore, MemoryKv};
/// use chrono::{Duration, Utc};
///
/// # tokio_test::block_on(async {
/// let kv = MemoryKv::new();
/// kv.set("k", Utc::now() + Duration::minutes(5), b"v").await.unwrap();
/// assert_eq!(kv.get("k").await.unwrap().as_deref(), Some(&b"v"[..]));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryKv {
    items: RwLock<HashMap<String, Item>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items, including expired ones not yet collected.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        let now = Utc::now();
        Ok(self
            .items
            .read()
            .get(key)
            .filter(|item| item.expires_at > now)
            .map(|item| item.value.clone()))
    }

    async fn set(&self, key: &str, expires_at: DateTime<Utc>, value: &[u8]) -> SessionResult<()> {
        self.items.write().insert(
            key.to_string(),
            Item {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        self.items.write().remove(key);
        Ok(())
    }
}

#[async_trait]
impl GarbageCollect for MemoryKv {
    async fn gc(&self) -> SessionResult<u64> {
        let now = Utc::now();
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|_, item| item.expires_at >= now);
        Ok((before - items.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_expired_items_are_hidden() {
        let kv = MemoryKv::new();
        kv.set("k", Utc::now() - Duration::seconds(1), b"v")
            .await
            .unwrap();
        assert!(kv.get("k").await.unwrap().is_none());
        assert_eq!(kv.len(), 1);
    }

    #[tokio::test]
    async fn test_gc_removes_expired() {
        let kv = MemoryKv::new();
        kv.set("old", Utc::now() - Duration::seconds(1), b"v")
            .await
            .unwrap();
        kv.set("new", Utc::now() + Duration::hours(1), b"v")
            .await
            .unwrap();

        assert_eq!(kv.gc().await.unwrap(), 1);
        assert_eq!(kv.len(), 1);
        assert!(kv.get("new").await.unwrap().is_some());
    }
}
