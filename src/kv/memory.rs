//! In-process `KvStore` used by unit tests and local development.
//!
//! Expiry is lazy: entries are dropped when touched after their deadline.
//! Not suitable across replicas; production uses the Redis adapter.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::KvStore;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining TTL for a live key. Test helper; not part of the port.
    pub async fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        let entry = entries.get(key)?;
        if entry.expired(now) {
            return None;
        }
        entry.expires_at.map(|deadline| deadline - now)
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(key)
            && !entry.expired(now)
        {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let current = match entries.get(key) {
            Some(entry) if !entry.expired(now) => entry
                .value
                .parse::<i64>()
                .map_err(|_| anyhow!("INCR on non-integer value for key {key}"))?,
            _ => 0,
        };
        let next = current + 1;
        let expires_at = entries
            .get(key)
            .filter(|entry| !entry.expired(now))
            .and_then(|entry| entry.expires_at);
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key)
            && !entry.expired(now)
        {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_del_round_trip() -> Result<()> {
        let kv = MemoryKv::new();
        kv.set_ex("k", "v", Duration::from_secs(60)).await?;
        assert_eq!(kv.get("k").await?, Some("v".to_string()));
        kv.del("k").await?;
        assert_eq!(kv.get("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing() -> Result<()> {
        let kv = MemoryKv::new();
        kv.set_ex("k", "v", Duration::from_millis(1)).await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(kv.get("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn incr_counts_from_zero_and_keeps_ttl() -> Result<()> {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("counter").await?, 1);
        assert_eq!(kv.incr("counter").await?, 2);
        kv.expire("counter", Duration::from_secs(60)).await?;
        assert_eq!(kv.incr("counter").await?, 3);
        assert!(kv.remaining_ttl("counter").await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn incr_rejects_non_integer() -> Result<()> {
        let kv = MemoryKv::new();
        kv.set_ex("k", "not-a-number", Duration::from_secs(60)).await?;
        assert!(kv.incr("k").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn set_nx_respects_live_entries_only() -> Result<()> {
        let kv = MemoryKv::new();
        assert!(kv.set_nx_ex("k", "a", Duration::from_millis(1)).await?);
        assert!(!kv.set_nx_ex("k", "b", Duration::from_secs(60)).await?);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(kv.set_nx_ex("k", "c", Duration::from_secs(60)).await?);
        assert_eq!(kv.get("k").await?, Some("c".to_string()));
        Ok(())
    }
}
