/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::clock::Clock;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::error;

/// Byte-valued key/value cache with per-entry TTL.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()>;
}

pub struct MemoryCache {
    clock: Arc<dyn Clock>,
    max_entries: usize,
    entries: RwLock<HashMap<String, (i64, Vec<u8>)>>,
    /// Makes every call fail, for outage tests.
    pub fail: AtomicBool,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            clock,
            max_entries: max_entries.max(16),
            entries: RwLock::new(HashMap::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.fail.load(Ordering::Relaxed) {
            bail!("cache unavailable");
        }
        let now = self.clock.now_ms();
        let map = self.entries.read().await;
        let Some((expires_at, value)) = map.get(key) else {
            return Ok(None);
        };
        if now < *expires_at {
            Ok(Some(value.clone()))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        if self.fail.load(Ordering::Relaxed) {
            bail!("cache unavailable");
        }
        let now = self.clock.now_ms();
        let expires_at = now.saturating_add((ttl_secs as i64).saturating_mul(1000));
        let mut map = self.entries.write().await;
        if map.len() >= self.max_entries && !map.contains_key(key) {
            map.retain(|_, (exp, _)| *exp > now);
            if map.len() >= self.max_entries {
                let soonest = map
                    .iter()
                    .min_by_key(|(_, (exp, _))| *exp)
                    .map(|(k, _)| k.clone());
                if let Some(k) = soonest {
                    map.remove(&k);
                }
            }
        }
        map.insert(key.to_string(), (expires_at, value.to_vec()));
        Ok(())
    }
}

/// Redis-backed cache over a small round-robin pool of managed connections.
pub struct RedisCache {
    pool: Vec<Mutex<ConnectionManager>>,
    index: AtomicUsize,
}

impl RedisCache {
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self> {
        let client = redis::Client::open(url).context("redis url")?;
        let mut pool = Vec::with_capacity(pool_size.max(1));
        for _ in 0..pool_size.max(1) {
            match ConnectionManager::new(client.clone()).await {
                Ok(conn) => pool.push(Mutex::new(conn)),
                Err(e) => error!("redis init failed: {e}"),
            }
        }
        if pool.is_empty() {
            bail!("no redis connection could be established");
        }
        Ok(Self {
            pool,
            index: AtomicUsize::new(0),
        })
    }

    fn handle(&self) -> &Mutex<ConnectionManager> {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        &self.pool[idx]
    }
}

#[async_trait]
impl KvCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.handle().lock().await;
        let v: Option<Vec<u8>> = conn.get(key).await.context("redis get")?;
        Ok(v)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        let mut conn = self.handle().lock().await;
        let _: () = conn
            .set_ex(key, value, ttl_secs.max(1))
            .await
            .context("redis set_ex")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = MemoryCache::new(clock.clone(), 64);
        cache.set("k", b"v", 60).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        clock.advance_secs(59);
        assert!(cache.get("k").await.unwrap().is_some());
        clock.advance_secs(1);
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_error() {
        let cache = MemoryCache::new(Arc::new(ManualClock::new(0)), 16);
        cache.fail.store(true, Ordering::Relaxed);
        assert!(cache.get("k").await.is_err());
        assert!(cache.set("k", b"v", 1).await.is_err());
    }

    #[tokio::test]
    async fn full_cache_drops_expired_entries_first() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = MemoryCache::new(clock.clone(), 16);
        for i in 0..16 {
            cache.set(&format!("old{i}"), b"x", 1).await.unwrap();
        }
        clock.advance_secs(2);
        cache.set("fresh", b"y", 60).await.unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn full_cache_of_live_entries_evicts_soonest_expiry() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = MemoryCache::new(clock.clone(), 16);
        cache.set("short", b"s", 5).await.unwrap();
        for i in 0..15 {
            cache.set(&format!("long{i}"), b"x", 60).await.unwrap();
        }
        cache.set("new", b"n", 60).await.unwrap();
        assert_eq!(cache.len().await, 16);
        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("long0").await.unwrap(), Some(b"x".to_vec()));
        assert_eq!(cache.get("new").await.unwrap(), Some(b"n".to_vec()));
    }
}
