//! Key–value store adapter.
//!
//! Rules only ever touch the store through [`KvStore`], which exposes the
//! handful of set and sorted-set primitives the evaluators need. The
//! production backend is Redis behind a [`ConnectionManager`]; [`MemoryKv`]
//! is a process-local backend used by the test suites.
//!
//! Every operation carries its own deadline: a call that exceeds
//! `OP_TIMEOUT` fails with a kv error instead of holding up the caller.
//! This sits underneath the pipeline's per-handler budget, so a wedged
//! store surfaces as a per-rule error rather than a hung request.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use rg_domain::{Error, Result};

/// Per-operation deadline applied by the Redis backend.
const OP_TIMEOUT: Duration = Duration::from_millis(80);

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    async fn srem(&self, key: &str, member: &str) -> Result<()>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
    async fn scard(&self, key: &str) -> Result<u64>;
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()>;
    async fn zrem_range_by_score(&self, key: &str, lo: f64, hi: f64) -> Result<()>;
    async fn zcount(&self, key: &str, lo: f64, hi: f64) -> Result<u64>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
    async fn ping(&self) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Redis backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Redis-backed [`KvStore`].
///
/// [`ConnectionManager`] multiplexes one connection and reconnects on
/// failure; cloning it per call is the intended usage.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    /// Connect to `host` (a `host:port` address) and verify with a ping.
    pub async fn connect(host: &str) -> Result<Self> {
        let url = format!("redis://{host}");
        let client =
            redis::Client::open(url.as_str()).map_err(|e| Error::Kv(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Kv(format!("could not connect to redis at {host}: {e}")))?;
        let kv = Self { conn };
        kv.ping().await?;
        Ok(kv)
    }

    async fn run<T>(
        &self,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(OP_TIMEOUT, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::Kv(e.to_string())),
            Err(_) => Err(Error::Kv("operation timed out".into())),
        }
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run(async move { conn.sadd::<_, _, ()>(key, member).await })
            .await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run(async move { conn.srem::<_, _, ()>(key, member).await })
            .await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        self.run(async move { conn.smembers::<_, Vec<String>>(key).await })
            .await
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        self.run(async move { conn.scard::<_, u64>(key).await }).await
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run(async move { conn.zadd::<_, _, _, ()>(key, member, score).await })
            .await
    }

    async fn zrem_range_by_score(&self, key: &str, lo: f64, hi: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run(async move { conn.zrembyscore::<_, _, _, ()>(key, lo, hi).await })
            .await
    }

    async fn zcount(&self, key: &str, lo: f64, hi: f64) -> Result<u64> {
        let mut conn = self.conn.clone();
        self.run(async move { conn.zcount::<_, _, _, u64>(key, lo, hi).await })
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1) as i64;
        self.run(async move { conn.expire::<_, ()>(key, secs).await })
            .await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run(async move {
            let pong: redis::RedisResult<String> =
                redis::cmd("PING").query_async(&mut conn).await;
            pong
        })
        .await
        .map(|_| ())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-local [`KvStore`] used by the test suites.
///
/// TTLs are recorded but never enforced; eviction behavior belongs to the
/// Redis integration tests.
#[derive(Default)]
pub struct MemoryKv {
    sets: Mutex<HashMap<String, HashSet<String>>>,
    // member -> score per key
    zsets: Mutex<HashMap<String, HashMap<String, f64>>>,
    ttls: Mutex<HashMap<String, Duration>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last TTL recorded for `key`, if any.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.ttls.lock().get(key).copied()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        if let Some(set) = self.sets.lock().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .lock()
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        Ok(self
            .sets
            .lock()
            .get(key)
            .map(|set| set.len() as u64)
            .unwrap_or(0))
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        self.zsets
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem_range_by_score(&self, key: &str, lo: f64, hi: f64) -> Result<()> {
        if let Some(zset) = self.zsets.lock().get_mut(key) {
            zset.retain(|_, score| *score < lo || *score > hi);
        }
        Ok(())
    }

    async fn zcount(&self, key: &str, lo: f64, hi: f64) -> Result<u64> {
        Ok(self
            .zsets
            .lock()
            .get(key)
            .map(|zset| {
                zset.values()
                    .filter(|score| **score >= lo && **score <= hi)
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.ttls.lock().insert(key.to_string(), ttl);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_membership_round_trip() {
        let kv = MemoryKv::new();
        kv.sadd("k", "a").await.unwrap();
        kv.sadd("k", "a").await.unwrap();
        kv.sadd("k", "b").await.unwrap();
        assert_eq!(kv.scard("k").await.unwrap(), 2);

        kv.srem("k", "a").await.unwrap();
        assert_eq!(kv.smembers("k").await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn zset_window_operations() {
        let kv = MemoryKv::new();
        kv.zadd("w", 100.0, "m1").await.unwrap();
        kv.zadd("w", 200.0, "m2").await.unwrap();
        kv.zadd("w", 300.0, "m3").await.unwrap();

        assert_eq!(kv.zcount("w", 150.0, f64::INFINITY).await.unwrap(), 2);

        kv.zrem_range_by_score("w", 0.0, 200.0).await.unwrap();
        assert_eq!(kv.zcount("w", 0.0, f64::INFINITY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ttl_is_recorded() {
        let kv = MemoryKv::new();
        kv.sadd("k", "a").await.unwrap();
        kv.expire("k", Duration::from_secs(60)).await.unwrap();
        assert_eq!(kv.ttl("k"), Some(Duration::from_secs(60)));
    }
}
