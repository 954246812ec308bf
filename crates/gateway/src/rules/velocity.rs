//! Velocity rule: flags an IP that fires more than `limit` login events
//! inside a sliding `interval` window.
//!
//! The window is a sorted set per IP in the KV store, scored by event time
//! in milliseconds. Stale members are pruned before each read and the key
//! TTL is refreshed on each write, so idle IPs self-evict. The protocol is
//! check-and-insert: concurrent events for one IP may both count over the
//! limit and both score 1.0. Overcounting is accepted; undercounting is
//! what the pruning order prevents.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use rg_domain::config::VelocityParams;
use rg_domain::{Error, EventData, Result};

use crate::services::{KvStore, Services};

use super::{NamedRiskHandler, RiskEvaluator};

const RULE_NAME: &str = "velocity";

pub(crate) async fn compile(
    params: &VelocityParams,
    services: &Services,
) -> Result<NamedRiskHandler> {
    let kv = services.require_kv(RULE_NAME)?;
    kv.ping().await.map_err(|_| {
        Error::Config(format!(
            "{RULE_NAME}: a valid redis connection is required for this rule. \
             Check redis configuration"
        ))
    })?;

    Ok(NamedRiskHandler::new(
        RULE_NAME,
        params.strategy,
        Arc::new(VelocityRule {
            interval: params.interval(),
            limit: params.limit,
            kv,
        }),
    ))
}

struct VelocityRule {
    interval: Duration,
    limit: u64,
    kv: Arc<dyn KvStore>,
}

#[async_trait]
impl RiskEvaluator for VelocityRule {
    async fn score(&self, data: &EventData) -> std::result::Result<f64, String> {
        let ip = data.ip().map_err(|e| e.to_string())?;

        let now = Utc::now().timestamp_millis();
        let window_start = now - self.interval.as_millis() as i64;
        let key = format!("{RULE_NAME}:{ip}");

        // Drop entries that fell out of the window, then record this event.
        self.kv
            .zrem_range_by_score(&key, 0.0, window_start as f64)
            .await
            .map_err(|e| e.to_string())?;

        // The random suffix keeps members distinct within one millisecond.
        let member = format!("{now}-{}", Uuid::new_v4().simple());
        self.kv
            .zadd(&key, now as f64, &member)
            .await
            .map_err(|e| e.to_string())?;

        let count = self
            .kv
            .zcount(&key, window_start as f64, f64::INFINITY)
            .await
            .map_err(|e| e.to_string())?;

        if let Err(e) = self.kv.expire(&key, self.interval).await {
            tracing::debug!(key = %key, error = %e, "ttl refresh failed");
        }

        // Strictly greater: the current attempt is already counted.
        Ok(if count > self.limit { 1.0 } else { 0.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rg_domain::Strategy;

    use crate::services::MemoryKv;

    async fn velocity_handler(limit: u64, kv: Arc<MemoryKv>) -> NamedRiskHandler {
        let params = VelocityParams {
            interval_seconds: 60,
            limit,
            strategy: Strategy::Override,
        };
        compile(&params, &Services::with_kv(kv)).await.unwrap()
    }

    fn login_from(ip: &str) -> EventData {
        EventData {
            ip: Some(ip.to_string()),
            account: None,
        }
    }

    #[tokio::test]
    async fn fires_only_past_the_limit() {
        let kv = Arc::new(MemoryKv::new());
        let handler = velocity_handler(2, kv).await;
        let data = login_from("1.1.1.1");

        // Attempts 1 and 2 sit at the limit; attempt 3 exceeds it.
        for expected in [0.0, 0.0, 1.0, 1.0] {
            let result = handler.evaluate(&data).await;
            assert!(result.err.is_none(), "{:?}", result.err);
            assert_eq!(result.score, expected);
        }
    }

    #[tokio::test]
    async fn ips_are_counted_independently() {
        let kv = Arc::new(MemoryKv::new());
        let handler = velocity_handler(1, kv).await;

        assert_eq!(handler.evaluate(&login_from("1.1.1.1")).await.score, 0.0);
        assert_eq!(handler.evaluate(&login_from("1.1.1.1")).await.score, 1.0);
        // A different IP starts its own window.
        assert_eq!(handler.evaluate(&login_from("2.2.2.2")).await.score, 0.0);
    }

    #[tokio::test]
    async fn stale_entries_are_pruned_before_counting() {
        let kv = Arc::new(MemoryKv::new());
        let handler = velocity_handler(1, kv.clone()).await;

        // Two events from long before the window should not count.
        let stale = (Utc::now().timestamp_millis() - 120_000) as f64;
        kv.zadd("velocity:1.1.1.1", stale, "old-1").await.unwrap();
        kv.zadd("velocity:1.1.1.1", stale + 1.0, "old-2").await.unwrap();

        let result = handler.evaluate(&login_from("1.1.1.1")).await;
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn ttl_is_refreshed_on_each_event() {
        let kv = Arc::new(MemoryKv::new());
        let handler = velocity_handler(5, kv.clone()).await;

        handler.evaluate(&login_from("1.1.1.1")).await;
        assert_eq!(kv.ttl("velocity:1.1.1.1"), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn missing_ip_reports_error_not_panic() {
        let kv = Arc::new(MemoryKv::new());
        let handler = velocity_handler(5, kv).await;

        let result = handler.evaluate(&EventData::default()).await;
        assert_eq!(result.score, 0.0);
        assert_eq!(result.err.as_deref(), Some("missing ip"));
    }
}
