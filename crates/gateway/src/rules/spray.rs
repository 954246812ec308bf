//! Horizontal brute force / password spray rule: flags an IP that touches
//! at least `distinctAccounts` different accounts within a sliding
//! inactivity window.
//!
//! Distinct accounts per IP are a plain set in the KV store whose TTL is
//! refreshed on every observation, so an idle IP resets. Repeated attempts
//! on the same account never raise the count. `passwordSpray` and
//! `horizontalBruteForce` are two configured spellings of this same
//! mechanism; the result name echoes whichever the config used.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use rg_domain::config::SprayParams;
use rg_domain::{Error, EventData, Result};

use crate::services::{KvStore, Services};

use super::{NamedRiskHandler, RiskEvaluator};

pub(crate) async fn compile(
    name: &str,
    params: &SprayParams,
    services: &Services,
) -> Result<NamedRiskHandler> {
    let kv = services.require_kv(name)?;
    kv.ping().await.map_err(|_| {
        Error::Config(format!(
            "{name}: a valid redis connection is required for this rule. \
             Check redis configuration"
        ))
    })?;

    Ok(NamedRiskHandler::new(
        name,
        params.strategy,
        Arc::new(SprayRule {
            name: name.to_string(),
            interval: params.interval(),
            distinct_accounts: params.distinct_accounts,
            kv,
        }),
    ))
}

struct SprayRule {
    name: String,
    interval: Duration,
    distinct_accounts: u64,
    kv: Arc<dyn KvStore>,
}

#[async_trait]
impl RiskEvaluator for SprayRule {
    async fn score(&self, data: &EventData) -> std::result::Result<f64, String> {
        let ip = data.ip().map_err(|e| e.to_string())?;
        let account = data.account().map_err(|e| e.to_string())?;

        let key = format!("{}:distinct:{}", self.name, ip);

        self.kv
            .sadd(&key, account)
            .await
            .map_err(|e| e.to_string())?;
        self.kv
            .expire(&key, self.interval)
            .await
            .map_err(|e| e.to_string())?;

        let distinct = self.kv.scard(&key).await.map_err(|e| e.to_string())?;

        Ok(if distinct >= self.distinct_accounts {
            1.0
        } else {
            0.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rg_domain::Strategy;

    use crate::services::MemoryKv;

    async fn spray_handler(name: &str, distinct_accounts: u64) -> NamedRiskHandler {
        let params = SprayParams {
            interval_seconds: 60,
            distinct_accounts,
            attempts_allowed: None,
            strategy: Strategy::Average,
        };
        compile(name, &params, &Services::with_kv(Arc::new(MemoryKv::new())))
            .await
            .unwrap()
    }

    fn attempt(ip: &str, account: &str) -> EventData {
        EventData {
            ip: Some(ip.to_string()),
            account: Some(account.to_string()),
        }
    }

    #[tokio::test]
    async fn distinct_accounts_trip_the_rule() {
        let handler = spray_handler("horizontalBruteForce", 3).await;

        // Hammering one account is vertical brute force, not spray.
        for _ in 0..3 {
            let result = handler.evaluate(&attempt("1.1.1.1", "alice")).await;
            assert_eq!(result.score, 0.0);
        }

        assert_eq!(handler.evaluate(&attempt("1.1.1.1", "bob")).await.score, 0.0);
        // Third distinct account reaches the threshold.
        assert_eq!(
            handler.evaluate(&attempt("1.1.1.1", "carol")).await.score,
            1.0
        );
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let handler = spray_handler("horizontalBruteForce", 1).await;
        assert_eq!(
            handler.evaluate(&attempt("1.1.1.1", "alice")).await.score,
            1.0
        );
    }

    #[tokio::test]
    async fn counts_are_per_ip() {
        let handler = spray_handler("horizontalBruteForce", 2).await;

        assert_eq!(handler.evaluate(&attempt("1.1.1.1", "alice")).await.score, 0.0);
        assert_eq!(handler.evaluate(&attempt("2.2.2.2", "bob")).await.score, 0.0);
        // Each IP has seen one account so far.
        assert_eq!(handler.evaluate(&attempt("2.2.2.2", "carol")).await.score, 1.0);
    }

    #[tokio::test]
    async fn result_name_echoes_the_configured_spelling() {
        let handler = spray_handler("passwordSpray", 1).await;
        let result = handler.evaluate(&attempt("1.1.1.1", "alice")).await;
        assert_eq!(result.name, "passwordSpray");
    }

    #[tokio::test]
    async fn missing_fields_report_errors() {
        let handler = spray_handler("horizontalBruteForce", 2).await;

        let no_ip = handler.evaluate(&EventData::default()).await;
        assert_eq!(no_ip.err.as_deref(), Some("missing ip"));

        let no_account = handler
            .evaluate(&EventData {
                ip: Some("1.1.1.1".into()),
                account: None,
            })
            .await;
        assert_eq!(no_account.err.as_deref(), Some("missing account"));
        assert_eq!(no_account.score, 0.0);
    }
}
