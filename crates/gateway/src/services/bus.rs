//! NATS alert publisher.
//!
//! Assessments whose aggregate exceeds the configured threshold are
//! published as the full per-rule breakdown, JSON-encoded, to the `alerts`
//! subject. Publishing is fire-and-forget: failures are logged and never
//! surface in the event response.

use rg_domain::config::NatsConfig;
use rg_domain::{Error, Result, RiskResult};

const ALERT_SUBJECT: &str = "alerts";

#[derive(Clone)]
pub struct AlertBus {
    client: async_nats::Client,
    /// Aggregates strictly above this value are published.
    pub threshold: f64,
}

impl AlertBus {
    pub async fn connect(config: &NatsConfig) -> Result<Self> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| Error::Bus(format!("could not connect to nats at {}: {e}", config.url)))?;
        Ok(Self {
            client,
            threshold: config.threshold,
        })
    }

    /// Publish the rule breakdown to the alert subject.
    pub async fn publish(&self, results: &[RiskResult]) {
        let payload = match serde_json::to_vec(results) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode alert payload");
                return;
            }
        };
        if let Err(e) = self.client.publish(ALERT_SUBJECT, payload.into()).await {
            tracing::warn!(error = %e, subject = ALERT_SUBJECT, "nats publish failed");
        }
    }
}
