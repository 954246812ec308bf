//! External service clients, built once at startup and threaded to the
//! components that need them. No package-level singletons: a rule that
//! needs the KV store captures its own handle at compile time.

pub mod bus;
pub mod kv;

use std::sync::Arc;

use rg_domain::config::ServicesConfig;
use rg_domain::{Error, Result};

pub use bus::AlertBus;
pub use kv::{KvStore, MemoryKv, RedisKv};

/// Shared service handles. `None` means the service is disabled in config.
#[derive(Clone, Default)]
pub struct Services {
    pub kv: Option<Arc<dyn KvStore>>,
    pub bus: Option<AlertBus>,
}

impl Services {
    /// Connect everything the config enables. Any failure here is fatal:
    /// a service that cannot reach its configured dependencies must not
    /// boot.
    pub async fn connect(config: &ServicesConfig) -> Result<Self> {
        let bus = if config.nats.enabled {
            let bus = AlertBus::connect(&config.nats).await?;
            tracing::info!(url = %config.nats.url, threshold = config.nats.threshold, "nats alert bus ready");
            Some(bus)
        } else {
            None
        };

        let kv: Option<Arc<dyn KvStore>> = if config.redis.enabled {
            let kv = RedisKv::connect(&config.redis.host).await?;
            tracing::info!(host = %config.redis.host, "redis kv store ready");
            Some(Arc::new(kv))
        } else {
            None
        };

        Ok(Self { kv, bus })
    }

    /// Build a services value around an existing KV handle (test seam).
    pub fn with_kv(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv: Some(kv),
            bus: None,
        }
    }

    /// The KV handle, or the canonical misconfiguration error for `rule`.
    pub fn require_kv(&self, rule: &str) -> Result<Arc<dyn KvStore>> {
        self.kv.clone().ok_or_else(|| {
            Error::Config(format!(
                "{rule}: a valid redis connection is required for this rule. \
                 Check redis configuration"
            ))
        })
    }
}
